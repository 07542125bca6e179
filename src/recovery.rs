//! Registry of remediation procedures for classified failures.
//!
//! Each action is an idempotent command sequence, safe to run twice. The
//! individual fix scripts the deployment history accumulated become entries
//! here instead of new top-level scripts.
//!
//! Design rule: privileged filesystem preparation (log/run directories,
//! ownership) happens here, before the unprivileged service starts. A
//! non-root service process cannot chown its own log directory from inside
//! its startup hooks.

use crate::errors::TransportError;
use crate::executor::{CommandOutput, CommandRunner};
use crate::target::DeployTarget;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// An idempotent remediation procedure tied to an error signature.
#[derive(Debug, Clone)]
pub struct RecoveryAction {
    pub id: String,
    pub summary: String,
    pub commands: Vec<String>,
}

impl RecoveryAction {
    pub fn new(id: &str, summary: &str, commands: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            summary: summary.to_string(),
            commands,
        }
    }

    /// Apply the action through the executor. Returns the output of the
    /// first failing command, or `None` when every command exited zero.
    pub async fn apply(
        &self,
        runner: &dyn CommandRunner,
        target: &DeployTarget,
        timeout: Duration,
    ) -> Result<Option<CommandOutput>, TransportError> {
        info!(action = %self.id, "applying recovery: {}", self.summary);
        for command in &self.commands {
            let rendered = target.render(command);
            let output = runner.run(&rendered, timeout).await?;
            if !output.success() {
                warn!(
                    action = %self.id,
                    command = %rendered,
                    exit_code = output.exit_code,
                    "recovery command failed"
                );
                return Ok(Some(output));
            }
        }
        Ok(None)
    }
}

/// Maps recovery action ids (referenced by error signatures) to procedures.
pub struct RecoveryRegistry {
    actions: HashMap<String, RecoveryAction>,
}

impl RecoveryRegistry {
    pub fn new(actions: Vec<RecoveryAction>) -> Self {
        Self {
            actions: actions.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_actions())
    }

    pub fn resolve(&self, id: &str) -> Option<&RecoveryAction> {
        self.actions.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

fn builtin_actions() -> Vec<RecoveryAction> {
    vec![
        RecoveryAction::new(
            "reinstall-node",
            "purge conflicting Node.js packages and reinstall from the single canonical source",
            vec![
                "sudo apt-get remove -y --purge nodejs npm libnode-dev libnode72 || true".into(),
                "sudo apt-get autoremove -y".into(),
                "sudo rm -rf /usr/include/node /usr/lib/node_modules".into(),
                "curl -fsSL https://deb.nodesource.com/setup_20.x | sudo -E bash -".into(),
                "sudo apt-get install -y nodejs".into(),
            ],
        ),
        RecoveryAction::new(
            "prepare-service-dirs",
            "create the service's log/run directories with correct ownership before the unit starts",
            vec![
                "sudo mkdir -p /var/log/{service} /run/{service}".into(),
                "sudo chown -R {user}:{user} /var/log/{service} /run/{service}".into(),
                "sudo chmod 755 /var/log/{service} /run/{service}".into(),
            ],
        ),
        RecoveryAction::new(
            "fix-app-permissions",
            "restore ownership of the application directory to the deploy user",
            vec![
                "sudo mkdir -p {app_dir}".into(),
                "sudo chown -R {user}:{user} {app_dir}".into(),
            ],
        ),
        RecoveryAction::new(
            "free-port",
            "terminate whatever holds the application port",
            vec![
                "sudo systemctl stop {service} || true".into(),
                "sudo fuser -k {app_port}/tcp || true".into(),
            ],
        ),
        RecoveryAction::new(
            "reload-proxy",
            "validate and reload the reverse proxy configuration",
            vec![
                "sudo nginx -t".into(),
                "sudo systemctl reload nginx".into(),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scripted::{failed, ScriptedRunner};
    use crate::target::DeployTarget;

    fn target() -> DeployTarget {
        let mut t = DeployTarget::parse("deploy@10.0.0.5").unwrap();
        t.name = "meatbroker".into();
        t.service = Some("meatbroker".into());
        t
    }

    #[test]
    fn builtin_registry_resolves_signature_action_ids() {
        let registry = RecoveryRegistry::builtin();
        for id in [
            "reinstall-node",
            "prepare-service-dirs",
            "fix-app-permissions",
            "free-port",
            "reload-proxy",
        ] {
            assert!(registry.resolve(id).is_some(), "missing action {}", id);
        }
        assert!(registry.resolve("nonexistent").is_none());
    }

    #[tokio::test]
    async fn apply_runs_all_commands_rendered() {
        let registry = RecoveryRegistry::builtin();
        let action = registry.resolve("prepare-service-dirs").unwrap();
        let runner = ScriptedRunner::new();
        let result = action
            .apply(&runner, &target(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.is_none());
        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].contains("/var/log/meatbroker"));
        assert!(calls[1].contains("chown -R deploy:deploy"));
    }

    #[tokio::test]
    async fn apply_stops_at_first_failing_command() {
        let action = RecoveryAction::new(
            "two-step",
            "test",
            vec!["first command".into(), "second command".into()],
        );
        let runner = ScriptedRunner::new().always("first", failed(1, "boom"));
        let result = action
            .apply(&runner, &target(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.unwrap().exit_code, 1);
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn destructive_builtin_commands_tolerate_reruns() {
        // Idempotence guard: purge/kill style commands must not fail the
        // action when there is nothing left to remove.
        let registry = RecoveryRegistry::builtin();
        for id in ["reinstall-node", "free-port"] {
            let action = registry.resolve(id).unwrap();
            let guarded = action
                .commands
                .iter()
                .filter(|c| {
                    c.contains("remove -y --purge") || c.contains("stop") || c.contains("fuser")
                });
            for command in guarded {
                assert!(command.ends_with("|| true"), "{} not rerun-safe: {}", id, command);
            }
        }
    }
}
