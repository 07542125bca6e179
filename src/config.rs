//! Runtime configuration for Shipwright.
//!
//! All per-project state lives under `.shipwright/` in the project directory:
//! `targets.toml` (named targets), `pipeline.json` (optional pipeline
//! override), `state/` (per-target deployment records and locks) and `logs/`.

use crate::errors::ConfigError;
use crate::target::DeployTarget;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Optional `shipwright.toml` at the project root.
#[derive(Debug, Clone, Default, Deserialize)]
struct ShipwrightToml {
    #[serde(default)]
    timeouts: TimeoutsToml,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TimeoutsToml {
    /// Per-command timeout in seconds.
    command_secs: Option<u64>,
    /// SSH connect timeout in seconds.
    connect_secs: Option<u64>,
    /// Optional wall-clock bound for a whole pipeline run. Off by default.
    global_secs: Option<u64>,
}

/// Target definitions as stored in `targets.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
struct TargetsToml {
    #[serde(default)]
    targets: BTreeMap<String, TargetEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct TargetEntry {
    host: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    identity_file: Option<PathBuf>,
    #[serde(default)]
    app_dir: Option<PathBuf>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    expected_addr: Option<String>,
    #[serde(default)]
    health_path: Option<String>,
    #[serde(default)]
    app_port: Option<u16>,
    #[serde(default)]
    variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub shipwright_dir: PathBuf,
    pub targets_file: PathBuf,
    pub pipeline_file: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    /// Wall-clock bound for a whole run, checked between steps. `None`
    /// disables the bound.
    pub global_deadline: Option<Duration>,
    pub verbose: bool,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let shipwright_dir = project_dir.join(".shipwright");

        let toml_path = project_dir.join("shipwright.toml");
        let settings: ShipwrightToml = if toml_path.exists() {
            let raw = std::fs::read_to_string(&toml_path)
                .with_context(|| format!("Failed to read {}", toml_path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", toml_path.display()))?
        } else {
            ShipwrightToml::default()
        };

        Ok(Self {
            targets_file: shipwright_dir.join("targets.toml"),
            pipeline_file: shipwright_dir.join("pipeline.json"),
            state_dir: shipwright_dir.join("state"),
            log_dir: shipwright_dir.join("logs"),
            shipwright_dir,
            project_dir,
            command_timeout: Duration::from_secs(
                settings
                    .timeouts
                    .command_secs
                    .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
            ),
            connect_timeout: Duration::from_secs(
                settings
                    .timeouts
                    .connect_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            global_deadline: settings.timeouts.global_secs.map(Duration::from_secs),
            verbose,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Resolve a target by name from `targets.toml`, falling back to parsing
    /// the argument as an ad-hoc `user@host[:port]` spec.
    pub fn load_target(&self, name_or_spec: &str) -> Result<DeployTarget, ConfigError> {
        if self.targets_file.exists() {
            let raw = std::fs::read_to_string(&self.targets_file).map_err(|source| {
                ConfigError::Io {
                    path: self.targets_file.clone(),
                    source,
                }
            })?;
            let parsed: TargetsToml = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: self.targets_file.clone(),
                message: e.to_string(),
            })?;
            if let Some(entry) = parsed.targets.get(name_or_spec) {
                return Ok(entry.to_target(name_or_spec));
            }
        }
        DeployTarget::parse(name_or_spec)
    }
}

impl TargetEntry {
    fn to_target(&self, name: &str) -> DeployTarget {
        let mut target = DeployTarget {
            name: name.to_string(),
            host: self.host.clone(),
            user: self.user.clone().unwrap_or_else(|| "deploy".to_string()),
            port: self.port.unwrap_or(22),
            identity_file: self.identity_file.clone(),
            app_dir: self.app_dir.clone(),
            service: self.service.clone(),
            domain: self.domain.clone(),
            expected_addr: self.expected_addr.clone(),
            health_path: self
                .health_path
                .clone()
                .unwrap_or_else(|| "/health".to_string()),
            app_port: self.app_port.unwrap_or(8000),
            variables: BTreeMap::new(),
        };
        target.variables = self.variables.clone();
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(config.command_timeout, Duration::from_secs(300));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.global_deadline.is_none());
        assert!(config.state_dir.ends_with(".shipwright/state"));
    }

    #[test]
    fn test_config_reads_shipwright_toml() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("shipwright.toml"),
            "[timeouts]\ncommand_secs = 60\nglobal_secs = 1800\n",
        )
        .unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert_eq!(config.global_deadline, Some(Duration::from_secs(1800)));
        // Unset values keep their defaults.
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.state_dir.exists());
        assert!(config.log_dir.exists());
    }

    #[test]
    fn test_load_target_from_targets_toml() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        fs::create_dir_all(&config.shipwright_dir).unwrap();
        fs::write(
            &config.targets_file,
            r#"
[targets.production]
host = "10.1.2.3"
user = "ops"
domain = "app.example.com"
service = "meatbroker"
app_port = 8100

[targets.production.variables]
repo_url = "git@github.com:acme/app.git"
"#,
        )
        .unwrap();

        let target = config.load_target("production").unwrap();
        assert_eq!(target.name, "production");
        assert_eq!(target.host, "10.1.2.3");
        assert_eq!(target.user, "ops");
        assert_eq!(target.service(), "meatbroker");
        assert_eq!(target.health_url(), "http://app.example.com:8100/health");
        assert_eq!(
            target.variables.get("repo_url").map(String::as_str),
            Some("git@github.com:acme/app.git")
        );
    }

    #[test]
    fn test_load_target_falls_back_to_adhoc_spec() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let target = config.load_target("deploy@192.168.1.10:2222").unwrap();
        assert_eq!(target.host, "192.168.1.10");
        assert_eq!(target.port, 2222);
    }

    #[test]
    fn test_load_target_unknown_name_errors() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let err = config.load_target("nonexistent").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTarget(_)));
    }
}
