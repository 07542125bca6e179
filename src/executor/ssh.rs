//! SSH transport driving the system `ssh` binary.
//!
//! Key-based auth only, `BatchMode=yes` so a missing key fails fast instead
//! of hanging on a password prompt. ssh reserves exit code 255 for transport
//! failures; everything else is the remote command's own exit code.

use super::{CommandOutput, CommandRunner, log_invocation, TIMEOUT_EXIT_CODE};
use crate::errors::TransportError;
use crate::target::DeployTarget;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

const SSH_TRANSPORT_EXIT: i32 = 255;

pub struct SshRunner {
    destination: String,
    host: String,
    port: u16,
    identity_file: Option<std::path::PathBuf>,
    connect_timeout: Duration,
}

impl SshRunner {
    pub fn new(target: &DeployTarget, connect_timeout: Duration) -> Self {
        Self {
            destination: format!("{}@{}", target.user, target.host),
            host: target.host.clone(),
            port: target.port,
            identity_file: target.identity_file.clone(),
            connect_timeout,
        }
    }

    fn build_command(&self, command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg("-p")
            .arg(self.port.to_string());
        if let Some(ref identity) = self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(&self.destination)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, TransportError> {
        let start = Instant::now();
        let mut cmd = self.build_command(command);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(TransportError::Spawn {
                    program: "ssh".to_string(),
                    source,
                });
            }
            Err(_) => {
                // Timeout is a failure result, not a crash: the classifier
                // sees it like any other failing command.
                let timed_out = CommandOutput {
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!("command timed out after {}s", timeout.as_secs()),
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                log_invocation(command, &timed_out);
                return Ok(timed_out);
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if exit_code == SSH_TRANSPORT_EXIT {
            let message = if stderr.trim().is_empty() {
                "ssh connection failed".to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(TransportError::Connection {
                host: self.host.clone(),
                message,
            });
        }

        let result = CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        log_invocation(command, &result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn target() -> DeployTarget {
        DeployTarget {
            name: "demo".into(),
            host: "10.0.0.5".into(),
            user: "deploy".into(),
            port: 2222,
            identity_file: Some("/home/ci/.ssh/id_ed25519".into()),
            app_dir: None,
            service: None,
            domain: None,
            expected_addr: None,
            health_path: "/health".into(),
            app_port: 8000,
            variables: BTreeMap::new(),
        }
    }

    #[test]
    fn build_command_includes_batch_mode_and_identity() {
        let runner = SshRunner::new(&target(), Duration::from_secs(10));
        let cmd = runner.build_command("uname -a");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"/home/ci/.ssh/id_ed25519".to_string()));
        assert!(args.contains(&"deploy@10.0.0.5".to_string()));
        assert!(args.contains(&"uname -a".to_string()));
    }
}
