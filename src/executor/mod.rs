//! Remote command execution.
//!
//! The `CommandRunner` trait is the single blocking point of a pipeline run.
//! A non-zero exit code is normal pipeline data, never an `Err`; `Err` is
//! reserved for transport failures (the host cannot be reached or the
//! connection dropped mid-command). A command timeout is reported as a
//! failing `CommandOutput`, so it flows through the classifier like any
//! other failure.

mod ssh;

pub use ssh::SshRunner;

use crate::errors::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Exit code synthesized when a command exceeds its timeout. Matches the
/// coreutils `timeout` convention.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Cap on captured stdout/stderr kept in memory and logged per invocation.
pub const OUTPUT_CAP_BYTES: usize = 4096;

/// Captured result of one remote command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, for classification and digests.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Last `n` lines of combined output, for failure reports.
    pub fn tail(&self, n: usize) -> String {
        let combined = self.combined();
        let lines: Vec<&str> = combined.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// Truncate command output to `cap` bytes, keeping the tail. The end of the
/// output is where failures show up.
pub fn truncate_output(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let boundary = text.len() - cap;
    let start = (boundary..text.len())
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(text.len());
    format!("[... {} bytes truncated ...]\n{}", boundary, &text[start..])
}

/// Executes shell commands against a deployment target.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command, capturing exit code and output. Returns `Err` only
    /// when the transport itself fails.
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, TransportError>;

    /// Whether this runner mutates the target. Dry-run reports `false`.
    fn mutates(&self) -> bool {
        true
    }
}

/// Logs intended commands without executing anything. Every command
/// "succeeds" so the pipeline shape can be inspected end to end.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    commands: Mutex<Vec<String>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands that would have been executed, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("dry-run log poisoned").clone()
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, TransportError> {
        info!(command, "dry-run: would execute");
        self.commands
            .lock()
            .expect("dry-run log poisoned")
            .push(command.to_string());
        Ok(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        })
    }

    fn mutates(&self) -> bool {
        false
    }
}

/// Log one command invocation with capped output. Called once per `run()` by
/// every runner implementation.
pub(crate) fn log_invocation(command: &str, output: &CommandOutput) {
    info!(
        command,
        exit_code = output.exit_code,
        duration_ms = output.duration_ms,
        "remote command finished"
    );
    let combined = output.combined();
    if !combined.is_empty() {
        debug!(output = %truncate_output(&combined, OUTPUT_CAP_BYTES), "command output");
    }
}
