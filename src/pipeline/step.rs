//! Step definitions and the per-step state machine.

use serde::{Deserialize, Serialize};

fn default_max_retries() -> u32 {
    2
}

/// One named, idempotent unit of deployment work.
///
/// `name` is the resume key and must be stable across runs. `verify` is an
/// optional post-check command (exit 0 means the step's effect is present);
/// when absent the action's exit code is trusted. `max_retries` is finite by
/// construction: unbounded retry is a known prior bug class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Command templates executed in order; the first non-zero exit fails
    /// the step.
    pub commands: Vec<String>,
    /// Pre/post-condition check. Run before the action (skip if it already
    /// passes) and after it (success requires it to pass).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl DeploymentStep {
    pub fn new(name: &str, commands: Vec<&str>) -> Self {
        Self {
            name: name.to_string(),
            depends_on: Vec::new(),
            commands: commands.into_iter().map(String::from).collect(),
            verify: None,
            max_retries: default_max_retries(),
        }
    }

    pub fn depends_on(mut self, deps: Vec<&str>) -> Self {
        self.depends_on = deps.into_iter().map(String::from).collect();
        self
    }

    pub fn verify(mut self, command: &str) -> Self {
        self.verify = Some(command.to_string());
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Lifecycle of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not yet reached.
    Pending,
    /// Action in progress.
    Running,
    /// Action ran and the post-check (if any) passed.
    Succeeded,
    /// Retries exhausted, or cancelled/aborted mid-run.
    Failed,
    /// A recovery action was applied; the step is being retried.
    Recovered,
    /// Effect already present (pre-check passed) or completed in a
    /// previous run.
    Skipped,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Skipped counts as success: the step's effect is present.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}
