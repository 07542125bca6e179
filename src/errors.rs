//! Typed error hierarchy for the Shipwright orchestrator.
//!
//! Three top-level enums cover the three failure domains:
//! - `TransportError` — the target cannot be reached or commanded
//! - `StepError` — a step ran and failed, retries included
//! - `ConfigError` — invalid pipeline/target/state definitions, fatal at startup

use std::path::PathBuf;
use thiserror::Error;

/// Transport-level failures. Never classified or recovered: there is nothing
/// to recover on a host you cannot reach. Aborts the whole run.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error("transport dropped mid-command on {host}: {message}")]
    Dropped { host: String, message: String },
}

/// Errors from executing a single deployment step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("step '{step}' failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        reason: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Configuration problems: cyclic or missing dependencies, invalid persisted
/// state, unknown targets. Fatal at startup, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("cycle detected in step dependencies, involved steps: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("invalid deployment record at {path}: {message}")]
    InvalidRecord { path: PathBuf, message: String },

    #[error("unknown target '{0}': not in targets.toml and not a user@host spec")]
    UnknownTarget(String),

    #[error("deployment already in progress for target '{0}'")]
    RunInProgress(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Process exit codes, one range per failure domain so callers can
/// distinguish "step failed" from "verification failed" from "unreachable".
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG: i32 = 10;
    pub const STEP_FAILED: i32 = 20;
    pub const VERIFICATION_FAILED: i32 = 30;
    pub const UNREACHABLE: i32 = 40;
    pub const LOCKED: i32 = 50;
}
