//! Persisted per-target deployment state.
//!
//! One JSON record file per target, append-only during a run, rewritten
//! atomically (write-temp-then-rename) after every state transition so a
//! crash mid-write cannot corrupt it. The store also owns the per-target
//! lock file: one active run per target, a second run fails fast.

use super::step::StepState;
use crate::errors::ConfigError;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

/// One state transition of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEntry {
    pub step: String,
    pub state: StepState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Ordered step history for one run against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub run_id: Uuid,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<RecordEntry>,
}

impl DeploymentRecord {
    pub fn new(target: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target: target.to_string(),
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Append a transition. Entries are never rewritten during a run.
    pub fn append(
        &mut self,
        step: &str,
        state: StepState,
        output_digest: Option<String>,
        detail: Option<String>,
    ) {
        self.entries.push(RecordEntry {
            step: step.to_string(),
            state,
            timestamp: Utc::now(),
            output_digest,
            detail,
        });
    }

    /// Most recent state recorded for a step.
    pub fn latest_state(&self, step: &str) -> Option<StepState> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.step == step)
            .map(|e| e.state)
    }

    /// Steps whose latest state counts as success, used as the resume set.
    pub fn completed_steps(&self) -> HashSet<String> {
        let names: HashSet<&str> = self.entries.iter().map(|e| e.step.as_str()).collect();
        names
            .into_iter()
            .filter(|name| {
                self.latest_state(name)
                    .is_some_and(|state| state.is_success())
            })
            .map(String::from)
            .collect()
    }

    /// Whether any step's latest state is a non-terminal leftover
    /// (`Running`/`Recovered` from an interrupted run).
    pub fn has_dangling_steps(&self) -> bool {
        let steps: HashSet<&str> = self.entries.iter().map(|e| e.step.as_str()).collect();
        steps.into_iter().any(|s| {
            self.latest_state(s)
                .is_some_and(|state| !state.is_terminal())
        })
    }
}

/// Loads, saves and locks per-target records.
pub struct RecordStore {
    state_dir: PathBuf,
}

/// Exclusive per-target run lock; released on drop. The lock file is left
/// in place: unlinking it would let a waiter holding the old inode and a
/// new acquirer on a fresh file both lock "the" target at once.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl RecordStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn record_path(&self, target: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", sanitize(target)))
    }

    fn lock_path(&self, target: &str) -> PathBuf {
        self.state_dir.join(format!("{}.lock", sanitize(target)))
    }

    /// Acquire the exclusive run lock for a target. Fails fast with
    /// `RunInProgress` when another run holds it.
    pub fn lock(&self, target: &str) -> Result<RunLock, ConfigError> {
        self.ensure_dir()?;
        let path = self.lock_path(target);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
        file.try_lock_exclusive()
            .map_err(|_| ConfigError::RunInProgress(target.to_string()))?;
        Ok(RunLock { file })
    }

    pub fn load(&self, target: &str) -> Result<Option<DeploymentRecord>, ConfigError> {
        let path = self.record_path(target);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let record = serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidRecord {
            path,
            message: e.to_string(),
        })?;
        Ok(Some(record))
    }

    /// Atomic save: write to a temp file in the same directory, then rename
    /// over the record.
    pub fn save(&self, record: &DeploymentRecord) -> Result<(), ConfigError> {
        self.ensure_dir()?;
        let path = self.record_path(&record.target);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(record).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let mut file = File::create(&tmp).map_err(|source| ConfigError::Io {
            path: tmp.clone(),
            source,
        })?;
        file.write_all(body.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|source| ConfigError::Io {
                path: tmp.clone(),
                source,
            })?;
        fs::rename(&tmp, &path).map_err(|source| ConfigError::Io { path, source })?;
        Ok(())
    }

    pub fn delete(&self, target: &str) -> Result<bool, ConfigError> {
        let path = self.record_path(target);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| ConfigError::Io { path, source })?;
        Ok(true)
    }

    fn ensure_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.state_dir).map_err(|source| ConfigError::Io {
            path: self.state_dir.clone(),
            source,
        })
    }
}

/// Target names come from user config and ad-hoc `user@host` specs; keep the
/// derived file names filesystem-safe.
fn sanitize(target: &str) -> String {
    target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
