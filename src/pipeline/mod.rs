//! The deployment step pipeline.
//!
//! A pipeline is an ordered set of named, idempotent steps with explicit
//! dependencies. The runner executes them strictly serially per target:
//! steps mutate shared server state (package manager, service configs), so
//! there is nothing to gain and real corruption risk in parallelizing them.
//!
//! Components:
//! 1. **step** - step definitions and the per-step state machine
//! 2. **graph** - dependency validation and topological ordering
//! 3. **record** - persisted per-target run state, resume and locking
//! 4. **catalog** - the default pipeline and `pipeline.json` loading
//! 5. **runner** - the execute/classify/recover/retry loop plus verification

mod catalog;
mod graph;
mod record;
mod runner;
mod step;

pub use catalog::{default_pipeline, load_pipeline};
pub use graph::StepGraph;
pub use record::{DeploymentRecord, RecordEntry, RecordStore, RunLock};
pub use runner::{PipelineRunner, RunOptions, RunOutcome};
pub use step::{DeploymentStep, StepState};
