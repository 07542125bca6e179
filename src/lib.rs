pub mod classify;
pub mod config;
pub mod errors;
pub mod executor;
pub mod pipeline;
pub mod recovery;
pub mod target;
pub mod telemetry;
pub mod verify;
