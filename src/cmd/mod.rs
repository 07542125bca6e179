//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled          |
//! |------------|---------------------------|
//! | `deploy`   | `Deploy`                  |
//! | `status`   | `Status`, `List`, `Reset` |
//! | `diagnose` | `Diagnose`                |

pub mod deploy;
pub mod diagnose;
pub mod status;

pub use deploy::cmd_deploy;
pub use diagnose::cmd_diagnose;
pub use status::{cmd_list, cmd_reset, cmd_status};
