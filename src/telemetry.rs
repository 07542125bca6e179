//! Process-wide logging setup.
//!
//! Initialization is guarded so repeated calls are no-ops: the subscriber is
//! installed exactly once per process, no matter how many components ask.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Install the tracing subscriber. Safe to call more than once; only the
/// first call has any effect.
pub fn init_logging(verbose: bool) {
    INIT.get_or_init(|| {
        let default_filter = if verbose {
            "shipwright=debug"
        } else {
            "shipwright=info"
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}

/// Whether logging has been initialized in this process.
pub fn logging_initialized() -> bool {
    INIT.get().is_some()
}
