//! One-shot `tracing-subscriber` bootstrap, following the thin
//! `init_logging`-from-`main` pattern used across this codebase's crates.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

static INIT: Once = Once::new();

/// Install a global `tracing` subscriber. Safe to call more than once per
/// process; only the first call takes effect. `RUST_LOG` overrides
/// `config.level` when set.
pub fn init_logging(config: &LogConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}
