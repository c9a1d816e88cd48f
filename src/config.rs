//! Layered configuration: a root path, a replicator group, an uploader
//! flag, and logging knobs, loadable from TOML or built by hand.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CdnError, Result};

/// Logging knobs passed to [`crate::logging::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Everything needed to boot a [`crate::engine::CdnData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory of the engine's on-disk layout.
    pub root: PathBuf,

    /// Replicator group name. `None` makes replication a no-op.
    #[serde(default)]
    pub replicator_group: Option<String>,

    /// Whether this peer accepts new uploads (creates `uploads/`).
    #[serde(default)]
    pub uploader: bool,

    #[serde(default)]
    pub logging: LogConfig,
}

impl EngineConfig {
    /// Construct a config with every non-root field defaulted.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), replicator_group: None, uploader: false, logging: LogConfig::default() }
    }

    /// Parse a TOML file. Every field but `root` defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CdnError::io(path, e))?;
        toml::from_str(&text).map_err(|e| CdnError::bad_argument(path, e.to_string()))
    }
}
