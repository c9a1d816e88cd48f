//! Unified error type returned by every public operation in this crate.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::fsck::FsckIssue;

/// Convenient result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CdnError>;

/// Errors that can occur while operating the storage engine.
#[derive(Error, Debug)]
pub enum CdnError {
    /// The caller supplied an argument that is invalid on its face: an
    /// extension/type mismatch, an already-consumed upload handle, a refusal
    /// to scale up, or an unsupported content type.
    #[error("bad argument at {path}: {message}")]
    BadArgument { path: PathBuf, message: String },

    /// An identifier, symlink target, or variant filename did not resolve.
    #[error("not found: {path}: {message}")]
    NotFound { path: PathBuf, message: String },

    /// An on-disk invariant was violated outside of an explicit fsck pass.
    #[error("invalid state at {path}: {message}")]
    InvalidState { path: PathBuf, message: String },

    /// A committed file's size changed between write and commit,
    /// indicating concurrent modification of the staging area.
    #[error("concurrent modification at {path}: {message}")]
    ConcurrentModification { path: PathBuf, message: String },

    /// An underlying filesystem call failed.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Startup fsck found one or more SEVERE issues; the engine refused to
    /// initialise.
    #[error("startup fsck at {path}: found {} severe issue(s)", severe_count(.issues))]
    FsckSevere { path: PathBuf, issues: Vec<FsckIssue> },
}

fn severe_count(issues: &[FsckIssue]) -> usize {
    issues.iter().filter(|issue| issue.severity.is_severe()).count()
}

impl CdnError {
    pub fn bad_argument(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CdnError::BadArgument { path: path.into(), message: message.into() }
    }

    pub fn not_found(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CdnError::NotFound { path: path.into(), message: message.into() }
    }

    pub fn invalid_state(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CdnError::InvalidState { path: path.into(), message: message.into() }
    }

    pub fn concurrent_modification(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CdnError::ConcurrentModification { path: path.into(), message: message.into() }
    }

    /// Wrap an [`io::Error`] with the path that was being operated on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        CdnError::Io { path: path.as_ref().to_path_buf(), source }
    }

    /// The path this error is attached to, if it carries one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            CdnError::BadArgument { path, .. }
            | CdnError::NotFound { path, .. }
            | CdnError::InvalidState { path, .. }
            | CdnError::ConcurrentModification { path, .. }
            | CdnError::Io { path, .. }
            | CdnError::FsckSevere { path, .. } => Some(path),
        }
    }
}

/// Extension trait for attaching a path to a bare [`io::Error`] as it
/// propagates out of a `std::fs` call.
pub(crate) trait IoContext<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|source| CdnError::io(path, source))
    }
}
