//! Types shared by the filesystem integrity check ("fsck") that both
//! [`crate::resource::Resource`] and [`crate::store::Store`] implement.

use std::path::PathBuf;

/// Severity of a single deviation found during an fsck pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Expected, benign condition worth recording (e.g. a repair was made).
    Info,
    /// An irregularity that does not by itself prove data loss.
    Warning,
    /// A violated invariant that makes the resource or the whole tree
    /// untrustworthy; fatal when found during startup.
    Severe,
}

impl Severity {
    pub fn is_severe(self) -> bool {
        matches!(self, Severity::Severe)
    }
}

/// One deviation from the on-disk invariants, found while walking the
/// resource tree.
#[derive(Debug, Clone)]
pub struct FsckIssue {
    pub severity: Severity,
    pub path: PathBuf,
    pub message: String,
    pub cause: Option<String>,
}

impl FsckIssue {
    pub fn info(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self { severity: Severity::Info, path: path.into(), message: message.into(), cause: None }
    }

    pub fn warning(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn severe(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self { severity: Severity::Severe, path: path.into(), message: message.into(), cause: None }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Optional out-parameter passed to an fsck pass. `Some` switches on bounded
/// repairs (stray `*.new` removal, empty hash-directory pruning); repaired
/// paths are appended so the caller can hand them to the replicator.
pub type RepairSet<'a> = Option<&'a mut Vec<PathBuf>>;
