//! External replicator boundary: a best-effort, fire-and-forget notifier
//! that tells a cluster-sync process which paths just changed. Out of
//! scope: anything about how that process actually propagates data.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

/// Notified after every committed mutation with the highest ancestor path
/// that changed (a new hash directory, a new resource, a new variant).
pub trait Replicator: Send + Sync {
    fn notify(&self, path: &Path);
}

/// Invokes `csync2` in the three-phase form required by the deployed
/// configuration: `-h -r <path>`, then `-c`, then `-u`. The single-call
/// "mark-and-update" form does not schedule the update phase reliably on
/// the tested deployment, hence the split. A no-op when no group is
/// configured. Invocations for one group are serialised within this peer.
pub struct Csync2Replicator {
    group: Option<String>,
    serialize: Mutex<()>,
    binary: PathBuf,
}

impl Csync2Replicator {
    pub fn new(group: Option<String>) -> Self {
        Self { group, serialize: Mutex::new(()), binary: PathBuf::from("csync2") }
    }

    /// Override the binary path (tests, non-standard installs).
    pub fn with_binary(group: Option<String>, binary: impl Into<PathBuf>) -> Self {
        Self { group, serialize: Mutex::new(()), binary: binary.into() }
    }

    fn run(&self, group: &str, args: &[&str]) {
        let mut command = Command::new(&self.binary);
        command.arg("-G").arg(group).args(args);
        match command.status() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::error!(%group, ?args, code = status.code(), "csync2 invocation failed");
            }
            Err(error) => {
                tracing::error!(%group, ?args, %error, "failed to spawn csync2");
            }
        }
    }
}

impl Replicator for Csync2Replicator {
    fn notify(&self, path: &Path) {
        let Some(group) = self.group.as_deref() else {
            return;
        };
        let path = path.to_string_lossy().into_owned();
        let _guard = self.serialize.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.run(group, &["-h", "-r", &path]);
        self.run(group, &["-c"]);
        self.run(group, &["-u"]);
    }
}

/// Test double: captures every path it was asked to replicate, in order.
#[derive(Default)]
pub struct RecordingReplicator {
    notified: Mutex<Vec<PathBuf>>,
}

impl RecordingReplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notified_paths(&self) -> Vec<PathBuf> {
        self.notified.lock().unwrap().clone()
    }
}

impl Replicator for RecordingReplicator {
    fn notify(&self, path: &Path) {
        self.notified.lock().unwrap().push(path.to_path_buf());
    }
}
