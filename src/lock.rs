//! Per-directory advisory locking via `flock(2)` on a hidden sentinel file.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::error::{CdnError, Result};

const LOCK_FILE_NAME: &str = ".lock";
const LOCK_FILE_MODE: u32 = 0o660;

/// A held advisory lock on a directory's `.lock` sentinel file. Dropping
/// (or calling [`DirectoryLock::release`] on) the guard releases the OS
/// lock; the sentinel file itself is intentionally left behind, empty.
pub struct DirectoryLock(Flock<std::fs::File>);

impl DirectoryLock {
    /// Block until a lock on `dir`'s sentinel file is held. `shared` selects
    /// a shared (read) lock versus an exclusive (write) lock. Creates the
    /// sentinel file with conservative permissions (owner+group
    /// read/write, no world) if it does not already exist.
    pub fn acquire(dir: &Path, shared: bool) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(LOCK_FILE_MODE)
            .open(&path)
            .map_err(|e| CdnError::io(&path, e))?;

        let arg = if shared { FlockArg::LockShared } else { FlockArg::LockExclusive };
        tracing::trace!(path = %path.display(), shared, "acquiring directory lock");
        Flock::lock(file, arg)
            .map(DirectoryLock)
            .map_err(|(_file, errno)| {
                CdnError::io(&path, io::Error::from_raw_os_error(errno as i32))
            })
    }

    /// Acquire a shared lock, suitable for read-only traversal (runtime
    /// fsck, variant enumeration).
    pub fn acquire_shared(dir: &Path) -> Result<Self> {
        Self::acquire(dir, true)
    }

    /// Acquire an exclusive lock, suitable for mutation (deposit, scale,
    /// startup repair).
    pub fn acquire_exclusive(dir: &Path) -> Result<Self> {
        Self::acquire(dir, false)
    }

    /// Path to the sentinel file this lock guards, relative to nothing in
    /// particular — useful for diagnostics.
    pub fn sentinel_path(dir: &Path) -> PathBuf {
        dir.join(LOCK_FILE_NAME)
    }

    /// Explicitly release the lock. Equivalent to dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn shared_locks_do_not_block_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let first = DirectoryLock::acquire_shared(dir.path()).unwrap();
        let second = DirectoryLock::acquire_shared(dir.path()).unwrap();
        drop(first);
        drop(second);
    }

    #[test]
    fn exclusive_lock_blocks_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_path_buf();
        let held = DirectoryLock::acquire_exclusive(&dir_path).unwrap();

        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            ready_tx.send(()).unwrap();
            let _lock = DirectoryLock::acquire_exclusive(&dir_path).unwrap();
            done_tx.send(()).unwrap();
        });

        ready_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(done_rx.try_recv().is_err(), "lock should still be held");

        drop(held);
        done_rx.recv_timeout(Duration::from_secs(5)).expect("waiter should finish");
        waiter.join().unwrap();
    }

    #[test]
    fn creates_sentinel_with_conservative_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let _lock = DirectoryLock::acquire_exclusive(dir.path()).unwrap();
        let sentinel = DirectoryLock::sentinel_path(dir.path());
        let mode = std::fs::metadata(&sentinel).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, LOCK_FILE_MODE);
        assert_eq!(std::fs::metadata(&sentinel).unwrap().len(), 0);
    }
}
