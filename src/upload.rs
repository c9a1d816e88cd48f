//! Staging area for not-yet-deposited bytes: `uploads/`, present only on
//! uploader peers and excluded from replication.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::RngCore;

use crate::content_type::ContentType;
use crate::error::{CdnError, Result};

/// Opaque identity token shared between an [`crate::engine::CdnData`] and
/// every [`UploadHandle`] it mints, so a handle created by one engine can be
/// rejected by another.
pub(crate) type EngineToken = Arc<()>;

struct Inner {
    path: PathBuf,
    content_type: ContentType,
    engine_token: EngineToken,
    consumed: AtomicBool,
}

/// A transient, per-upload temp file tagged with a declared content type.
/// Consumed at most once by [`crate::engine::CdnData::find_or_add`].
#[derive(Clone)]
pub struct UploadHandle {
    inner: Arc<Inner>,
}

impl UploadHandle {
    pub fn content_type(&self) -> ContentType {
        self.inner.content_type
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub(crate) fn engine_token(&self) -> &EngineToken {
        &self.inner.engine_token
    }

    /// Open the staging file for writing so the caller can deposit bytes.
    pub fn writer(&self) -> Result<File> {
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.inner.path)
            .map_err(|e| CdnError::io(&self.inner.path, e))
    }

    /// Size of the bytes currently staged.
    pub fn size(&self) -> Result<u64> {
        fs::metadata(&self.inner.path).map(|m| m.len()).map_err(|e| CdnError::io(&self.inner.path, e))
    }

    pub(crate) fn is_consumed(&self) -> bool {
        self.inner.consumed.load(Ordering::SeqCst)
    }

    /// Atomically mark the handle consumed; fails if it already was.
    pub(crate) fn mark_consumed(&self) -> Result<()> {
        if self.inner.consumed.swap(true, Ordering::SeqCst) {
            return Err(CdnError::bad_argument(&self.inner.path, "upload handle already consumed"));
        }
        Ok(())
    }

    /// Remove the underlying temp file. Always called by end-of-operation,
    /// whether the upload was deduplicated or errored out.
    pub(crate) fn remove_file(&self) -> Result<()> {
        match fs::remove_file(&self.inner.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CdnError::io(&self.inner.path, e)),
        }
    }
}

/// The non-replicated `uploads/` directory on an uploader peer.
pub struct Uploads {
    dir: PathBuf,
}

impl Uploads {
    /// Ensure `dir` exists and return a handle to manage it.
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| CdnError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a fresh, empty staging file tagged with `content_type`.
    pub fn create(&self, engine_token: EngineToken, content_type: ContentType) -> Result<UploadHandle> {
        loop {
            let name = format!("{:016x}.{}", rand::thread_rng().next_u64(), content_type.extension());
            let path = self.dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_file) => {
                    return Ok(UploadHandle {
                        inner: Arc::new(Inner {
                            path,
                            content_type,
                            engine_token,
                            consumed: AtomicBool::new(false),
                        }),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(CdnError::io(&path, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_mints_an_empty_tagged_file() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = Uploads::new(dir.path().join("uploads")).unwrap();
        let token: EngineToken = Arc::new(());
        let handle = uploads.create(token, ContentType::Jpeg).unwrap();
        assert_eq!(handle.content_type(), ContentType::Jpeg);
        assert_eq!(handle.size().unwrap(), 0);
        assert!(handle.path().extension().unwrap() == "jpg");
    }

    #[test]
    fn consume_is_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = Uploads::new(dir.path().join("uploads")).unwrap();
        let token: EngineToken = Arc::new(());
        let handle = uploads.create(token, ContentType::Png).unwrap();
        assert!(!handle.is_consumed());
        handle.mark_consumed().unwrap();
        assert!(handle.is_consumed());
        assert!(handle.mark_consumed().is_err());
    }

    #[test]
    fn writer_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = Uploads::new(dir.path().join("uploads")).unwrap();
        let token: EngineToken = Arc::new(());
        let handle = uploads.create(token, ContentType::Gif).unwrap();
        {
            use std::io::Write;
            let mut writer = handle.writer().unwrap();
            writer.write_all(b"GIF89a").unwrap();
        }
        assert_eq!(handle.size().unwrap(), 6);
        handle.remove_file().unwrap();
        assert!(!handle.path().exists());
        handle.remove_file().unwrap(); // idempotent
    }
}
