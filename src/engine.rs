//! Boots the root layout, wires the replicator and codec, runs startup
//! `fsck`, and implements `find-or-add`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::ImageCodec;
use crate::config::EngineConfig;
use crate::content_type::ContentType;
use crate::error::{CdnError, Result};
use crate::fsck::FsckIssue;
use crate::replicator::Replicator;
use crate::store::Store;
use crate::upload::{EngineToken, UploadHandle, Uploads};
use crate::variant::Variant;

/// The content-addressed storage engine: one per peer process.
pub struct CdnData {
    root: PathBuf,
    store: Store,
    uploads: Option<Uploads>,
    codec: Box<dyn ImageCodec>,
    replicator: Box<dyn Replicator>,
    token: EngineToken,
}

impl CdnData {
    /// Boot the engine: create the root layout, run startup `fsck` with
    /// repair, and fail if any SEVERE issue remains.
    pub fn boot(
        config: &EngineConfig,
        codec: Box<dyn ImageCodec>,
        replicator: Box<dyn Replicator>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.root).map_err(|e| CdnError::io(&config.root, e))?;
        let store = Store::new(&config.root)?;
        let uploads = if config.uploader {
            Some(Uploads::new(config.root.join("uploads"))?)
        } else {
            None
        };

        let engine = Self {
            root: config.root.clone(),
            store,
            uploads,
            codec,
            replicator,
            token: Arc::new(()),
        };

        let mut issues = Vec::new();
        let mut repaired = Vec::new();
        engine.store.fsck_all(&mut issues, Some(&mut repaired))?;
        for path in &repaired {
            engine.replicator.notify(path);
        }
        if issues.iter().any(|issue| issue.severity.is_severe()) {
            tracing::error!(count = issues.len(), "startup fsck found severe issues");
            return Err(CdnError::FsckSevere { path: config.root.clone(), issues });
        }

        Ok(engine)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Re-run `fsck` at runtime, read-only (no repair).
    pub fn fsck(&self) -> Result<Vec<FsckIssue>> {
        let mut issues = Vec::new();
        self.store.fsck_all(&mut issues, None)?;
        Ok(issues)
    }

    /// Mint a staging handle for a declared content type. Fails if this
    /// peer was not configured as an uploader.
    pub fn new_upload(&self, content_type: ContentType) -> Result<UploadHandle> {
        let uploads = self
            .uploads
            .as_ref()
            .ok_or_else(|| CdnError::bad_argument(&self.root, "this peer is not configured as an uploader"))?;
        uploads.create(self.token.clone(), content_type)
    }

    /// Content-equality search followed by insertion: dedup an upload
    /// against every existing resource of the same declared type, or
    /// commit it as a new resource.
    pub fn find_or_add(&self, handle: UploadHandle) -> Result<Variant> {
        if !Arc::ptr_eq(handle.engine_token(), &self.token) {
            return Err(CdnError::bad_argument(handle.path(), "upload handle belongs to a different engine"));
        }
        if handle.is_consumed() {
            return Err(CdnError::bad_argument(handle.path(), "upload handle already consumed"));
        }
        let declared_type = handle.content_type();
        let actual_ext = handle.path().extension().and_then(|e| e.to_str()).unwrap_or_default();
        if actual_ext != declared_type.extension() {
            return Err(CdnError::bad_argument(
                handle.path(),
                format!("extension {actual_ext:?} does not match declared type {declared_type}"),
            ));
        }

        handle.mark_consumed()?;

        let metadata = fs::metadata(handle.path()).map_err(|e| CdnError::io(handle.path(), e))?;
        if !metadata.is_file() {
            let _ = handle.remove_file();
            return Err(CdnError::bad_argument(handle.path(), "upload path is not a regular file"));
        }
        let size = metadata.len();

        if let Some(sniffed) = sniff_content_type(handle.path())? {
            if sniffed != declared_type {
                let _ = handle.remove_file();
                return Err(CdnError::bad_argument(
                    handle.path(),
                    format!("sniffed content type {sniffed} contradicts declared type {declared_type}"),
                ));
            }
        }

        for resource in self.store.iterate()? {
            let resource = resource?;
            let Ok(original_type) = resource.original_content_type() else {
                continue;
            };
            if original_type != declared_type {
                continue;
            }
            if let Some(variant) = resource.find_variant_by_bytes(handle.path(), size, declared_type)? {
                let _ = handle.remove_file();
                return Ok(variant);
            }
        }

        let resource =
            self.store.add_new_resource(handle.path(), size, declared_type, self.codec.as_ref(), self.replicator.as_ref())?;
        resource.original()
    }
}

/// Best-effort signature sniff across the three supported formats, used
/// only to catch a declared type that outright contradicts the bytes.
/// `None` means "inconclusive", which `find_or_add` treats as acceptance
/// of the caller's declaration.
fn sniff_content_type(path: &Path) -> Result<Option<ContentType>> {
    let mut file = fs::File::open(path).map_err(|e| CdnError::io(path, e))?;
    let mut header = [0u8; 16];
    let read = file.read(&mut header).map_err(|e| CdnError::io(path, e))?;
    let header = &header[..read];

    if header.len() >= 8 && header[..8] == [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a] {
        return Ok(Some(ContentType::Png));
    }
    if header.len() >= 6 && (&header[0..6] == b"GIF87a" || &header[0..6] == b"GIF89a") {
        return Ok(Some(ContentType::Gif));
    }
    if header.len() >= 2 && header[0] == 0xFF && header[1] == 0xD8 {
        return Ok(Some(ContentType::Jpeg));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FakeCodec;
    use crate::replicator::RecordingReplicator;

    fn boot(dir: &Path, uploader: bool) -> CdnData {
        let mut config = EngineConfig::new(dir.to_path_buf());
        config.uploader = uploader;
        CdnData::boot(&config, Box::new(FakeCodec), Box::new(RecordingReplicator::new())).unwrap()
    }

    #[test]
    fn deposit_then_redeposit_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let engine = boot(dir.path(), true);

        let handle = engine.new_upload(ContentType::Jpeg).unwrap();
        {
            use std::io::Write;
            handle.writer().unwrap().write_all(&FakeCodec::fake_bytes(778, 584)).unwrap();
        }
        let first = engine.find_or_add(handle).unwrap();
        assert_eq!(first.filename(), "778x584.jpg");

        let second_handle = engine.new_upload(ContentType::Jpeg).unwrap();
        {
            use std::io::Write;
            second_handle.writer().unwrap().write_all(&FakeCodec::fake_bytes(778, 584)).unwrap();
        }
        let second = engine.find_or_add(second_handle).unwrap();
        assert_eq!(second.path(), first.path());
    }

    #[test]
    fn type_mismatch_is_rejected_and_upload_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let engine = boot(dir.path(), true);

        let handle = engine.new_upload(ContentType::Gif).unwrap();
        let path = handle.path().to_path_buf();
        {
            use std::io::Write;
            // Declares GIF but the extension on the staging file is .gif while
            // the bytes sniff as JPEG: a real mismatch the engine must catch.
            handle.writer().unwrap().write_all(&[0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        }
        let result = engine.find_or_add(handle);
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn non_uploader_peer_refuses_new_upload() {
        let dir = tempfile::tempdir().unwrap();
        let engine = boot(dir.path(), false);
        assert!(engine.new_upload(ContentType::Jpeg).is_err());
    }

    #[test]
    fn crash_recovery_prunes_stray_staging_on_boot() {
        let dir = tempfile::tempdir().unwrap();
        let stray = dir.path().join("resources").join("abcd").join("01234567").join("ef01.new");
        fs::create_dir_all(&stray).unwrap();
        fs::write(stray.join("0050x0050.jpg"), FakeCodec::fake_bytes(50, 50)).unwrap();

        let engine = boot(dir.path(), true);
        let issues = engine.fsck().unwrap();
        assert!(issues.iter().all(|i| !i.severity.is_severe()));
        assert!(!stray.exists());
    }
}
