//! Allocates identifiers, runs the add-new-resource protocol, iterates the
//! committed tree, and performs `fsck` over the whole hash hierarchy.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::RngCore;

use crate::content_type::ContentType;
use crate::error::{CdnError, Result};
use crate::fsck::{FsckIssue, RepairSet};
use crate::lock::DirectoryLock;
use crate::naming::{self, ResourceId};
use crate::replicator::Replicator;
use crate::resource::Resource;
use crate::util;
use crate::variant::Variant;

const RESOURCES_DIR_NAME: &str = "resources";

/// The `resources/` hash tree: every committed [`Resource`] lives under it.
pub struct Store {
    root: PathBuf,
    allocation_lock: Mutex<()>,
}

impl Store {
    /// Create `root/resources` if absent and return a handle to it.
    pub fn new(root: &Path) -> Result<Self> {
        let dir = root.join(RESOURCES_DIR_NAME);
        fs::create_dir_all(&dir).map_err(|e| CdnError::io(&dir, e))?;
        Ok(Self { root: dir, allocation_lock: Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    fn resource_dir(&self, id: ResourceId) -> PathBuf {
        self.root.join(naming::hash1_dir(id)).join(naming::hash2_dir(id)).join(naming::resource_dir(id))
    }

    /// Resolve an identifier to a committed [`Resource`], if it exists.
    pub fn lookup(&self, id: ResourceId) -> Result<Option<Resource>> {
        let hash1 = self.root.join(naming::hash1_dir(id));
        if !dir_exists(&hash1)? {
            return Ok(None);
        }
        let hash2 = hash1.join(naming::hash2_dir(id));
        if !dir_exists(&hash2)? {
            return Ok(None);
        }
        let resource_dir = hash2.join(naming::resource_dir(id));
        if !dir_exists(&resource_dir)? {
            return Ok(None);
        }
        Ok(Some(Resource::new(id, resource_dir)))
    }

    /// Commit `candidate_path` (already known to be `candidate_size` bytes
    /// and of `declared_type`) as a brand-new resource.
    pub fn add_new_resource(
        &self,
        candidate_path: &Path,
        candidate_size: u64,
        declared_type: ContentType,
        codec: &dyn crate::codec::ImageCodec,
        replicator: &dyn Replicator,
    ) -> Result<Resource> {
        let root_lock = DirectoryLock::acquire_exclusive(&self.root)?;

        let (id, staging_dir, sync_path) = self.claim_identifier()?;

        let variant = Variant::from_read_file(candidate_path.to_path_buf(), declared_type, codec)?;
        let canonical_name = naming::variant_filename(variant.width(), variant.height(), declared_type.extension());
        let staged_file = staging_dir.join(&canonical_name);
        util::rename_file_or_copy(candidate_path, &staged_file)?;

        let link_name = naming::original_filename(declared_type.extension());
        std::os::unix::fs::symlink(&canonical_name, staging_dir.join(&link_name))
            .map_err(|e| CdnError::io(staging_dir.join(&link_name), e))?;

        let committed_size = fs::metadata(&staged_file).map_err(|e| CdnError::io(&staged_file, e))?.len();
        if committed_size != candidate_size {
            return Err(CdnError::concurrent_modification(
                &staged_file,
                format!("expected {candidate_size} bytes, found {committed_size} after staging"),
            ));
        }

        let final_dir = self.resource_dir(id);
        util::rename_dir_or_copy(&staging_dir, &final_dir)?;

        drop(root_lock);
        replicator.notify(&sync_path);

        Ok(Resource::new(id, final_dir))
    }

    /// Draw a fresh identifier, reserving its staging directory. Returns the
    /// identifier, the created `<resource>.new` directory, and the highest
    /// ancestor path that was newly created (for replication).
    fn claim_identifier(&self) -> Result<(ResourceId, PathBuf, PathBuf)> {
        let _guard = self.allocation_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            let id: ResourceId = rand::thread_rng().next_u64();
            let hash1_dir = self.root.join(naming::hash1_dir(id));
            let hash2_dir = hash1_dir.join(naming::hash2_dir(id));
            let resource_name = naming::resource_dir(id);
            let resource_dir = hash2_dir.join(&resource_name);
            let staging_dir = hash2_dir.join(naming::new_resource_dir_name(&resource_name));

            let mut sync_path = None;

            match fs::symlink_metadata(&hash1_dir) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    tracing::warn!(path = %hash1_dir.display(), "hash1 entry is not a directory, retrying");
                    continue;
                }
                Err(_) => {
                    fs::create_dir(&hash1_dir).map_err(|e| CdnError::io(&hash1_dir, e))?;
                    sync_path = Some(hash1_dir.clone());
                }
            }

            match fs::symlink_metadata(&hash2_dir) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    tracing::warn!(path = %hash2_dir.display(), "hash2 entry is not a directory, retrying");
                    continue;
                }
                Err(_) => {
                    fs::create_dir(&hash2_dir).map_err(|e| CdnError::io(&hash2_dir, e))?;
                    if sync_path.is_none() {
                        sync_path = Some(hash2_dir.clone());
                    }
                }
            }

            if resource_dir.exists() || staging_dir.exists() {
                tracing::info!(id = format_args!("{:016x}", id), "identifier already claimed, retrying");
                continue;
            }

            fs::create_dir(&staging_dir).map_err(|e| CdnError::io(&staging_dir, e))?;
            let sync_path = sync_path.unwrap_or_else(|| resource_dir.clone());

            return Ok((id, staging_dir, sync_path));
        }
    }

    /// Lazily walk every committed resource. Skips `.lock`, non-directories,
    /// `*.new` staging entries, and unparseable names (each logged at
    /// WARNING). Order is filesystem-dependent.
    ///
    /// Pull-based: each directory level is opened as a `ReadDir` handle and
    /// consumed entry-by-entry rather than collected up front, so only one
    /// handle per hash level is open at a time as the caller drives the
    /// iterator.
    pub fn iterate(&self) -> Result<impl Iterator<Item = Result<Resource>> + '_> {
        let hash1_iter = fs::read_dir(&self.root).map_err(|e| CdnError::io(&self.root, e))?;
        Ok(hash1_iter.flat_map(move |hash1_entry| -> Box<dyn Iterator<Item = Result<Resource>>> {
            let hash1_entry = match hash1_entry {
                Ok(entry) => entry,
                Err(e) => return Box::new(std::iter::once(Err(CdnError::io(&self.root, e)))),
            };
            let hash1_name = hash1_entry.file_name().to_string_lossy().into_owned();
            if hash1_name == ".lock" {
                return Box::new(std::iter::empty());
            }
            let hash1_path = hash1_entry.path();
            let hash1_value = match naming::parse_hash1(&hash1_name) {
                Ok(value) => value,
                Err(_) => {
                    tracing::warn!(name = %hash1_name, "unparseable hash1 entry, skipping");
                    return Box::new(std::iter::empty());
                }
            };
            match hash1_entry.file_type() {
                Ok(ft) if ft.is_dir() => {}
                Ok(_) => return Box::new(std::iter::empty()),
                Err(e) => return Box::new(std::iter::once(Err(CdnError::io(&hash1_path, e)))),
            }

            let hash2_iter = match fs::read_dir(&hash1_path) {
                Ok(iter) => iter,
                Err(e) => return Box::new(std::iter::once(Err(CdnError::io(&hash1_path, e)))),
            };

            Box::new(hash2_iter.flat_map(move |hash2_entry| -> Box<dyn Iterator<Item = Result<Resource>>> {
                let hash1_path = hash1_path.clone();
                let hash2_entry = match hash2_entry {
                    Ok(entry) => entry,
                    Err(e) => return Box::new(std::iter::once(Err(CdnError::io(&hash1_path, e)))),
                };
                let hash2_name = hash2_entry.file_name().to_string_lossy().into_owned();
                let hash2_value = match naming::parse_hash2(&hash2_name) {
                    Ok(value) => value,
                    Err(_) => {
                        tracing::warn!(name = %hash2_name, "unparseable hash2 entry, skipping");
                        return Box::new(std::iter::empty());
                    }
                };
                let hash2_path = hash2_entry.path();
                match hash2_entry.file_type() {
                    Ok(ft) if ft.is_dir() => {}
                    Ok(_) => return Box::new(std::iter::empty()),
                    Err(e) => return Box::new(std::iter::once(Err(CdnError::io(&hash2_path, e)))),
                }

                let resource_iter = match fs::read_dir(&hash2_path) {
                    Ok(iter) => iter,
                    Err(e) => return Box::new(std::iter::once(Err(CdnError::io(&hash2_path, e)))),
                };

                Box::new(resource_iter.filter_map(move |resource_entry| {
                    let hash2_path = hash2_path.clone();
                    let resource_entry = match resource_entry {
                        Ok(entry) => entry,
                        Err(e) => return Some(Err(CdnError::io(&hash2_path, e))),
                    };
                    let resource_name = resource_entry.file_name().to_string_lossy().into_owned();
                    if naming::is_new_resource_dir_name(&resource_name) {
                        return None;
                    }
                    let resource_value = match naming::parse_resource(&resource_name) {
                        Ok(value) => value,
                        Err(_) => {
                            tracing::warn!(name = %resource_name, "unparseable resource entry, skipping");
                            return None;
                        }
                    };
                    match resource_entry.file_type() {
                        Ok(ft) if ft.is_dir() => {}
                        _ => return None,
                    }
                    let resource_path = resource_entry.path();
                    let id = (hash1_value << 48) | (hash2_value << 16) | resource_value;
                    Some(Ok(Resource::new(id, resource_path)))
                }))
            }))
        }))
    }

    /// Verify invariant 4 and recurse into every [`Resource::fsck`]. With
    /// `repair` set, empty hash directories are pruned.
    pub(crate) fn fsck_all(&self, issues: &mut Vec<FsckIssue>, mut repair: RepairSet) -> Result<()> {
        let _lock = if repair.is_some() {
            DirectoryLock::acquire_exclusive(&self.root)?
        } else {
            DirectoryLock::acquire_shared(&self.root)?
        };

        for hash1_name in read_dir_names(&self.root)? {
            if hash1_name == ".lock" {
                continue;
            }
            let hash1_path = self.root.join(&hash1_name);
            if naming::parse_hash1(&hash1_name).is_err() {
                issues.push(FsckIssue::severe(&hash1_path, "hash1 entry name is not valid hex"));
                continue;
            }
            if !hash1_path.is_dir() {
                issues.push(FsckIssue::severe(&hash1_path, "hash1 entry is not a directory"));
                continue;
            }

            let mut hash1_children = 0usize;
            for hash2_name in read_dir_names(&hash1_path)? {
                let hash2_path = hash1_path.join(&hash2_name);
                if naming::parse_hash2(&hash2_name).is_err() {
                    issues.push(FsckIssue::severe(&hash2_path, "hash2 entry name is not valid hex"));
                    continue;
                }
                if !hash2_path.is_dir() {
                    issues.push(FsckIssue::severe(&hash2_path, "hash2 entry is not a directory"));
                    continue;
                }

                let mut hash2_children = 0usize;
                for resource_name in read_dir_names(&hash2_path)? {
                    let resource_path = hash2_path.join(&resource_name);
                    if naming::is_new_resource_dir_name(&resource_name) {
                        if let Some(repaired) = repair.as_deref_mut() {
                            fs::remove_dir_all(&resource_path).map_err(|e| CdnError::io(&resource_path, e))?;
                            issues.push(FsckIssue::info(&resource_path, "removed stray staging directory"));
                            repaired.push(resource_path);
                        } else {
                            issues.push(FsckIssue::warning(&resource_path, "stray *.new directory found"));
                            hash2_children += 1;
                        }
                        continue;
                    }
                    if naming::parse_resource(&resource_name).is_err() {
                        issues.push(FsckIssue::severe(&resource_path, "resource entry name is not valid hex"));
                        hash2_children += 1;
                        continue;
                    }
                    hash2_children += 1;
                    let resource = Resource::new(0, resource_path);
                    resource.fsck(issues, repair.as_deref_mut())?;
                }

                if hash2_children == 0 {
                    if let Some(repaired) = repair.as_deref_mut() {
                        fs::remove_dir(&hash2_path).map_err(|e| CdnError::io(&hash2_path, e))?;
                        issues.push(FsckIssue::info(&hash2_path, "pruned empty hash2 directory"));
                        repaired.push(hash2_path);
                        continue;
                    }
                }
                hash1_children += 1;
            }

            if hash1_children == 0 {
                if let Some(repaired) = repair.as_deref_mut() {
                    fs::remove_dir(&hash1_path).map_err(|e| CdnError::io(&hash1_path, e))?;
                    issues.push(FsckIssue::info(&hash1_path, "pruned empty hash1 directory"));
                    repaired.push(hash1_path);
                }
            }
        }

        Ok(())
    }
}

fn dir_exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(true),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "expected a directory, found something else");
            Ok(false)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CdnError::io(path, e)),
    }
}

fn read_dir_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| CdnError::io(dir, e))? {
        let entry = entry.map_err(|e| CdnError::io(dir, e))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FakeCodec;
    use crate::replicator::RecordingReplicator;

    fn write_candidate(dir: &Path, width: u32, height: u32) -> PathBuf {
        let path = dir.join("candidate.jpg");
        fs::write(&path, FakeCodec::fake_bytes(width, height)).unwrap();
        path
    }

    #[test]
    fn add_new_resource_commits_and_is_looked_up() {
        let root = tempfile::tempdir().unwrap();
        let store = Store::new(root.path()).unwrap();
        let codec = FakeCodec;
        let replicator = RecordingReplicator::new();
        let candidate = write_candidate(root.path(), 778, 584);
        let size = fs::metadata(&candidate).unwrap().len();

        let resource = store.add_new_resource(&candidate, size, ContentType::Jpeg, &codec, &replicator).unwrap();
        assert_eq!(resource.original().unwrap().filename(), "778x584.jpg");
        assert!(!candidate.exists());

        let found = store.lookup(resource.id()).unwrap().expect("resource should be found");
        assert_eq!(found.dir(), resource.dir());
        assert_eq!(replicator.notified_paths().len(), 1);
    }

    #[test]
    fn lookup_of_unknown_identifier_is_none() {
        let root = tempfile::tempdir().unwrap();
        let store = Store::new(root.path()).unwrap();
        assert!(store.lookup(0xdead_beef_cafe_f00d).unwrap().is_none());
    }

    #[test]
    fn iterate_visits_every_committed_resource_once() {
        let root = tempfile::tempdir().unwrap();
        let store = Store::new(root.path()).unwrap();
        let codec = FakeCodec;
        let replicator = RecordingReplicator::new();
        for (w, h) in [(778, 584), (100, 100), (50, 50)] {
            let candidate = write_candidate(root.path(), w, h);
            let size = fs::metadata(&candidate).unwrap().len();
            store.add_new_resource(&candidate, size, ContentType::Jpeg, &codec, &replicator).unwrap();
        }
        let ids: Vec<_> = store.iterate().unwrap().map(|r| r.unwrap().id()).collect();
        assert_eq!(ids.len(), 3);
        let mut unique = ids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn fsck_all_prunes_stray_staging_and_empty_directories() {
        let root = tempfile::tempdir().unwrap();
        let store = Store::new(root.path()).unwrap();
        let stray = store.dir().join("abcd").join("01234567").join("ef01.new");
        fs::create_dir_all(&stray).unwrap();
        fs::write(stray.join("0050x0050.jpg"), FakeCodec::fake_bytes(50, 50)).unwrap();

        let mut issues = Vec::new();
        let mut repaired = Vec::new();
        store.fsck_all(&mut issues, Some(&mut repaired)).unwrap();

        assert!(!store.dir().join("abcd").exists());
        assert!(issues.iter().all(|i| !i.severity.is_severe()));
    }
}
