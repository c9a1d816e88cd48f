//! A single committed asset: its directory, its `original.<ext>` symlink,
//! and the variants derived from it by scaling.

use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::ImageCodec;
use crate::content_type::ContentType;
use crate::error::{CdnError, Result};
use crate::fsck::{FsckIssue, RepairSet};
use crate::lock::DirectoryLock;
use crate::naming::{self, ResourceId};
use crate::replicator::Replicator;
use crate::util;
use crate::variant::Variant;

/// Which side of a `(width, height)` pair was computed proportionally
/// rather than supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutoAxis {
    Width,
    Height,
}

/// One committed, immutable asset, backed by `resources/<h1>/<h2>/<r>/`.
#[derive(Debug, Clone)]
pub struct Resource {
    id: ResourceId,
    dir: PathBuf,
}

impl Resource {
    pub(crate) fn new(id: ResourceId, dir: PathBuf) -> Self {
        Self { id, dir }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List every variant, optionally restricted to one content type.
    /// Skips `.lock`, `original.*`, and `*.new`. No locking: variants are
    /// immutable once visible.
    pub fn enumerate_variants(&self, type_filter: Option<ContentType>) -> Result<Vec<Variant>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| CdnError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| CdnError::io(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".lock" || naming::parse_original_filename(&name).is_some() || name.ends_with(".new") {
                continue;
            }
            let path = entry.path();
            let (width, height, ext) = match naming::parse_variant_filename(&name) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };
            let Some(content_type) = ContentType::by_extension(ext) else {
                continue;
            };
            if let Some(filter) = type_filter {
                if filter != content_type {
                    continue;
                }
            }
            out.push(Variant::new(path, content_type, width, height));
        }
        Ok(out)
    }

    fn original_entry(&self) -> Result<(PathBuf, String)> {
        for entry in fs::read_dir(&self.dir).map_err(|e| CdnError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| CdnError::io(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(ext) = naming::parse_original_filename(&name) {
                return Ok((entry.path(), ext.to_string()));
            }
        }
        Err(CdnError::invalid_state(&self.dir, "no original.<ext> entry present"))
    }

    /// The `ContentType` declared by the `original.<ext>` entry.
    pub fn original_content_type(&self) -> Result<ContentType> {
        let (path, ext) = self.original_entry()?;
        ContentType::by_extension(&ext)
            .ok_or_else(|| CdnError::invalid_state(&path, format!("unrecognised original extension {ext:?}")))
    }

    /// Resolve `original.<ext>`, follow the symlink, and materialise the
    /// variant it points to.
    pub fn original(&self) -> Result<Variant> {
        let (link_path, ext) = self.original_entry()?;
        let content_type = ContentType::by_extension(&ext)
            .ok_or_else(|| CdnError::invalid_state(&link_path, format!("unrecognised original extension {ext:?}")))?;
        let target = fs::read_link(&link_path).map_err(|e| CdnError::io(&link_path, e))?;
        let resolved = self.dir.join(&target);
        if !resolved.exists() {
            return Err(CdnError::not_found(&resolved, "original symlink target does not exist"));
        }
        Variant::from_parse_filename(resolved, content_type)
    }

    /// Find an existing variant of `content_type` whose bytes are identical
    /// to the file at `candidate_path`. No locking: variant files are
    /// immutable once visible.
    pub fn find_variant_by_bytes(
        &self,
        candidate_path: &Path,
        candidate_size: u64,
        content_type: ContentType,
    ) -> Result<Option<Variant>> {
        for variant in self.enumerate_variants(Some(content_type))? {
            if variant.size()? != candidate_size {
                continue;
            }
            if files_are_byte_equal(candidate_path, variant.path())? {
                return Ok(Some(variant));
            }
        }
        Ok(None)
    }

    /// Return an existing variant adequate for `(width, height)`, rendering
    /// a new one from the highest-resolution variant of `from`'s content
    /// type when none qualifies.
    pub fn scale(
        &self,
        from: &Variant,
        width: Option<u32>,
        height: Option<u32>,
        codec: &dyn ImageCodec,
        replicator: &dyn Replicator,
    ) -> Result<Variant> {
        if width.is_none() && height.is_none() {
            return Ok(from.clone());
        }

        let (mut w, mut h, auto_axis) = resolve_requested_dims(from, width, height)?;
        if w == from.width() && h == from.height() {
            return Ok(from.clone());
        }

        let lock = DirectoryLock::acquire_exclusive(&self.dir)?;
        let variants = self.enumerate_variants(Some(from.content_type()))?;

        let mut biggest: Option<Variant> = None;
        let mut exact: Option<Variant> = None;
        let mut vertical_letterbox: Option<Variant> = None;
        let mut horizontal_letterbox: Option<Variant> = None;
        for variant in &variants {
            biggest = Some(pick_biggest(biggest, variant));
            if exact.is_none() && variant.width() == w && variant.height() == h {
                exact = Some(variant.clone());
            }
            if vertical_letterbox.is_none() && variant.width() == w && variant.height() <= h {
                vertical_letterbox = Some(variant.clone());
            }
            if horizontal_letterbox.is_none() && variant.height() == h && variant.width() <= w {
                horizontal_letterbox = Some(variant.clone());
            }
        }

        if let Some(variant) = exact.or(vertical_letterbox).or(horizontal_letterbox) {
            return Ok(variant);
        }

        let biggest = biggest
            .ok_or_else(|| CdnError::invalid_state(&self.dir, "resource has no variants to scale from"))?;

        if w > biggest.width() || h > biggest.height() {
            let requested_w = w;
            let requested_h = h;
            w = w.min(biggest.width());
            h = h.min(biggest.height());
            // The auto-computed side follows whichever side was explicitly
            // given: if clamping touched the given side, the auto side is
            // forced to `biggest`'s value on its axis too, not just clamped
            // independently.
            match auto_axis {
                Some(AutoAxis::Height) if requested_w > biggest.width() => h = biggest.height(),
                Some(AutoAxis::Width) if requested_h > biggest.height() => w = biggest.width(),
                _ => {}
            }
        }

        if w == biggest.width() && h == biggest.height() {
            return Ok(biggest);
        }

        let letterbox_w = round_proportional(biggest.width() as f64 * h as f64 / biggest.height() as f64);
        let letterbox_h = round_proportional(biggest.height() as f64 * w as f64 / biggest.width() as f64);
        if letterbox_w < w && h < letterbox_h {
            w = letterbox_w;
        } else {
            h = letterbox_h;
        }

        if w > biggest.width() || h > biggest.height() {
            return Err(CdnError::bad_argument(&self.dir, "refusing to scale up past the biggest variant"));
        }

        let ext = from.content_type().extension();
        let tmp_path = self.dir.join(format!("{}.new", naming::variant_filename(w, h, ext)));
        let final_path = self.dir.join(naming::variant_filename(w, h, ext));
        let render_result = codec.scale_into(
            from.content_type(),
            biggest.path(),
            biggest.width(),
            biggest.height(),
            w,
            h,
            &tmp_path,
        );
        if let Err(e) = render_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        if let Err(e) = util::rename_file_or_copy(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        drop(lock);
        replicator.notify(&final_path);

        Ok(Variant::new(final_path, from.content_type(), w, h))
    }

    /// Verify invariants 1–3 against this resource's directory. With
    /// `repair` set (startup repair), removes stray `*.new` entries.
    pub(crate) fn fsck(&self, issues: &mut Vec<FsckIssue>, mut repair: RepairSet) -> Result<()> {
        let _lock = if repair.is_some() {
            DirectoryLock::acquire_exclusive(&self.dir)?
        } else {
            DirectoryLock::acquire_shared(&self.dir)?
        };

        let mut originals = Vec::new();
        let mut variant_entries = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| CdnError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| CdnError::io(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".lock" {
                continue;
            }
            if let Some(ext) = naming::parse_original_filename(&name) {
                originals.push((entry.path(), ext.to_string()));
                continue;
            }
            if name.ends_with(".new") {
                let path = entry.path();
                if let Some(repaired) = repair.as_deref_mut() {
                    let is_dir = entry.file_type().map_err(|e| CdnError::io(&path, e))?.is_dir();
                    let removal = if is_dir { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
                    removal.map_err(|e| CdnError::io(&path, e))?;
                    issues.push(FsckIssue::info(&path, "removed stray staging entry during startup repair"));
                    repaired.push(path);
                } else {
                    issues.push(FsckIssue::warning(&path, "stray *.new entry found"));
                }
                continue;
            }
            variant_entries.push(entry.path());
        }

        if originals.len() != 1 {
            issues.push(FsckIssue::severe(
                &self.dir,
                format!("expected exactly one original.* entry, found {}", originals.len()),
            ));
            return Ok(());
        }
        let (link_path, declared_ext) = &originals[0];
        let target = match fs::read_link(link_path) {
            Ok(target) => target,
            Err(e) => {
                issues.push(FsckIssue::severe(link_path, "original entry is not a symlink").with_cause(e.to_string()));
                return Ok(());
            }
        };
        let resolved = self.dir.join(&target);
        if !resolved.exists() {
            issues.push(FsckIssue::severe(&resolved, "original symlink target does not exist"));
            return Ok(());
        }
        let target_name = resolved.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let (original_w, original_h) = match naming::parse_variant_filename(target_name) {
            Ok((w, h, ext)) if ext == declared_ext => (w, h),
            Ok((_, _, ext)) => {
                issues.push(FsckIssue::severe(
                    &resolved,
                    format!("original target extension {ext:?} does not match link extension {declared_ext:?}"),
                ));
                return Ok(());
            }
            Err(e) => {
                issues.push(FsckIssue::severe(&resolved, format!("original target name unparseable: {e}")));
                return Ok(());
            }
        };

        for path in &variant_entries {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match naming::parse_variant_filename(name) {
                Ok((w, h, ext)) => {
                    if ContentType::by_extension(ext).is_none() {
                        issues.push(FsckIssue::severe(path, format!("unrecognised extension {ext:?}")));
                    }
                    if w > original_w || h > original_h {
                        issues.push(FsckIssue::severe(
                            path,
                            format!("variant {w}x{h} exceeds original {original_w}x{original_h}"),
                        ));
                    }
                }
                Err(e) => {
                    issues.push(FsckIssue::severe(path, format!("unparseable variant name: {e}")));
                }
            }
        }

        Ok(())
    }
}

fn resolve_requested_dims(
    from: &Variant,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<(u32, u32, Option<AutoAxis>)> {
    match (width, height) {
        (Some(w), Some(h)) => Ok((w, h, None)),
        (Some(w), None) => {
            let h = round_proportional(from.height() as f64 * w as f64 / from.width() as f64);
            Ok((w, h, Some(AutoAxis::Height)))
        }
        (None, Some(h)) => {
            let w = round_proportional(from.width() as f64 * h as f64 / from.height() as f64);
            Ok((w, h, Some(AutoAxis::Width)))
        }
        (None, None) => unreachable!("caller returns early when both dimensions are absent"),
    }
}

fn round_proportional(value: f64) -> u32 {
    value.round() as u32
}

fn pick_biggest(current: Option<Variant>, candidate: &Variant) -> Variant {
    match current {
        None => candidate.clone(),
        Some(current) => {
            let current_key = (current.width().max(current.height()), current.width(), current.height());
            let candidate_key = (candidate.width().max(candidate.height()), candidate.width(), candidate.height());
            if candidate_key > current_key {
                candidate.clone()
            } else {
                current
            }
        }
    }
}

fn files_are_byte_equal(a: &Path, b: &Path) -> Result<bool> {
    use std::io::Read;

    let mut left = std::io::BufReader::new(fs::File::open(a).map_err(|e| CdnError::io(a, e))?);
    let mut right = std::io::BufReader::new(fs::File::open(b).map_err(|e| CdnError::io(b, e))?);
    let mut left_buf = [0u8; 8192];
    let mut right_buf = [0u8; 8192];
    loop {
        let left_read = left.read(&mut left_buf).map_err(|e| CdnError::io(a, e))?;
        let right_read = right.read(&mut right_buf).map_err(|e| CdnError::io(b, e))?;
        if left_read != right_read {
            return Ok(false);
        }
        if left_read == 0 {
            return Ok(true);
        }
        if left_buf[..left_read] != right_buf[..right_read] {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FakeCodec;
    use crate::replicator::RecordingReplicator;

    fn make_resource_with_original(width: u32, height: u32) -> (tempfile::TempDir, Resource) {
        let dir = tempfile::tempdir().unwrap();
        let resource_dir = dir.path().join("r");
        fs::create_dir_all(&resource_dir).unwrap();
        let name = naming::variant_filename(width, height, "jpg");
        fs::write(resource_dir.join(&name), FakeCodec::fake_bytes(width, height)).unwrap();
        std::os::unix::fs::symlink(&name, resource_dir.join("original.jpg")).unwrap();
        (dir, Resource::new(0, resource_dir))
    }

    #[test]
    fn original_resolves_through_the_symlink() {
        let (_dir, resource) = make_resource_with_original(778, 584);
        let original = resource.original().unwrap();
        assert_eq!((original.width(), original.height()), (778, 584));
        assert_eq!(resource.original_content_type().unwrap(), ContentType::Jpeg);
    }

    #[test]
    fn scale_down_by_one_dimension_rounds_and_renders() {
        let (_dir, resource) = make_resource_with_original(778, 584);
        let original = resource.original().unwrap();
        let codec = FakeCodec;
        let replicator = RecordingReplicator::new();
        let scaled = resource.scale(&original, Some(389), None, &codec, &replicator).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (389, 292));
        assert_eq!(scaled.filename(), "389x292.jpg");
        assert_eq!(replicator.notified_paths(), vec![scaled.path().to_path_buf()]);

        // A subsequent request for the other axis must be deduplicated.
        let scaled_again = resource.scale(&original, None, Some(292), &codec, &replicator).unwrap();
        assert_eq!(scaled_again.path(), scaled.path());
    }

    #[test]
    fn scale_up_clamps_to_the_original() {
        let (_dir, resource) = make_resource_with_original(778, 584);
        let original = resource.original().unwrap();
        let codec = FakeCodec;
        let replicator = RecordingReplicator::new();
        resource.scale(&original, Some(389), None, &codec, &replicator).unwrap();

        let result = resource.scale(&original, Some(1000), Some(1000), &codec, &replicator).unwrap();
        assert_eq!(result, original);
    }

    #[test]
    fn letterbox_request_renders_a_new_variant() {
        let (_dir, resource) = make_resource_with_original(778, 584);
        let original = resource.original().unwrap();
        let codec = FakeCodec;
        let replicator = RecordingReplicator::new();
        let small = resource.scale(&original, Some(389), None, &codec, &replicator).unwrap();

        let result = resource.scale(&small, Some(1000), Some(100), &codec, &replicator).unwrap();
        assert_eq!((result.width(), result.height()), (133, 100));
    }

    #[test]
    fn disproportionate_smaller_request_renders_correct_size() {
        let (_dir, resource) = make_resource_with_original(778, 584);
        let original = resource.original().unwrap();
        let codec = FakeCodec;
        let replicator = RecordingReplicator::new();
        let small = resource.scale(&original, Some(389), None, &codec, &replicator).unwrap();

        let result = resource.scale(&small, Some(100), Some(1000), &codec, &replicator).unwrap();
        assert_eq!((result.width(), result.height()), (100, 75));
    }

    #[test]
    fn clamping_the_given_side_also_forces_the_auto_side_to_biggest() {
        // biggest = 800x600 (the original); `from` is a 700x50 variant
        // already present on disk (an off-aspect-ratio variant, as could
        // arise from an earlier disproportionate request). Requesting
        // scale(from, Some(2000), None) clamps width (2000 > 800), so
        // height must collapse to biggest's 600, not to
        // round(50 * 2000 / 700) = 143.
        let (_dir, resource) = make_resource_with_original(800, 600);
        let original = resource.original().unwrap();
        let narrow_name = naming::variant_filename(700, 50, "jpg");
        fs::write(resource.dir().join(&narrow_name), FakeCodec::fake_bytes(700, 50)).unwrap();
        let narrow = Variant::new(resource.dir().join(&narrow_name), ContentType::Jpeg, 700, 50);
        let codec = FakeCodec;
        let replicator = RecordingReplicator::new();

        let result = resource.scale(&narrow, Some(2000), None, &codec, &replicator).unwrap();
        assert_eq!((result.width(), result.height()), (800, 600));
        assert_eq!(result, original);
    }

    #[test]
    fn fsck_reports_severe_when_variant_exceeds_original() {
        let (_dir, resource) = make_resource_with_original(100, 100);
        fs::write(resource.dir().join("200x200.jpg"), FakeCodec::fake_bytes(200, 200)).unwrap();
        let mut issues = Vec::new();
        resource.fsck(&mut issues, None).unwrap();
        assert!(issues.iter().any(|i| i.severity.is_severe()));
    }

    #[test]
    fn fsck_repairs_stray_new_entries() {
        let (_dir, resource) = make_resource_with_original(100, 100);
        fs::create_dir_all(resource.dir().join("0050x0050.jpg.new")).unwrap();
        let mut issues = Vec::new();
        let mut repaired = Vec::new();
        resource.fsck(&mut issues, Some(&mut repaired)).unwrap();
        assert!(!resource.dir().join("0050x0050.jpg.new").exists());
        assert_eq!(repaired.len(), 1);
        assert!(issues.iter().all(|i| !i.severity.is_severe()));
    }
}
