//! A single concrete file representing a resource at one `(width, height)`.

use std::path::{Path, PathBuf};

use crate::content_type::ContentType;
use crate::error::{CdnError, Result};
use crate::naming;

/// One variant (the original, or a derived scaled copy) of a [`crate::resource::Resource`].
/// Variants are immutable once they exist on disk; equality is path equality.
#[derive(Debug, Clone)]
pub struct Variant {
    path: PathBuf,
    content_type: ContentType,
    width: u32,
    height: u32,
}

impl Variant {
    pub(crate) fn new(path: PathBuf, content_type: ContentType, width: u32, height: u32) -> Self {
        Self { path, content_type, width, height }
    }

    /// Materialise a variant by probing the decoded image for its
    /// dimensions (`createVariantByReadFile`).
    pub(crate) fn from_read_file(
        path: PathBuf,
        content_type: ContentType,
        codec: &dyn crate::codec::ImageCodec,
    ) -> Result<Self> {
        let (width, height) = codec.decode_dimensions(content_type, &path)?;
        Ok(Self::new(path, content_type, width, height))
    }

    /// Materialise a variant by parsing its `<w>x<h>` filename prefix, with
    /// no decode at all (`createVariantByParseFilename`).
    pub(crate) fn from_parse_filename(path: PathBuf, content_type: ContentType) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CdnError::invalid_state(&path, "variant path has no filename"))?;
        let (width, height, ext) = naming::parse_variant_filename(name)
            .map_err(|e| CdnError::invalid_state(&path, e.to_string()))?;
        if ext != content_type.extension() {
            return Err(CdnError::invalid_state(
                &path,
                format!("extension {ext} does not match declared content type {content_type}"),
            ));
        }
        Ok(Self::new(path, content_type, width, height))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The canonical `<w>x<h>.<ext>` filename for this variant.
    pub fn filename(&self) -> String {
        naming::variant_filename(self.width, self.height, self.content_type.extension())
    }

    /// Size in bytes of the backing file.
    pub fn size(&self) -> Result<u64> {
        std::fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| CdnError::io(&self.path, e))
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Variant {}
