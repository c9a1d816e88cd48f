//! Closed enumeration of the media types this engine stores.

use std::fmt;

/// One of the media types the engine accepts for deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Jpeg,
    Png,
    Gif,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::Jpeg, ContentType::Png, ContentType::Gif];

    /// Lower-case file extension, e.g. `"jpg"`.
    pub fn extension(self) -> &'static str {
        match self {
            ContentType::Jpeg => "jpg",
            ContentType::Png => "png",
            ContentType::Gif => "gif",
        }
    }

    /// Canonical MIME type, e.g. `"image/jpeg"`.
    pub fn mime(self) -> &'static str {
        match self {
            ContentType::Jpeg => "image/jpeg",
            ContentType::Png => "image/png",
            ContentType::Gif => "image/gif",
        }
    }

    /// Look up by extension. Case-sensitive: extensions on disk are always
    /// lower-case by construction.
    pub fn by_extension(ext: &str) -> Option<ContentType> {
        ContentType::ALL.into_iter().find(|ct| ct.extension() == ext)
    }

    /// Look up by MIME type. Case-insensitive, and strips any `;parameter`
    /// tail (e.g. `"image/jpeg; charset=binary"`).
    pub fn by_mime(mime: &str) -> Option<ContentType> {
        let base = mime.split(';').next().unwrap_or(mime).trim();
        ContentType::ALL
            .into_iter()
            .find(|ct| ct.mime().eq_ignore_ascii_case(base))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime())
    }
}
