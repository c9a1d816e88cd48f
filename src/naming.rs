//! Pure functions over 64-bit resource identifiers, hex directory names, and
//! variant filenames. Nothing here touches the filesystem.

use std::fmt;

/// A committed resource's identifier: a 64-bit value split across three hex
/// directory levels, high bits first.
pub type ResourceId = u64;

/// Width, in hex characters, of the `hash1` directory (high 16 bits).
pub const HASH1_HEX: usize = 4;
/// Width, in hex characters, of the `hash2` directory (middle 32 bits).
pub const HASH2_HEX: usize = 8;
/// Width, in hex characters, of the `resource` directory (low 16 bits).
pub const RESOURCE_HEX: usize = 4;

const NEW_SUFFIX: &str = "new";

/// A string failed to parse as a hex identifier, directory name, or variant
/// filename. Kept distinct from [`crate::error::CdnError`] so callers that
/// walk untrusted directory entries (fsck, `Store::iterate`) can choose
/// whether a parse failure is a WARNING or a hard error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingError(pub String);

impl fmt::Display for NamingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NamingError {}

fn lower_hex(value: u64, width: usize) -> String {
    format!("{value:0width$x}", width = width)
}

/// Render the high 16 bits of `id` as 4 lower-case hex characters.
pub fn hash1_dir(id: ResourceId) -> String {
    lower_hex(id >> 48, HASH1_HEX)
}

/// Render the middle 32 bits of `id` as 8 lower-case hex characters.
pub fn hash2_dir(id: ResourceId) -> String {
    lower_hex((id >> 16) & 0xFFFF_FFFF, HASH2_HEX)
}

/// Render the low 16 bits of `id` as 4 lower-case hex characters.
pub fn resource_dir(id: ResourceId) -> String {
    lower_hex(id & 0xFFFF, RESOURCE_HEX)
}

/// Render `id` as the canonical 16-character lower-case hex string
/// (`hash1 ++ hash2 ++ resource`).
pub fn format_id(id: ResourceId) -> String {
    format!("{}{}{}", hash1_dir(id), hash2_dir(id), resource_dir(id))
}

/// Parse a string as exactly `len` lower-case hex digits. Upper-case `A-F`,
/// wrong length, or any non-hex byte is rejected: case-insensitive
/// filesystems would otherwise mis-route a directory lookup.
fn parse_hex_exact(s: &str, len: usize) -> Result<u64, NamingError> {
    if s.len() != len {
        return Err(NamingError(format!(
            "expected {len} lower-case hex characters, got {:?}",
            s
        )));
    }
    if !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(NamingError(format!("{s:?} is not lower-case hex")));
    }
    u64::from_str_radix(s, 16).map_err(|e| NamingError(e.to_string()))
}

/// Parse the `hash1` directory name component.
pub fn parse_hash1(s: &str) -> Result<u64, NamingError> {
    parse_hex_exact(s, HASH1_HEX)
}

/// Parse the `hash2` directory name component.
pub fn parse_hash2(s: &str) -> Result<u64, NamingError> {
    parse_hex_exact(s, HASH2_HEX)
}

/// Parse the `resource` directory name component.
pub fn parse_resource(s: &str) -> Result<u64, NamingError> {
    parse_hex_exact(s, RESOURCE_HEX)
}

/// Recompose a [`ResourceId`] from its three already-parsed directory name
/// components.
pub fn compose_id(hash1: &str, hash2: &str, resource: &str) -> Result<ResourceId, NamingError> {
    let hash1 = parse_hash1(hash1)?;
    let hash2 = parse_hash2(hash2)?;
    let resource = parse_resource(resource)?;
    Ok((hash1 << 48) | (hash2 << 16) | resource)
}

/// Parse the full 16-character canonical identifier string.
pub fn parse_id(s: &str) -> Result<ResourceId, NamingError> {
    if s.len() != HASH1_HEX + HASH2_HEX + RESOURCE_HEX {
        return Err(NamingError(format!("{s:?} is not a 16-character resource id")));
    }
    let (hash1, rest) = s.split_at(HASH1_HEX);
    let (hash2, resource) = rest.split_at(HASH2_HEX);
    compose_id(hash1, hash2, resource)
}

/// The transient staging directory name for a not-yet-committed resource.
pub fn new_resource_dir_name(resource: &str) -> String {
    format!("{resource}.{NEW_SUFFIX}")
}

/// True iff `s` is a staging directory name: `<resource-hex>.new`.
pub fn is_new_resource_dir_name(s: &str) -> bool {
    if s.len() != RESOURCE_HEX + 1 + NEW_SUFFIX.len() {
        return false;
    }
    match s.split_once('.') {
        Some((hex, NEW_SUFFIX)) => parse_resource(hex).is_ok(),
        _ => false,
    }
}

/// The `original.<ext>` symlink name for a given extension.
pub fn original_filename(ext: &str) -> String {
    format!("original.{ext}")
}

/// If `name` matches `original.<ext>`, return the extension.
pub fn parse_original_filename(name: &str) -> Option<&str> {
    name.strip_prefix("original.").filter(|ext| !ext.is_empty())
}

/// The canonical `<w>x<h>.<ext>` filename for a variant.
pub fn variant_filename(width: u32, height: u32, ext: &str) -> String {
    format!("{width}x{height}.{ext}")
}

/// Parse a variant filename into `(width, height, extension)`. Rejects
/// non-canonical integers (leading zeros, `+`/`-` signs, anything that does
/// not round-trip through `to_string`) and zero-valued dimensions.
pub fn parse_variant_filename(name: &str) -> Result<(u32, u32, &str), NamingError> {
    let (dims, ext) = name
        .split_once('.')
        .ok_or_else(|| NamingError(format!("{name:?} has no extension")))?;
    if ext.is_empty() {
        return Err(NamingError(format!("{name:?} has an empty extension")));
    }
    let (w, h) = dims
        .split_once('x')
        .ok_or_else(|| NamingError(format!("{name:?} is not <w>x<h>.<ext>")))?;
    let width = parse_canonical_u32(w).ok_or_else(|| NamingError(format!("bad width in {name:?}")))?;
    let height =
        parse_canonical_u32(h).ok_or_else(|| NamingError(format!("bad height in {name:?}")))?;
    if width < 1 || height < 1 {
        return Err(NamingError(format!("{name:?} has a zero dimension")));
    }
    Ok((width, height, ext))
}

fn parse_canonical_u32(s: &str) -> Option<u32> {
    let value: u32 = s.parse().ok()?;
    if value.to_string() == s {
        Some(value)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_then_parse_round_trips() {
        let ids = [0u64, 1, u64::MAX, 0x1234_5678_9abc_def0, 0xffff_0000_ffff_0000];
        for &id in &ids {
            let formatted = format_id(id);
            assert_eq!(formatted.len(), 16);
            assert_eq!(parse_id(&formatted).unwrap(), id);
        }
    }

    #[test]
    fn sub_fields_reassemble_by_or() {
        let id = 0x1234_5678_9abc_def0u64;
        let hash1 = parse_hash1(&hash1_dir(id)).unwrap();
        let hash2 = parse_hash2(&hash2_dir(id)).unwrap();
        let resource = parse_resource(&resource_dir(id)).unwrap();
        assert_eq!((hash1 << 48) | (hash2 << 16) | resource, id);
    }

    #[test]
    fn rejects_upper_case_hex() {
        assert!(parse_id("ABCD12345678EF01").is_err());
        assert!(parse_hash1("ABCD").is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(parse_hash1("abc").is_err());
        assert!(parse_hash1("abcde").is_err());
        assert!(parse_id("abcd12345678ef0").is_err());
    }

    #[test]
    fn rejects_non_hex_characters() {
        assert!(parse_hash2("1234567g").is_err());
    }

    #[test]
    fn new_resource_dir_name_roundtrips() {
        let name = new_resource_dir_name("ab12");
        assert_eq!(name, "ab12.new");
        assert!(is_new_resource_dir_name(&name));
        assert!(!is_new_resource_dir_name("ab12"));
        assert!(!is_new_resource_dir_name("AB12.new"));
        assert!(!is_new_resource_dir_name("ab12.newx"));
    }

    #[test]
    fn variant_filename_round_trip() {
        let name = variant_filename(389, 292, "jpg");
        assert_eq!(name, "389x292.jpg");
        let (w, h, ext) = parse_variant_filename(&name).unwrap();
        assert_eq!((w, h, ext), (389, 292, "jpg"));
    }

    #[test]
    fn variant_filename_rejects_non_canonical_integers() {
        assert!(parse_variant_filename("0389x292.jpg").is_err());
        assert!(parse_variant_filename("389x0292.jpg").is_err());
        assert!(parse_variant_filename("0x100.png").is_err());
        assert!(parse_variant_filename("-1x100.png").is_err());
    }

    #[test]
    fn original_filename_parses_extension() {
        assert_eq!(parse_original_filename("original.jpg"), Some("jpg"));
        assert_eq!(parse_original_filename("original."), None);
        assert_eq!(parse_original_filename("389x292.jpg"), None);
    }
}
