//! The image-decode/encode backend is an external collaborator: this module
//! only defines the seam it plugs into (`ImageCodec`), plus a dependency-free
//! default that can read dimensions out of JPEG/PNG/GIF headers without
//! decoding any pixels.

use std::path::Path;

use crate::content_type::ContentType;
use crate::error::{CdnError, Result};

/// Injection point for dimension probing and pixel resampling. Real decode
/// and bicubic-equivalent resampling live behind this trait so the core
/// never depends on a full image-codec crate.
pub trait ImageCodec: Send + Sync {
    /// Decode enough of `path` to learn its pixel dimensions, without
    /// necessarily decoding full pixel data.
    fn decode_dimensions(&self, content_type: ContentType, path: &Path) -> Result<(u32, u32)>;

    /// Render `src` (known to be `src_width x src_height`) into a new file
    /// at `dst` sized `width x height`. Implementations must refuse to
    /// upscale; the core already enforces `width <= src_width && height <=
    /// src_height` before calling this, but a defensive implementation
    /// should too.
    fn scale_into(
        &self,
        content_type: ContentType,
        src: &Path,
        src_width: u32,
        src_height: u32,
        width: u32,
        height: u32,
        dst: &Path,
    ) -> Result<()>;
}

/// Reads native dimension fields directly out of JPEG/PNG/GIF headers.
/// `scale_into` is only available when the `image-codec` feature pulls in a
/// real resampler; without it, callers must supply their own [`ImageCodec`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderProbeCodec;

impl ImageCodec for HeaderProbeCodec {
    fn decode_dimensions(&self, content_type: ContentType, path: &Path) -> Result<(u32, u32)> {
        let bytes = std::fs::read(path).map_err(|e| CdnError::io(path, e))?;
        match content_type {
            ContentType::Png => png_dimensions(&bytes),
            ContentType::Gif => gif_dimensions(&bytes),
            ContentType::Jpeg => jpeg_dimensions(&bytes),
        }
        .ok_or_else(|| {
            CdnError::bad_argument(path, format!("could not read {content_type} dimensions"))
        })
    }

    #[cfg_attr(not(feature = "image-codec"), allow(unused_variables))]
    fn scale_into(
        &self,
        content_type: ContentType,
        src: &Path,
        src_width: u32,
        src_height: u32,
        width: u32,
        height: u32,
        dst: &Path,
    ) -> Result<()> {
        #[cfg(feature = "image-codec")]
        {
            image_crate_scale_into(content_type, src, width, height, dst)
        }
        #[cfg(not(feature = "image-codec"))]
        {
            let _ = (src_width, src_height);
            Err(CdnError::bad_argument(
                dst,
                "no image codec available: enable the `image-codec` feature or supply a custom ImageCodec",
            ))
        }
    }
}

#[cfg(feature = "image-codec")]
fn image_crate_scale_into(
    content_type: ContentType,
    src: &Path,
    width: u32,
    height: u32,
    dst: &Path,
) -> Result<()> {
    let image = image::open(src).map_err(|e| CdnError::bad_argument(src, e.to_string()))?;
    let scaled = image.resize_exact(width, height, image::imageops::FilterType::Lanczos3);
    let format = match content_type {
        ContentType::Jpeg => image::ImageFormat::Jpeg,
        ContentType::Png => image::ImageFormat::Png,
        ContentType::Gif => image::ImageFormat::Gif,
    };
    scaled
        .save_with_format(dst, format)
        .map_err(|e| CdnError::io(dst, std::io::Error::new(std::io::ErrorKind::Other, e)))
}

fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
    if bytes.len() < 24 || bytes[..8] != SIGNATURE {
        return None;
    }
    // IHDR is always the first chunk: length(4) type(4) width(4) height(4) ...
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some((width, height))
}

fn gif_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 10 || (&bytes[0..6] != b"GIF87a" && &bytes[0..6] != b"GIF89a") {
        return None;
    }
    let width = u16::from_le_bytes(bytes[6..8].try_into().ok()?) as u32;
    let height = u16::from_le_bytes(bytes[8..10].try_into().ok()?) as u32;
    Some((width, height))
}

fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut offset = 2usize;
    while offset + 4 <= bytes.len() {
        if bytes[offset] != 0xFF {
            offset += 1;
            continue;
        }
        let marker = bytes[offset + 1];
        // Standalone markers carry no length field.
        if marker == 0xD8 || marker == 0xD9 || (0xD0..=0xD7).contains(&marker) {
            offset += 2;
            continue;
        }
        let segment_len = u16::from_be_bytes(bytes[offset + 2..offset + 4].try_into().ok()?) as usize;
        let is_sof = matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF);
        if is_sof {
            if offset + 9 > bytes.len() {
                return None;
            }
            let height = u16::from_be_bytes(bytes[offset + 5..offset + 7].try_into().ok()?) as u32;
            let width = u16::from_be_bytes(bytes[offset + 7..offset + 9].try_into().ok()?) as u32;
            return Some((width, height));
        }
        if marker == 0xDA {
            // Start of scan: no more headers before compressed data.
            return None;
        }
        offset += 2 + segment_len;
    }
    None
}

/// In-memory fake codec for tests: fabricates deterministic, content-free
/// bytes tagged with their own dimensions, so the scaling algorithm's
/// branch logic can be exercised without any real image data.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeCodec;

impl FakeCodec {
    /// Build fake "image bytes" for a `width x height` image: just the
    /// dimensions repeated, padded to a deterministic size. `decode_dimensions`
    /// parses this same encoding back out.
    pub fn fake_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = format!("FAKE{width}x{height}\n").into_bytes();
        bytes.resize(64, b'.');
        bytes
    }
}

impl ImageCodec for FakeCodec {
    fn decode_dimensions(&self, _content_type: ContentType, path: &Path) -> Result<(u32, u32)> {
        let bytes = std::fs::read(path).map_err(|e| CdnError::io(path, e))?;
        let text = String::from_utf8_lossy(&bytes);
        let header = text.lines().next().unwrap_or_default();
        let dims = header
            .strip_prefix("FAKE")
            .ok_or_else(|| CdnError::bad_argument(path, "not a FakeCodec image"))?;
        let (w, h) = dims
            .split_once('x')
            .ok_or_else(|| CdnError::bad_argument(path, "malformed FakeCodec image"))?;
        let width: u32 = w.parse().map_err(|_| CdnError::bad_argument(path, "bad width"))?;
        let height: u32 = h.parse().map_err(|_| CdnError::bad_argument(path, "bad height"))?;
        Ok((width, height))
    }

    fn scale_into(
        &self,
        _content_type: ContentType,
        _src: &Path,
        _src_width: u32,
        _src_height: u32,
        width: u32,
        height: u32,
        dst: &Path,
    ) -> Result<()> {
        std::fs::write(dst, Self::fake_bytes(width, height)).map_err(|e| CdnError::io(dst, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_header_reports_dimensions() {
        let mut bytes = vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
        bytes.extend_from_slice(&[0, 0, 0, 13]); // length
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(&50u32.to_be_bytes());
        bytes.extend_from_slice(&[0; 5]);
        assert_eq!(png_dimensions(&bytes), Some((100, 50)));
    }

    #[test]
    fn gif_header_reports_dimensions() {
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&42u16.to_le_bytes());
        bytes.extend_from_slice(&24u16.to_le_bytes());
        assert_eq!(gif_dimensions(&bytes), Some((42, 24)));
    }

    #[test]
    fn jpeg_sof0_reports_dimensions() {
        let mut bytes = vec![0xFF, 0xD8]; // SOI
        bytes.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]); // APP0, length 16
        bytes.extend_from_slice(&[0u8; 14]);
        bytes.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11]); // SOF0, length 17
        bytes.push(8); // precision
        bytes.extend_from_slice(&584u16.to_be_bytes()); // height
        bytes.extend_from_slice(&778u16.to_be_bytes()); // width
        bytes.extend_from_slice(&[0u8; 12]);
        assert_eq!(jpeg_dimensions(&bytes), Some((778, 584)));
    }

    #[test]
    fn fake_codec_round_trips_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.bin");
        std::fs::write(&path, FakeCodec::fake_bytes(389, 292)).unwrap();
        let codec = FakeCodec;
        assert_eq!(codec.decode_dimensions(ContentType::Jpeg, &path).unwrap(), (389, 292));
    }
}
