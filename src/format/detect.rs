//! Media-type vocabulary and format detection.
//!
//! Identification runs in order of cost: a recognized filename extension is
//! trusted first; otherwise the first 16 bytes are matched against magic
//! signatures; HTTP sources may finally fall back to the origin's
//! Content-Type header. Extension and bytes can disagree (a `.png` file whose
//! bytes are JPEG) — magic always wins when both are consulted.

use crate::error::FormatError;
use crate::io::RangeReader;

// =============================================================================
// Format
// =============================================================================

/// Number of leading bytes needed for magic-signature matching.
pub const MAGIC_LEN: usize = 16;

/// Source and derivative image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Jpeg,
    Jpeg2000,
    Png,
    Tiff,
    Bmp,
    Gif,
}

impl Format {
    /// All formats, in detection order.
    pub const ALL: [Format; 6] = [
        Format::Jpeg,
        Format::Jpeg2000,
        Format::Png,
        Format::Tiff,
        Format::Bmp,
        Format::Gif,
    ];

    /// Get a human-readable name for the format.
    pub const fn name(&self) -> &'static str {
        match self {
            Format::Jpeg => "JPEG",
            Format::Jpeg2000 => "JPEG2000",
            Format::Png => "PNG",
            Format::Tiff => "TIFF",
            Format::Bmp => "BMP",
            Format::Gif => "GIF",
        }
    }

    /// Get the preferred media type.
    pub const fn media_type(&self) -> &'static str {
        match self {
            Format::Jpeg => "image/jpeg",
            Format::Jpeg2000 => "image/jp2",
            Format::Png => "image/png",
            Format::Tiff => "image/tiff",
            Format::Bmp => "image/bmp",
            Format::Gif => "image/gif",
        }
    }

    /// Get the preferred filename extension (without the dot).
    pub const fn extension(&self) -> &'static str {
        match self {
            Format::Jpeg => "jpg",
            Format::Jpeg2000 => "jp2",
            Format::Png => "png",
            Format::Tiff => "tif",
            Format::Bmp => "bmp",
            Format::Gif => "gif",
        }
    }

    /// Whether a reader exists for this format.
    pub const fn is_readable(&self) -> bool {
        // BMP and GIF sources are recognized but have no structure-aware
        // reader; they go through the PNG-style full decode path.
        true
    }

    /// Whether a writer exists for this format.
    pub const fn is_writable(&self) -> bool {
        matches!(
            self,
            Format::Jpeg | Format::Png | Format::Tiff | Format::Gif
        )
    }

    /// Resolve a format from a filename extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Format::Jpeg),
            "jp2" | "jpx" | "j2k" => Some(Format::Jpeg2000),
            "png" => Some(Format::Png),
            "tif" | "tiff" => Some(Format::Tiff),
            "bmp" => Some(Format::Bmp),
            "gif" => Some(Format::Gif),
            _ => None,
        }
    }

    /// Resolve a format from a media type string.
    pub fn from_media_type(media_type: &str) -> Option<Format> {
        // Strip parameters like "; charset=binary"
        let base = media_type.split(';').next().unwrap_or("").trim();
        match base {
            "image/jpeg" | "image/jpg" => Some(Format::Jpeg),
            "image/jp2" | "image/jpeg2000" | "image/jpx" => Some(Format::Jpeg2000),
            "image/png" => Some(Format::Png),
            "image/tiff" | "image/tif" => Some(Format::Tiff),
            "image/bmp" | "image/x-bmp" => Some(Format::Bmp),
            "image/gif" => Some(Format::Gif),
            _ => None,
        }
    }

    /// Resolve a format from the extension of an identifier, if any.
    pub fn from_identifier(identifier: &str) -> Option<Format> {
        let dot = identifier.rfind('.')?;
        let ext = &identifier[dot + 1..];
        // Ignore "extensions" that contain path separators
        if ext.contains('/') || ext.contains('\\') || ext.is_empty() {
            return None;
        }
        Format::from_extension(ext)
    }
}

// =============================================================================
// Magic-Byte Detection
// =============================================================================

/// JP2 signature box: length 12, type 'jP  ', CR LF 0x87 LF.
const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

/// Raw JPEG2000 codestream: SOC then SIZ marker.
const J2K_CODESTREAM: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];

/// PNG signature.
const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Match leading bytes against known signatures.
///
/// `bytes` should hold at least [`MAGIC_LEN`] bytes when available; shorter
/// prefixes are matched as far as they go.
pub fn detect_format(bytes: &[u8]) -> Option<Format> {
    if bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF {
        return Some(Format::Jpeg);
    }
    if bytes.len() >= 12 && bytes[..12] == JP2_SIGNATURE {
        return Some(Format::Jpeg2000);
    }
    if bytes.len() >= 4 && bytes[..4] == J2K_CODESTREAM {
        return Some(Format::Jpeg2000);
    }
    if bytes.len() >= 8 && bytes[..8] == PNG_SIGNATURE {
        return Some(Format::Png);
    }
    if is_tiff_signature(bytes) {
        return Some(Format::Tiff);
    }
    if bytes.len() >= 4 && (&bytes[..4] == b"GIF8") {
        return Some(Format::Gif);
    }
    if bytes.len() >= 2 && &bytes[..2] == b"BM" {
        return Some(Format::Bmp);
    }
    None
}

/// Check for a TIFF or BigTIFF header (either byte order).
pub fn is_tiff_signature(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    matches!(
        (bytes[0], bytes[1], bytes[2], bytes[3]),
        (0x49, 0x49, 0x2A, 0x00) // little-endian classic
            | (0x49, 0x49, 0x2B, 0x00) // little-endian BigTIFF
            | (0x4D, 0x4D, 0x00, 0x2A) // big-endian classic
            | (0x4D, 0x4D, 0x00, 0x2B) // big-endian BigTIFF
    )
}

/// Sniff the format of an opened resource from its leading bytes.
pub async fn sniff_format(reader: &dyn RangeReader) -> Result<Format, FormatError> {
    let len = (reader.size() as usize).min(MAGIC_LEN);
    if len == 0 {
        return Err(FormatError::Unrecognized {
            reason: "empty resource".to_string(),
        });
    }
    let bytes = reader.read_exact_at(0, len).await?;
    detect_format(&bytes).ok_or_else(|| FormatError::Unrecognized {
        reason: format!("{}: no signature matched", reader.identifier()),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRangeReader;

    // -------------------------------------------------------------------------
    // Magic-byte tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_detect_jpeg() {
        let bytes = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        assert_eq!(detect_format(&bytes), Some(Format::Jpeg));
    }

    #[test]
    fn test_detect_png() {
        let bytes = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(detect_format(&bytes), Some(Format::Png));
    }

    #[test]
    fn test_detect_tiff_variants() {
        assert_eq!(
            detect_format(&[0x49, 0x49, 0x2A, 0x00]),
            Some(Format::Tiff)
        );
        assert_eq!(
            detect_format(&[0x4D, 0x4D, 0x00, 0x2A]),
            Some(Format::Tiff)
        );
        // BigTIFF, both orders
        assert_eq!(
            detect_format(&[0x49, 0x49, 0x2B, 0x00]),
            Some(Format::Tiff)
        );
        assert_eq!(
            detect_format(&[0x4D, 0x4D, 0x00, 0x2B]),
            Some(Format::Tiff)
        );
    }

    #[test]
    fn test_detect_jp2_container_and_codestream() {
        let mut jp2 = vec![0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20];
        jp2.extend_from_slice(&[0x0D, 0x0A, 0x87, 0x0A, 0, 0, 0, 0]);
        assert_eq!(detect_format(&jp2), Some(Format::Jpeg2000));

        let j2k = [0xFF, 0x4F, 0xFF, 0x51, 0x00, 0x00];
        assert_eq!(detect_format(&j2k), Some(Format::Jpeg2000));
    }

    #[test]
    fn test_detect_gif_and_bmp() {
        assert_eq!(detect_format(b"GIF89a"), Some(Format::Gif));
        assert_eq!(detect_format(b"GIF87a"), Some(Format::Gif));
        assert_eq!(detect_format(b"BM\x00\x00"), Some(Format::Bmp));
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect_format(b"not an image"), None);
        assert_eq!(detect_format(&[]), None);
        assert_eq!(detect_format(&[0xFF]), None);
    }

    // -------------------------------------------------------------------------
    // Extension and media-type tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_from_extension_case_insensitive() {
        assert_eq!(Format::from_extension("JPG"), Some(Format::Jpeg));
        assert_eq!(Format::from_extension("jpeg"), Some(Format::Jpeg));
        assert_eq!(Format::from_extension("TIFF"), Some(Format::Tiff));
        assert_eq!(Format::from_extension("webp"), None);
    }

    #[test]
    fn test_from_identifier() {
        assert_eq!(
            Format::from_identifier("photos/cat.jpg"),
            Some(Format::Jpeg)
        );
        assert_eq!(
            Format::from_identifier("scans/page.tif"),
            Some(Format::Tiff)
        );
        assert_eq!(Format::from_identifier("no-extension"), None);
        // A dot inside a directory name is not an extension
        assert_eq!(Format::from_identifier("v1.2/image"), None);
    }

    #[test]
    fn test_from_media_type() {
        assert_eq!(Format::from_media_type("image/jpeg"), Some(Format::Jpeg));
        assert_eq!(
            Format::from_media_type("image/tiff; charset=binary"),
            Some(Format::Tiff)
        );
        assert_eq!(Format::from_media_type("text/html"), None);
    }

    #[test]
    fn test_writable_subset() {
        assert!(Format::Jpeg.is_writable());
        assert!(Format::Png.is_writable());
        assert!(Format::Tiff.is_writable());
        assert!(Format::Gif.is_writable());
        assert!(!Format::Jpeg2000.is_writable());
        assert!(!Format::Bmp.is_writable());
    }

    // -------------------------------------------------------------------------
    // Sniffing tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_sniff_format() {
        let reader = MemoryRangeReader::new(
            vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            "mem://photo",
        );
        assert_eq!(sniff_format(&reader).await.unwrap(), Format::Jpeg);
    }

    #[tokio::test]
    async fn test_sniff_short_resource() {
        // Resources shorter than MAGIC_LEN still sniff correctly.
        let reader = MemoryRangeReader::new(b"GIF89a".to_vec(), "mem://tiny");
        assert_eq!(sniff_format(&reader).await.unwrap(), Format::Gif);
    }

    #[tokio::test]
    async fn test_sniff_unrecognized() {
        let reader = MemoryRangeReader::new(b"hello world!".to_vec(), "mem://text");
        assert!(matches!(
            sniff_format(&reader).await,
            Err(FormatError::Unrecognized { .. })
        ));
    }

    #[tokio::test]
    async fn test_sniff_empty() {
        let reader = MemoryRangeReader::new(Vec::new(), "mem://empty");
        assert!(sniff_format(&reader).await.is_err());
    }
}
