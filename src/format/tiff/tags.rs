//! TIFF tag and field-type vocabulary.
//!
//! Only the tags the pipeline actually consults are defined; unknown tags are
//! carried through parsing untouched and ignored. The set covers image
//! geometry, both tile and strip pixel layouts, sample structure, the
//! compression schemes we decode, and the metadata tags (ICC profile,
//! JPEGTables) that feed the readers and writers.

// =============================================================================
// Field Types
// =============================================================================

/// TIFF field types, which fix the byte width of stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer.
    Byte = 1,

    /// 8-bit ASCII character.
    Ascii = 2,

    /// Unsigned 16-bit integer.
    Short = 3,

    /// Unsigned 32-bit integer.
    Long = 4,

    /// Two LONGs: numerator, denominator.
    Rational = 5,

    /// Opaque byte data.
    Undefined = 7,

    /// Unsigned 64-bit integer (BigTIFF only).
    Long8 = 16,
}

impl FieldType {
    /// Size of one value of this type in bytes.
    #[inline]
    pub const fn value_size(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Rational | FieldType::Long8 => 8,
        }
    }

    /// Resolve a numeric field type. Unknown types yield `None`.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            7 => Some(FieldType::Undefined),
            16 => Some(FieldType::Long8),
            _ => None,
        }
    }

    /// Whether `count` values of this type fit in the entry's value field
    /// (4 bytes for classic TIFF, 8 for BigTIFF).
    #[inline]
    pub fn fits_inline(self, count: u64, bigtiff: bool) -> bool {
        let total = self.value_size() as u64 * count;
        total <= if bigtiff { 8 } else { 4 }
    }
}

// =============================================================================
// Tags
// =============================================================================

/// TIFF tags consulted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Tag {
    /// Subfile classification bits (bit 0: reduced-resolution copy).
    NewSubfileType = 254,

    /// Image width in pixels.
    ImageWidth = 256,

    /// Image height in pixels.
    ImageLength = 257,

    /// Bits per sample (array when samples > 1).
    BitsPerSample = 258,

    /// Compression scheme.
    Compression = 259,

    /// Photometric interpretation.
    PhotometricInterpretation = 262,

    /// Free-form description string.
    ImageDescription = 270,

    /// Byte offsets of strips.
    StripOffsets = 273,

    /// Components per pixel.
    SamplesPerPixel = 277,

    /// Rows in each strip (last strip may be shorter).
    RowsPerStrip = 278,

    /// Byte counts of strips.
    StripByteCounts = 279,

    /// Chunky vs planar component layout.
    PlanarConfiguration = 284,

    /// Differencing predictor applied before LZW/Deflate.
    Predictor = 317,

    /// Width of each tile.
    TileWidth = 322,

    /// Height of each tile.
    TileLength = 323,

    /// Byte offsets of tiles.
    TileOffsets = 324,

    /// Byte counts of tiles.
    TileByteCounts = 325,

    /// Per-sample data format (unsigned/signed/float).
    SampleFormat = 339,

    /// Shared quantization/Huffman tables for abbreviated JPEG tiles.
    JpegTables = 347,

    /// Embedded ICC color profile.
    IccProfile = 34675,
}

impl Tag {
    /// Resolve a numeric tag id. Unknown tags yield `None` and are ignored.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            254 => Some(Tag::NewSubfileType),
            256 => Some(Tag::ImageWidth),
            257 => Some(Tag::ImageLength),
            258 => Some(Tag::BitsPerSample),
            259 => Some(Tag::Compression),
            262 => Some(Tag::PhotometricInterpretation),
            270 => Some(Tag::ImageDescription),
            273 => Some(Tag::StripOffsets),
            277 => Some(Tag::SamplesPerPixel),
            278 => Some(Tag::RowsPerStrip),
            279 => Some(Tag::StripByteCounts),
            284 => Some(Tag::PlanarConfiguration),
            317 => Some(Tag::Predictor),
            322 => Some(Tag::TileWidth),
            323 => Some(Tag::TileLength),
            324 => Some(Tag::TileOffsets),
            325 => Some(Tag::TileByteCounts),
            339 => Some(Tag::SampleFormat),
            347 => Some(Tag::JpegTables),
            34675 => Some(Tag::IccProfile),
            _ => None,
        }
    }

    /// Get the numeric tag id.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Compression
// =============================================================================

/// TIFF compression schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    /// Raw, uncompressed samples.
    Uncompressed,

    /// LZW with optional horizontal predictor.
    Lzw,

    /// "Old-style" JPEG (rare, broken by design, not decoded).
    OldJpeg,

    /// Per-tile/strip JPEG streams, possibly abbreviated via JPEGTables.
    Jpeg,

    /// zlib/Deflate (both the registered and the Adobe code point).
    Deflate,

    /// JPEG2000 codestreams inside TIFF (vendor code points, not decoded).
    Jpeg2000InTiff,

    /// Anything else.
    Unknown(u16),
}

impl CompressionScheme {
    /// Classify a raw compression tag value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => CompressionScheme::Uncompressed,
            5 => CompressionScheme::Lzw,
            6 => CompressionScheme::OldJpeg,
            7 => CompressionScheme::Jpeg,
            8 | 32946 => CompressionScheme::Deflate,
            33003 | 33005 => CompressionScheme::Jpeg2000InTiff,
            other => CompressionScheme::Unknown(other),
        }
    }

    /// Whether a decoder exists for this scheme.
    #[inline]
    pub const fn is_supported(self) -> bool {
        matches!(
            self,
            CompressionScheme::Uncompressed
                | CompressionScheme::Lzw
                | CompressionScheme::Jpeg
                | CompressionScheme::Deflate
        )
    }

    /// Human-readable name.
    pub fn name(self) -> String {
        match self {
            CompressionScheme::Uncompressed => "uncompressed".to_string(),
            CompressionScheme::Lzw => "LZW".to_string(),
            CompressionScheme::OldJpeg => "old-style JPEG".to_string(),
            CompressionScheme::Jpeg => "JPEG".to_string(),
            CompressionScheme::Deflate => "Deflate".to_string(),
            CompressionScheme::Jpeg2000InTiff => "JPEG2000-in-TIFF".to_string(),
            CompressionScheme::Unknown(v) => format!("unknown ({})", v),
        }
    }
}

/// Photometric interpretation values the readers care about.
pub mod photometric {
    /// 0 is white, samples count darkness.
    pub const WHITE_IS_ZERO: u16 = 0;
    /// 0 is black.
    pub const BLACK_IS_ZERO: u16 = 1;
    /// RGB samples.
    pub const RGB: u16 = 2;
    /// Luma/chroma, the JPEG-compressed default.
    pub const YCBCR: u16 = 6;
}

/// Predictor values for LZW/Deflate.
pub mod predictor {
    /// No prediction.
    pub const NONE: u16 = 1;
    /// Horizontal byte differencing.
    pub const HORIZONTAL: u16 = 2;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_sizes() {
        assert_eq!(FieldType::Byte.value_size(), 1);
        assert_eq!(FieldType::Ascii.value_size(), 1);
        assert_eq!(FieldType::Short.value_size(), 2);
        assert_eq!(FieldType::Long.value_size(), 4);
        assert_eq!(FieldType::Rational.value_size(), 8);
        assert_eq!(FieldType::Undefined.value_size(), 1);
        assert_eq!(FieldType::Long8.value_size(), 8);
    }

    #[test]
    fn test_field_type_from_u16() {
        assert_eq!(FieldType::from_u16(3), Some(FieldType::Short));
        assert_eq!(FieldType::from_u16(5), Some(FieldType::Rational));
        assert_eq!(FieldType::from_u16(16), Some(FieldType::Long8));
        assert_eq!(FieldType::from_u16(99), None);
    }

    #[test]
    fn test_fits_inline() {
        // Classic TIFF: 4-byte value field
        assert!(FieldType::Short.fits_inline(2, false));
        assert!(!FieldType::Short.fits_inline(3, false));
        assert!(FieldType::Long.fits_inline(1, false));
        assert!(!FieldType::Long8.fits_inline(1, false));

        // BigTIFF: 8-byte value field
        assert!(FieldType::Long8.fits_inline(1, true));
        assert!(FieldType::Long.fits_inline(2, true));
        assert!(!FieldType::Long.fits_inline(3, true));
    }

    #[test]
    fn test_tag_roundtrip() {
        for tag in [
            Tag::NewSubfileType,
            Tag::ImageWidth,
            Tag::StripOffsets,
            Tag::RowsPerStrip,
            Tag::Predictor,
            Tag::TileOffsets,
            Tag::SampleFormat,
            Tag::JpegTables,
            Tag::IccProfile,
        ] {
            assert_eq!(Tag::from_u16(tag.as_u16()), Some(tag));
        }
        assert_eq!(Tag::from_u16(9999), None);
    }

    #[test]
    fn test_compression_classification() {
        assert_eq!(
            CompressionScheme::from_u16(1),
            CompressionScheme::Uncompressed
        );
        assert_eq!(CompressionScheme::from_u16(5), CompressionScheme::Lzw);
        assert_eq!(CompressionScheme::from_u16(7), CompressionScheme::Jpeg);
        assert_eq!(CompressionScheme::from_u16(8), CompressionScheme::Deflate);
        // Adobe deflate folds into Deflate
        assert_eq!(
            CompressionScheme::from_u16(32946),
            CompressionScheme::Deflate
        );
        assert_eq!(
            CompressionScheme::from_u16(33003),
            CompressionScheme::Jpeg2000InTiff
        );
        assert_eq!(
            CompressionScheme::from_u16(777),
            CompressionScheme::Unknown(777)
        );
    }

    #[test]
    fn test_compression_support() {
        assert!(CompressionScheme::Uncompressed.is_supported());
        assert!(CompressionScheme::Lzw.is_supported());
        assert!(CompressionScheme::Jpeg.is_supported());
        assert!(CompressionScheme::Deflate.is_supported());
        assert!(!CompressionScheme::OldJpeg.is_supported());
        assert!(!CompressionScheme::Jpeg2000InTiff.is_supported());
        assert!(!CompressionScheme::Unknown(777).is_supported());
    }
}
