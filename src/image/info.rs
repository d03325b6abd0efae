//! Decoded source-image facts, cached per identifier.

use crate::format::Format;

/// Geometry of one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    /// Level width in pixels.
    pub width: u32,

    /// Level height in pixels.
    pub height: u32,

    /// Tile width, or 0 when the level is striped/monolithic.
    pub tile_width: u32,

    /// Tile height, or 0 when the level is striped/monolithic.
    pub tile_height: u32,
}

/// Everything the pipeline needs to know about a source image without
/// decoding pixels.
///
/// Populated on first open, then served from the info cache so fingerprint
/// computation and level selection skip the source entirely on repeat
/// requests. Invalidated only by explicit purge.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    /// The identifier this info describes.
    pub identifier: String,

    /// Detected source format.
    pub format: Format,

    /// Full-resolution width.
    pub width: u32,

    /// Full-resolution height.
    pub height: u32,

    /// Per-level geometry, largest first.
    pub levels: Vec<LevelInfo>,

    /// Bits per sample.
    pub bits_per_sample: u8,

    /// Samples per pixel.
    pub samples_per_pixel: u8,

    /// Whether an ICC color profile is embedded.
    pub has_color_profile: bool,
}

impl ImageInfo {
    /// Number of resolution levels (always ≥ 1).
    pub fn num_resolutions(&self) -> usize {
        self.levels.len().max(1)
    }

    /// Geometry of a level, if present.
    pub fn level(&self, index: usize) -> Option<&LevelInfo> {
        self.levels.get(index)
    }

    /// Build a single-level info for formats without internal pyramids.
    pub fn monolithic(
        identifier: impl Into<String>,
        format: Format,
        width: u32,
        height: u32,
        bits_per_sample: u8,
        samples_per_pixel: u8,
        has_color_profile: bool,
    ) -> Self {
        ImageInfo {
            identifier: identifier.into(),
            format,
            width,
            height,
            levels: vec![LevelInfo {
                width,
                height,
                tile_width: 0,
                tile_height: 0,
            }],
            bits_per_sample,
            samples_per_pixel,
            has_color_profile,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
