//! Structure-aware image readers.
//!
//! One reader per source format, all behind the same capability set: report
//! [`ImageInfo`], expose opaque per-level metadata, and decode a region of a
//! chosen resolution level with optional software subsampling. Readers exploit
//! whatever structure their format offers — TIFF tiles/strips and
//! sub-directories, JPEG2000 wavelet levels — and fall back to full-frame
//! decoding where none exists.

mod baseline;
mod jp2;
mod jpeg;
mod tiff;

pub use baseline::BaselineReader;
pub use jp2::Jp2Reader;
pub use jpeg::JpegReader;
pub use tiff::TiffReader;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::Config;
use crate::error::Error;
use crate::format::Format;
use crate::image::{ImageInfo, PixelMatrix, Region};
use crate::io::RangeReader;

// =============================================================================
// Read Hints
// =============================================================================

/// Facts about what a read already did, so the pipeline skips redundant work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadHints {
    /// The returned matrix is already cropped to the requested region.
    pub already_cropped: bool,
}

// =============================================================================
// Reader Behavior
// =============================================================================

/// Reader-level switches lifted from the config snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    /// Rescale >8-bit sources to 8 bits as the last step of every read.
    pub limit_to_8_bits: bool,

    /// Stretch each channel's observed range before any depth reduction.
    pub normalize: bool,
}

impl ReaderOptions {
    /// Lift the reader-relevant keys from a config snapshot.
    pub fn from_config(config: &Config) -> Self {
        Self {
            limit_to_8_bits: config.limit_to_8_bits,
            normalize: config.normalize,
        }
    }

    /// Apply normalize-then-clamp as the final step of a read.
    pub(crate) fn finish(&self, matrix: PixelMatrix) -> PixelMatrix {
        let matrix = if self.normalize {
            matrix.normalize()
        } else {
            matrix
        };
        if self.limit_to_8_bits {
            matrix.clamp_to_8_bits()
        } else {
            matrix
        }
    }
}

// =============================================================================
// ImageReader
// =============================================================================

/// Capability set every format reader satisfies.
#[async_trait]
pub trait ImageReader: Send + Sync {
    /// Structural facts about the source.
    fn info(&self) -> &ImageInfo;

    /// Opaque native metadata for a level, when the format carries any.
    fn metadata(&self, level: usize) -> Option<Bytes>;

    /// Decode a region of a resolution level.
    ///
    /// `region` is in the level's coordinate space; `None` means the whole
    /// level. `subsample` is a power-of-two decimation step applied during or
    /// after decode. The hints say whether the result is already cropped.
    async fn read(
        &self,
        level: usize,
        region: Option<Region>,
        subsample: u32,
    ) -> Result<(PixelMatrix, ReadHints), Error>;
}

// =============================================================================
// Reader Table
// =============================================================================

/// Open the reader registered for a format.
///
/// This is the static per-format table: every readable format maps to a
/// reader constructor, populated here rather than discovered at runtime.
pub async fn open_reader(
    format: Format,
    source: Arc<dyn RangeReader>,
    identifier: &str,
    config: &Config,
) -> Result<Box<dyn ImageReader>, Error> {
    let options = ReaderOptions::from_config(config);
    match format {
        Format::Tiff => Ok(Box::new(
            TiffReader::open(source, identifier, options).await?,
        )),
        Format::Jpeg => Ok(Box::new(
            JpegReader::open(source, identifier, options).await?,
        )),
        Format::Jpeg2000 => Ok(Box::new(
            Jp2Reader::open(source, identifier, options).await?,
        )),
        Format::Png | Format::Bmp | Format::Gif => Ok(Box::new(
            BaselineReader::open(source, identifier, format, options).await?,
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================
