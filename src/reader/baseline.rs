//! Whole-frame reader for formats without exploitable structure.
//!
//! PNG, BMP, and GIF offer no pyramids, tiles, or partial decode, so this
//! reader reports a single resolution level sized at the full image and
//! decodes the whole frame on every read. Region and subsample requests are
//! honored after the fact by cropping and decimation.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::ImageDecoder;
use tracing::debug;

use crate::error::Error;
use crate::format::Format;
use crate::image::{ImageInfo, PixelMatrix, Region};
use crate::io::{read_all, RangeReader};

use super::{ImageReader, ReadHints, ReaderOptions};

/// Single-level, full-decode reader for PNG/BMP/GIF.
pub struct BaselineReader {
    data: Bytes,
    format: Format,
    info: ImageInfo,
    icc_profile: Option<Bytes>,
    options: ReaderOptions,
}

impl BaselineReader {
    /// Open a source: probe dimensions and color layout without a full decode.
    pub async fn open(
        source: Arc<dyn RangeReader>,
        identifier: &str,
        format: Format,
        options: ReaderOptions,
    ) -> Result<Self, Error> {
        let data = read_all(source.as_ref()).await.map_err(Error::from)?;

        let mut decoder = image::ImageReader::with_format(
            Cursor::new(data.clone()),
            to_image_format(format),
        )
        .into_decoder()
        .map_err(|e| Error::UnsupportedSourceFormat(format!("{}: {}", identifier, e)))?;

        let (width, height) = decoder.dimensions();
        let color = decoder.color_type();
        let icc_profile = decoder.icc_profile().ok().flatten().map(Bytes::from);

        debug!(identifier, width, height, format = format.name(), "opened image");

        let info = ImageInfo::monolithic(
            identifier,
            format,
            width,
            height,
            (color.bits_per_pixel() / color.channel_count() as u16).min(255) as u8,
            color.channel_count(),
            icc_profile.is_some(),
        );

        Ok(BaselineReader {
            data,
            format,
            info,
            icc_profile,
            options,
        })
    }
}

fn to_image_format(format: Format) -> image::ImageFormat {
    match format {
        Format::Png => image::ImageFormat::Png,
        Format::Bmp => image::ImageFormat::Bmp,
        Format::Gif => image::ImageFormat::Gif,
        Format::Jpeg => image::ImageFormat::Jpeg,
        Format::Tiff => image::ImageFormat::Tiff,
        // No codec; callers route JPEG2000 to its own reader.
        Format::Jpeg2000 => image::ImageFormat::Png,
    }
}

#[async_trait]
impl ImageReader for BaselineReader {
    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn metadata(&self, _level: usize) -> Option<Bytes> {
        None
    }

    async fn read(
        &self,
        level: usize,
        region: Option<Region>,
        subsample: u32,
    ) -> Result<(PixelMatrix, ReadHints), Error> {
        if level != 0 {
            return Err(Error::InvalidRequest(format!(
                "level {} out of range ({} has 1)",
                level,
                self.format.name()
            )));
        }

        let decoded =
            image::load_from_memory_with_format(&self.data, to_image_format(self.format))
                .map_err(|e| Error::Internal(e.to_string()))?;

        let mut matrix = PixelMatrix::with_profile(decoded, self.icc_profile.clone());

        let already_cropped = if let Some(region) = region {
            let clipped = region.clipped_to(self.info.width, self.info.height);
            if clipped.is_empty() {
                return Err(Error::InvalidRequest("region selects no pixels".into()));
            }
            matrix = matrix.crop(clipped);
            true
        } else {
            false
        };

        matrix = matrix.decimate(subsample.max(1));
        matrix = self.options.finish(matrix);

        Ok((matrix, ReadHints { already_cropped }))
    }
}

// =============================================================================
// Tests
// =============================================================================
