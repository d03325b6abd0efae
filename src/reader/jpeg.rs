//! JPEG reader.
//!
//! JPEG has no internal pyramid, so there is a single resolution level.
//! Decoders that can downscale inside the IDCT only support factors 1/1, 1/2,
//! 1/4, and 1/8; the pure-Rust decode path exposes no partial IDCT, so those
//! factors are honored by post-decode decimation — the same fallback any
//! other factor would take. Metadata (EXIF, XMP, vendor APPn segments) and
//! the ICC profile are captured as opaque blobs at open.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::Error;
use crate::format::jpeg::{
    extract_app_segments, extract_icc_profile, parse_frame_header, strip_icc_profile,
};
use crate::format::Format;
use crate::image::{ImageInfo, PixelMatrix, Region};
use crate::io::{read_all, RangeReader};

use super::{ImageReader, ReadHints, ReaderOptions};

/// Whole-frame JPEG reader with subsample-by-decimation.
pub struct JpegReader {
    data: Bytes,
    info: ImageInfo,
    metadata: Option<Bytes>,
    icc_profile: Option<Bytes>,
    options: ReaderOptions,
}

impl JpegReader {
    /// Open a JPEG source: fetch the stream and probe its frame header.
    pub async fn open(
        source: Arc<dyn RangeReader>,
        identifier: &str,
        options: ReaderOptions,
    ) -> Result<Self, Error> {
        let data = read_all(source.as_ref()).await.map_err(Error::from)?;

        let header = parse_frame_header(&data).ok_or_else(|| {
            Error::UnsupportedSourceFormat(format!("{}: no JPEG frame header", identifier))
        })?;

        let metadata = extract_app_segments(&data);
        let icc_profile = extract_icc_profile(&data);

        debug!(
            identifier,
            width = header.width,
            height = header.height,
            components = header.components,
            "opened JPEG"
        );

        let info = ImageInfo::monolithic(
            identifier,
            Format::Jpeg,
            header.width,
            header.height,
            header.precision,
            header.components,
            icc_profile.is_some(),
        );

        Ok(JpegReader {
            data,
            info,
            metadata,
            icc_profile,
            options,
        })
    }
}

#[async_trait]
impl ImageReader for JpegReader {
    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn metadata(&self, level: usize) -> Option<Bytes> {
        if level == 0 {
            self.metadata.clone()
        } else {
            None
        }
    }

    async fn read(
        &self,
        level: usize,
        region: Option<Region>,
        subsample: u32,
    ) -> Result<(PixelMatrix, ReadHints), Error> {
        if level != 0 {
            return Err(Error::InvalidRequest(format!(
                "level {} out of range (JPEG has 1)",
                level
            )));
        }

        let decoded =
            match image::load_from_memory_with_format(&self.data, image::ImageFormat::Jpeg) {
                Ok(img) => img,
                Err(first_err) => {
                    // An incompatible embedded profile can poison decoding;
                    // retrying without it keeps the color channels intact.
                    let stripped = strip_icc_profile(&self.data);
                    if stripped.len() == self.data.len() {
                        return Err(Error::Internal(first_err.to_string()));
                    }
                    warn!(
                        identifier = %self.info.identifier,
                        "JPEG decode failed with embedded ICC profile, retrying without it"
                    );
                    image::load_from_memory_with_format(&stripped, image::ImageFormat::Jpeg)
                        .map_err(|e| Error::Internal(e.to_string()))?
                }
            };

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRangeReader;
    use image::codecs::jpeg::JpegEncoder;
    use image::{DynamicImage, Luma};

    /// Encode a gradient as a real JPEG stream.
    fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]));
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, 90);
        encoder
            .encode_image(&DynamicImage::ImageLuma8(img))
            .unwrap();
        buf
    }

    async fn open(data: Vec<u8>) -> Result<JpegReader, Error> {
        let source = Arc::new(MemoryRangeReader::new(data, "mem://photo.jpg"));
        JpegReader::open(source, "photo.jpg", ReaderOptions::default()).await
    }

    #[tokio::test]
    async fn test_open_reports_single_level() {
        let reader = open(gradient_jpeg(320, 200)).await.unwrap();
        let info = reader.info();
        assert_eq!((info.width, info.height), (320, 200));
        assert_eq!(info.num_resolutions(), 1);
        assert_eq!(info.level(0).unwrap().tile_width, 0);
    }

    #[tokio::test]
    async fn test_full_decode() {
        let reader = open(gradient_jpeg(64, 64)).await.unwrap();
        let (matrix, hints) = reader.read(0, None, 1).await.unwrap();
        assert_eq!((matrix.width(), matrix.height()), (64, 64));
        assert!(!hints.already_cropped);
    }

    #[tokio::test]
    async fn test_region_read_is_cropped() {
        let reader = open(gradient_jpeg(128, 128)).await.unwrap();
        let (matrix, hints) = reader
            .read(0, Some(Region::new(32, 32, 50, 40)), 1)
            .await
            .unwrap();
        assert!(hints.already_cropped);
        assert_eq!((matrix.width(), matrix.height()), (50, 40));
    }

    #[tokio::test]
    async fn test_subsample_halves() {
        let reader = open(gradient_jpeg(128, 128)).await.unwrap();
        let (matrix, _) = reader.read(0, None, 2).await.unwrap();
        assert_eq!((matrix.width(), matrix.height()), (64, 64));
    }

    #[tokio::test]
    async fn test_invalid_level() {
        let reader = open(gradient_jpeg(32, 32)).await.unwrap();
        assert!(reader.read(1, None, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_rejected_at_open() {
        let result = open(b"not a jpeg at all".to_vec()).await;
        assert!(matches!(result, Err(Error::UnsupportedSourceFormat(_))));
    }
}
