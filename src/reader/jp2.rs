//! JPEG2000 reader.
//!
//! The wavelet transform gives JPEG2000 a native resolution pyramid: decoding
//! at reduce factor `r` reconstructs the image at 2^-r scale from only the
//! subbands that matter, and a decode area restricts work to the code-blocks
//! overlapping the requested region. Level geometry comes from our own SIZ/COD
//! header parse so opening never decodes pixels.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use jpeg2k::{DecodeArea, DecodeParameters, Image as Jp2Image};
use tracing::debug;

use crate::error::Error;
use crate::format::jp2::{parse_header, CodestreamHeader, HEADER_PREFIX_LEN};
use crate::format::Format;
use crate::image::{ImageInfo, LevelInfo, PixelMatrix, Region};
use crate::io::{read_all, RangeReader};

use super::{ImageReader, ReadHints, ReaderOptions};

/// Wavelet-level JPEG2000 reader.
pub struct Jp2Reader {
    data: Bytes,
    header: CodestreamHeader,
    info: ImageInfo,
    options: ReaderOptions,
}

impl Jp2Reader {
    /// Open a JPEG2000 source: parse SIZ/COD for geometry, keep the bytes
    /// for later decodes.
    pub async fn open(
        source: Arc<dyn RangeReader>,
        identifier: &str,
        options: ReaderOptions,
    ) -> Result<Self, Error> {
        let prefix_len = (source.size() as usize).min(HEADER_PREFIX_LEN);
        let prefix = source
            .read_exact_at(0, prefix_len)
            .await
            .map_err(Error::from)?;
        let header = parse_header(&prefix).map_err(Error::from)?;

        let data = read_all(source.as_ref()).await.map_err(Error::from)?;

        let levels = (0..header.num_resolutions())
            .map(|r| {
                let (w, h) = header.level_dimensions(r);
                LevelInfo {
                    width: w,
                    height: h,
                    tile_width: if header.tile_width < header.width {
                        header.tile_width >> r
                    } else {
                        0
                    },
                    tile_height: if header.tile_height < header.height {
                        header.tile_height >> r
                    } else {
                        0
                    },
                }
            })
            .collect();

        debug!(
            identifier,
            width = header.width,
            height = header.height,
            resolutions = header.num_resolutions(),
            "opened JPEG2000"
        );

        let info = ImageInfo {
            identifier: identifier.to_string(),
            format: Format::Jpeg2000,
            width: header.width,
            height: header.height,
            levels,
            bits_per_sample: header.bit_depth,
            samples_per_pixel: header.components.min(255) as u8,
            has_color_profile: false,
        };

        Ok(Jp2Reader {
            data,
            header,
            info,
            options,
        })
    }
}

#[async_trait]
impl ImageReader for Jp2Reader {
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
        if level >= self.header.num_resolutions() {
            return Err(Error::InvalidRequest(format!(
                "level {} out of range ({} available)",
                level,
                self.header.num_resolutions()
            )));
        }

        let (level_w, level_h) = self.header.level_dimensions(level);
        let mut params = DecodeParameters::new().reduce(level as u32);

        let clipped = region.map(|r| r.clipped_to(level_w, level_h));
        if let Some(r) = clipped {
            if r.is_empty() {
                return Err(Error::InvalidRequest("region selects no pixels".into()));
            }
            // The decode area is specified on the full reference grid.
            let scale = 1u32 << level;
            params = params.decode_area(Some(DecodeArea::new(
                r.x * scale,
                r.y * scale,
                r.right() * scale,
                r.bottom() * scale,
            )));
        }

        let decoded = Jp2Image::from_bytes_with(&self.data, params)
            .map_err(|e| Error::Internal(format!("JPEG2000 decode: {}", e)))?;
        let dynamic: image::DynamicImage = (&decoded)
            .try_into()
            .map_err(|e| Error::Internal(format!("JPEG2000 convert: {}", e)))?;

        let mut matrix = PixelMatrix::new(dynamic);

        // The codec rounds the decode area outward to code-block boundaries;
        // trim any slack so the result is exactly the requested region.
        if let Some(r) = clipped {
            if matrix.width() > r.width || matrix.height() > r.height {
                matrix = matrix.crop(Region::new(0, 0, r.width, r.height));
            }
        }

        matrix = matrix.decimate(subsample.max(1));
        matrix = self.options.finish(matrix);

        Ok((
            matrix,
            ReadHints {
                already_cropped: clipped.is_some(),
            },
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    // Decoding needs real codestreams, which are produced by the native
    // codec; geometry and level selection over JPEG2000 headers are covered
    // in format::jp2. Here we only pin the level-bounds contract against a
    // reader built from a synthetic header.

    use super::*;
    use crate::io::MemoryRangeReader;

    fn synthetic_codestream() -> Vec<u8> {
        // SOC + SIZ(1024x768, 1 component) + COD(3 levels) + SOD
        let mut data = vec![0xFF, 0x4F];
        let mut siz = Vec::new();
        siz.extend_from_slice(&0u16.to_be_bytes());
        siz.extend_from_slice(&1024u32.to_be_bytes());
        siz.extend_from_slice(&768u32.to_be_bytes());
        siz.extend_from_slice(&0u32.to_be_bytes());
        siz.extend_from_slice(&0u32.to_be_bytes());
        siz.extend_from_slice(&1024u32.to_be_bytes());
        siz.extend_from_slice(&768u32.to_be_bytes());
        siz.extend_from_slice(&0u32.to_be_bytes());
        siz.extend_from_slice(&0u32.to_be_bytes());
        siz.extend_from_slice(&1u16.to_be_bytes());
        siz.extend_from_slice(&[7, 1, 1]);
        data.extend_from_slice(&[0xFF, 0x51]);
        data.extend_from_slice(&((siz.len() + 2) as u16).to_be_bytes());
        data.extend_from_slice(&siz);
        let cod = vec![0, 0, 0, 1, 0, 3, 4, 4, 0, 0];
        data.extend_from_slice(&[0xFF, 0x52]);
        data.extend_from_slice(&((cod.len() + 2) as u16).to_be_bytes());
        data.extend_from_slice(&cod);
        data.extend_from_slice(&[0xFF, 0x93]);
        data
    }

    #[tokio::test]
    async fn test_open_exposes_wavelet_levels() {
        let source = Arc::new(MemoryRangeReader::new(synthetic_codestream(), "mem://a.jp2"));
        let reader = Jp2Reader::open(source, "a.jp2", ReaderOptions::default())
            .await
            .unwrap();

        let info = reader.info();
        assert_eq!(info.num_resolutions(), 4);
        assert_eq!((info.width, info.height), (1024, 768));
        assert_eq!(info.level(1).unwrap().width, 512);
        assert_eq!(info.level(3).unwrap().width, 128);
    }

    #[tokio::test]
    async fn test_level_out_of_range() {
        let source = Arc::new(MemoryRangeReader::new(synthetic_codestream(), "mem://a.jp2"));
        let reader = Jp2Reader::open(source, "a.jp2", ReaderOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            reader.read(9, None, 1).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_garbage() {
        let source = Arc::new(MemoryRangeReader::new(b"nope".to_vec(), "mem://a.jp2"));
        assert!(
            Jp2Reader::open(source, "a.jp2", ReaderOptions::default())
                .await
                .is_err()
        );
    }
}
