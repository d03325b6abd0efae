//! Multi-resolution TIFF reader.
//!
//! Region reads walk the minimum set of tiles or strips covering the request,
//! decode each chunk independently, and composite into the output matrix.
//! Tiled levels give true random access; striped levels still bound work to
//! the covering bands. Per-chunk compression may be raw, LZW, Deflate, or
//! JPEG (including abbreviated streams sharing JPEGTables).
//!
//! Subsampling is applied as nearest-neighbor decimation while compositing,
//! so a subsampled read never materializes the full-resolution region.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::{
    DynamicImage, GenericImage, GenericImageView, GrayImage, Luma, Rgb, RgbImage, RgbaImage,
};
use tracing::{debug, warn};

use crate::error::{Error, TiffError};
use crate::format::jpeg::{is_abbreviated, merge_tables, strip_icc_profile};
use crate::format::tiff::{
    photometric, predictor, ByteOrder, CompressionScheme, Level, LevelData, PixelLayout, Pyramid,
};
use crate::format::Format;
use crate::image::{ImageInfo, LevelInfo, PixelMatrix, Region};
use crate::io::RangeReader;

use super::{ImageReader, ReadHints, ReaderOptions};

// =============================================================================
// TiffReader
// =============================================================================

/// Reader for tiled and striped TIFF/BigTIFF files, pyramidal or flat.
pub struct TiffReader {
    source: Arc<dyn RangeReader>,
    pyramid: Pyramid,
    level_data: Vec<LevelData>,
    info: ImageInfo,
    options: ReaderOptions,
}

impl TiffReader {
    /// Open a TIFF source: parse the pyramid and load chunk location arrays.
    ///
    /// Fails fast when any level uses a compression scheme we cannot decode.
    pub async fn open(
        source: Arc<dyn RangeReader>,
        identifier: &str,
        options: ReaderOptions,
    ) -> Result<Self, Error> {
        let pyramid = Pyramid::parse(source.as_ref()).await.map_err(Error::from)?;
        if pyramid.levels.is_empty() {
            return Err(Error::UnsupportedSourceFormat(format!(
                "{}: no decodable images in TIFF",
                identifier
            )));
        }

        let mut level_data = Vec::with_capacity(pyramid.levels.len());
        for level in &pyramid.levels {
            if !level.compression.is_supported() {
                return Err(Error::from(TiffError::UnsupportedCompression(
                    level.compression.name(),
                )));
            }
            let data = LevelData::load(source.as_ref(), level, &pyramid.header)
                .await
                .map_err(Error::from)?;
            level_data.push(data);
        }

        let base = &pyramid.levels[0];
        let info = ImageInfo {
            identifier: identifier.to_string(),
            format: Format::Tiff,
            width: base.width,
            height: base.height,
            levels: pyramid
                .levels
                .iter()
                .map(|l| {
                    let (tw, th) = match l.layout {
                        PixelLayout::Tiled {
                            tile_width,
                            tile_height,
                        } => (tile_width, tile_height),
                        PixelLayout::Striped { .. } => (0, 0),
                    };
                    LevelInfo {
                        width: l.width,
                        height: l.height,
                        tile_width: tw,
                        tile_height: th,
                    }
                })
                .collect(),
            bits_per_sample: base.bits_per_sample.min(255) as u8,
            samples_per_pixel: base.samples_per_pixel.min(255) as u8,
            has_color_profile: level_data.iter().any(|d| d.icc_profile.is_some()),
        };

        debug!(
            identifier,
            levels = pyramid.levels.len(),
            width = base.width,
            height = base.height,
            tiled = base.is_tiled(),
            "opened TIFF"
        );

        Ok(TiffReader {
            source,
            pyramid,
            level_data,
            info,
            options,
        })
    }

    /// Decode one chunk into pixels at its natural dimensions.
    async fn decode_chunk(
        &self,
        level: &Level,
        data: &LevelData,
        cx: u32,
        cy: u32,
    ) -> Result<DynamicImage, TiffError> {
        let index = level
            .chunk_index(cx, cy)
            .ok_or_else(|| TiffError::Decode(format!("chunk ({}, {}) out of grid", cx, cy)))?;
        let (offset, count) = data
            .chunk_location(index)
            .ok_or_else(|| TiffError::Decode(format!("no location for chunk {}", index)))?;

        let bytes = self.source.read_exact_at(offset, count as usize).await?;

        match level.compression {
            CompressionScheme::Jpeg => self.decode_jpeg_chunk(&bytes, data.jpeg_tables.as_ref()),
            CompressionScheme::Uncompressed => {
                self.decode_raw_chunk(level, cx, cy, bytes.to_vec())
            }
            CompressionScheme::Lzw => {
                let mut decoder =
                    weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
                let raw = decoder
                    .decode(&bytes)
                    .map_err(|e| TiffError::Decode(format!("LZW: {}", e)))?;
                self.decode_raw_chunk(level, cx, cy, raw)
            }
            CompressionScheme::Deflate => {
                let mut raw = Vec::new();
                flate2::read::ZlibDecoder::new(&bytes[..])
                    .read_to_end(&mut raw)
                    .map_err(|e| TiffError::Decode(format!("deflate: {}", e)))?;
                self.decode_raw_chunk(level, cx, cy, raw)
            }
            other => Err(TiffError::UnsupportedCompression(other.name())),
        }
    }

    /// Decode a JPEG chunk, merging shared tables for abbreviated streams.
    ///
    /// When decoding fails and the stream embeds an ICC profile, the profile
    /// is stripped and the decode retried — some writers embed profiles that
    /// contradict the sample layout, and dropping the profile preserves color
    /// where re-reading as grayscale would not.
    fn decode_jpeg_chunk(
        &self,
        bytes: &[u8],
        tables: Option<&Bytes>,
    ) -> Result<DynamicImage, TiffError> {
        let stream: Bytes = match tables {
            Some(tables) if is_abbreviated(bytes) => merge_tables(tables, bytes),
            _ => Bytes::copy_from_slice(bytes),
        };

        match image::load_from_memory_with_format(&stream, image::ImageFormat::Jpeg) {
            Ok(img) => Ok(img),
            Err(first_err) => {
                let stripped = strip_icc_profile(&stream);
                if stripped.len() == stream.len() {
                    return Err(TiffError::Decode(first_err.to_string()));
                }
                warn!("JPEG chunk failed with embedded ICC profile, retrying without it");
                image::load_from_memory_with_format(&stripped, image::ImageFormat::Jpeg)
                    .map_err(|e| TiffError::Decode(e.to_string()))
            }
        }
    }

    /// Turn decompressed raw samples into pixels.
    fn decode_raw_chunk(
        &self,
        level: &Level,
        cx: u32,
        cy: u32,
        mut raw: Vec<u8>,
    ) -> Result<DynamicImage, TiffError> {
        // Tiles are padded to full nominal size; strips carry exactly their
        // rows at full level width.
        let (chunk_w, chunk_h) = match level.layout {
            PixelLayout::Tiled { .. } => level.chunk_size(),
            PixelLayout::Striped { .. } => level
                .chunk_dimensions(cx, cy)
                .ok_or_else(|| TiffError::Decode("strip out of grid".into()))?,
        };

        let samples = level.samples_per_pixel.max(1) as usize;
        let bytes_per_sample = (level.bits_per_sample as usize).div_ceil(8);
        let row_bytes = chunk_w as usize * samples * bytes_per_sample;
        if row_bytes == 0 {
            return Err(TiffError::Decode("degenerate chunk geometry".into()));
        }

        // Tolerate writers that truncate the final chunk.
        let rows = (raw.len() / row_bytes).min(chunk_h as usize);
        if rows == 0 {
            return Err(TiffError::Decode("chunk shorter than one row".into()));
        }
        raw.truncate(rows * row_bytes);

        if level.predictor == predictor::HORIZONTAL {
            undo_horizontal_predictor(&mut raw, row_bytes, samples, bytes_per_sample);
        }

        let w = chunk_w;
        let h = rows as u32;
        let invert = level.photometric == photometric::WHITE_IS_ZERO;

        match (level.bits_per_sample, samples) {
            (8, 1) => {
                if invert {
                    for v in raw.iter_mut() {
                        *v = u8::MAX - *v;
                    }
                }
                GrayImage::from_raw(w, h, raw)
                    .map(DynamicImage::ImageLuma8)
                    .ok_or_else(|| TiffError::Decode("gray buffer size mismatch".into()))
            }
            (8, 3) => RgbImage::from_raw(w, h, raw)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| TiffError::Decode("rgb buffer size mismatch".into())),
            (8, 4) => RgbaImage::from_raw(w, h, raw)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| TiffError::Decode("rgba buffer size mismatch".into())),
            (16, 1) => {
                let mut v16 = decode_u16_samples(&raw, self.pyramid.header.byte_order);
                if invert {
                    for v in v16.iter_mut() {
                        *v = u16::MAX - *v;
                    }
                }
                image::ImageBuffer::<Luma<u16>, _>::from_raw(w, h, v16)
                    .map(DynamicImage::ImageLuma16)
                    .ok_or_else(|| TiffError::Decode("gray16 buffer size mismatch".into()))
            }
            (16, 3) => {
                let v16 = decode_u16_samples(&raw, self.pyramid.header.byte_order);
                image::ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, v16)
                    .map(DynamicImage::ImageRgb16)
                    .ok_or_else(|| TiffError::Decode("rgb16 buffer size mismatch".into()))
            }
            (bits, n) => Err(TiffError::Decode(format!(
                "unsupported sample layout: {} bits × {} samples",
                bits, n
            ))),
        }
    }
}

#[async_trait]
impl ImageReader for TiffReader {
    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn metadata(&self, level: usize) -> Option<Bytes> {
        self.level_data.get(level)?.description.clone()
    }

    async fn read(
        &self,
        level_index: usize,
        region: Option<Region>,
        subsample: u32,
    ) -> Result<(PixelMatrix, ReadHints), Error> {
        let level = self.pyramid.level(level_index).ok_or_else(|| {
            Error::InvalidRequest(format!(
                "level {} out of range ({} available)",
                level_index,
                self.pyramid.level_count()
            ))
        })?;
        let data = &self.level_data[level_index];

        let region = region
            .unwrap_or_else(|| Region::full(level.width, level.height))
            .clipped_to(level.width, level.height);
        if region.is_empty() {
            return Err(Error::InvalidRequest("region selects no pixels".into()));
        }

        let step = subsample.max(1);
        let mut canvas = Canvas::new(
            (region.width + step - 1) / step,
            (region.height + step - 1) / step,
            level.bits_per_sample,
            level.samples_per_pixel,
        );

        let (chunk_w, chunk_h) = level.chunk_size();
        let cx0 = region.x / chunk_w;
        let cx1 = (region.right() - 1) / chunk_w;
        let cy0 = region.y / chunk_h;
        let cy1 = (region.bottom() - 1) / chunk_h;

        debug!(
            identifier = self.source.identifier(),
            level = level_index,
            ?region,
            step,
            chunks = (cx1 - cx0 + 1) * (cy1 - cy0 + 1),
            "TIFF region read"
        );

        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                let decoded = self
                    .decode_chunk(level, data, cx, cy)
                    .await
                    .map_err(Error::from)?;

                // Clip the padded decode to the chunk's real extent, then to
                // the requested region.
                let (actual_w, actual_h) = level
                    .chunk_dimensions(cx, cy)
                    .unwrap_or((decoded.width(), decoded.height()));
                let chunk_rect = Region::new(
                    cx * chunk_w,
                    cy * chunk_h,
                    actual_w.min(decoded.width()),
                    actual_h.min(decoded.height()),
                );
                let inter = region.intersect(&chunk_rect);
                if inter.is_empty() {
                    continue;
                }

                let piece = decoded.crop_imm(
                    inter.x - chunk_rect.x,
                    inter.y - chunk_rect.y,
                    inter.width,
                    inter.height,
                );
                canvas.blit(&piece, inter, region, step).map_err(Error::from)?;
            }
        }

        let matrix =
            PixelMatrix::with_profile(canvas.into_dynamic(), data.icc_profile.clone());
        let matrix = self.options.finish(matrix);

        Ok((
            matrix,
            ReadHints {
                already_cropped: true,
            },
        ))
    }
}

// =============================================================================
// Compositing Canvas
// =============================================================================

/// Output buffer matched to the level's sample layout.
enum Canvas {
    Gray8(GrayImage),
    Rgb8(RgbImage),
    Rgba8(RgbaImage),
    Gray16(image::ImageBuffer<Luma<u16>, Vec<u16>>),
    Rgb16(image::ImageBuffer<Rgb<u16>, Vec<u16>>),
}

impl Canvas {
    fn new(width: u32, height: u32, bits: u16, samples: u16) -> Self {
        match (bits, samples) {
            (16, 1) => Canvas::Gray16(image::ImageBuffer::new(width, height)),
            (16, _) => Canvas::Rgb16(image::ImageBuffer::new(width, height)),
            (_, 1) => Canvas::Gray8(GrayImage::new(width, height)),
            (_, 4) => Canvas::Rgba8(RgbaImage::new(width, height)),
            _ => Canvas::Rgb8(RgbImage::new(width, height)),
        }
    }

    /// Copy `piece` (exactly `inter`-sized) into the canvas, decimating by
    /// `step`. `inter` and `region` are in level coordinates; the canvas
    /// holds `region` decimated by `step`.
    fn blit(
        &mut self,
        piece: &DynamicImage,
        inter: Region,
        region: Region,
        step: u32,
    ) -> Result<(), TiffError> {
        match self {
            Canvas::Gray8(canvas) => blit_buffer(canvas, &piece.to_luma8(), inter, region, step),
            Canvas::Rgb8(canvas) => blit_buffer(canvas, &piece.to_rgb8(), inter, region, step),
            Canvas::Rgba8(canvas) => blit_buffer(canvas, &piece.to_rgba8(), inter, region, step),
            Canvas::Gray16(canvas) => blit_buffer(canvas, &piece.to_luma16(), inter, region, step),
            Canvas::Rgb16(canvas) => blit_buffer(canvas, &piece.to_rgb16(), inter, region, step),
        }
    }

    fn into_dynamic(self) -> DynamicImage {
        match self {
            Canvas::Gray8(i) => DynamicImage::ImageLuma8(i),
            Canvas::Rgb8(i) => DynamicImage::ImageRgb8(i),
            Canvas::Rgba8(i) => DynamicImage::ImageRgba8(i),
            Canvas::Gray16(i) => DynamicImage::ImageLuma16(i),
            Canvas::Rgb16(i) => DynamicImage::ImageRgb16(i),
        }
    }
}

/// Blit with decimation; `step == 1` degrades to a plain copy.
fn blit_buffer<P>(
    canvas: &mut image::ImageBuffer<P, Vec<P::Subpixel>>,
    piece: &image::ImageBuffer<P, Vec<P::Subpixel>>,
    inter: Region,
    region: Region,
    step: u32,
) -> Result<(), TiffError>
where
    P: image::Pixel + 'static,
{
    if step <= 1 {
        return canvas
            .copy_from(piece, inter.x - region.x, inter.y - region.y)
            .map_err(|e| TiffError::Decode(e.to_string()));
    }

    // Canvas pixels whose sample point falls inside `inter`.
    let x0 = (inter.x - region.x).div_ceil(step);
    let y0 = (inter.y - region.y).div_ceil(step);
    let x1 = (inter.right() - 1 - region.x) / step;
    let y1 = (inter.bottom() - 1 - region.y) / step;

    for cy in y0..=y1.min(canvas.height().saturating_sub(1)) {
        let sy = region.y + cy * step - inter.y;
        for cx in x0..=x1.min(canvas.width().saturating_sub(1)) {
            let sx = region.x + cx * step - inter.x;
            canvas.put_pixel(cx, cy, *piece.get_pixel(sx, sy));
        }
    }
    Ok(())
}

/// Reverse per-row horizontal differencing in place.
fn undo_horizontal_predictor(
    data: &mut [u8],
    row_bytes: usize,
    samples: usize,
    bytes_per_sample: usize,
) {
    if bytes_per_sample == 1 {
        for row in data.chunks_exact_mut(row_bytes) {
            for i in samples..row.len() {
                row[i] = row[i].wrapping_add(row[i - samples]);
            }
        }
    } else {
        // 16-bit differencing operates on sample values, not bytes.
        for row in data.chunks_exact_mut(row_bytes) {
            let stride = samples * 2;
            for i in (stride..row.len()).step_by(2) {
                let prev = u16::from_ne_bytes([row[i - stride], row[i - stride + 1]]);
                let cur = u16::from_ne_bytes([row[i], row[i + 1]]);
                let sum = cur.wrapping_add(prev).to_ne_bytes();
                row[i] = sum[0];
                row[i + 1] = sum[1];
            }
        }
    }
}

/// Reassemble u16 samples honoring the file's byte order.
fn decode_u16_samples(raw: &[u8], order: ByteOrder) -> Vec<u16> {
    raw.chunks_exact(2)
        .map(|pair| order.u16(pair))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
