//! The operation pipeline executor.
//!
//! Given a reader and a normalized operation list, the executor picks the
//! cheapest resolution level that preserves quality, reads the minimum
//! region (with software subsampling where the level cannot reach the scale
//! alone), then applies the residual operations on a single in-memory matrix:
//! residual scale, transpose, rotate, color transform, sharpen, overlay, and
//! finally the writer. The full source image is never materialized.

use bytes::Bytes;
use image::{DynamicImage, GenericImageView, Rgba};
use tracing::debug;

use crate::config::Config;
use crate::error::Error;
use crate::format::Format;
use crate::image::{PixelMatrix, Region};
use crate::ops::{
    pick_level, subsample_for, ColorTransform, Crop, OperationList, Operation, OverlayPosition,
    Scale, Transpose,
};
use crate::reader::ImageReader;
use crate::writer;

/// Executes operation lists against an opened reader.
pub struct PipelineExecutor<'a> {
    config: &'a Config,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Run the pipeline: decode the minimum region, apply residual
    /// operations, and encode. Returns the derivative bytes and their format.
    pub async fn execute(
        &self,
        reader: &dyn ImageReader,
        ops: &OperationList,
    ) -> Result<(Bytes, Format), Error> {
        let info = reader.info().clone();

        // 1. Resolve the crop in full-image coordinates.
        let crop = ops.crop().cloned().unwrap_or(Crop::Full);
        let full_region = crop.resolve(info.width, info.height)?;

        // 2. Pick the level for the requested scale.
        let scale = ops.scale().copied().unwrap_or(Scale::Full);
        let t = scale.level_factor(full_region.width, full_region.height);
        let choice = pick_level(t, info.width, &info.levels);
        let level = info
            .level(choice.level)
            .copied()
            .ok_or_else(|| Error::Internal("level selection out of range".into()))?;

        // 3. Translate the crop into level coordinates, rounding half away
        // from zero, and clip to the level extent.
        let ratio = level.width as f64 / info.width as f64;
        let level_region = Region::new(
            (full_region.x as f64 * ratio).round() as u32,
            (full_region.y as f64 * ratio).round() as u32,
            (full_region.width as f64 * ratio).round() as u32,
            (full_region.height as f64 * ratio).round() as u32,
        )
        .clipped_to(level.width, level.height);
        if level_region.is_empty() {
            return Err(Error::InvalidRequest("crop selects no pixels".into()));
        }

        // 4. Whatever the level cannot reach becomes a software subsample.
        let (extra, step) = subsample_for(choice.residual);

        debug!(
            identifier = %info.identifier,
            level = choice.level,
            reduction = choice.reduction.0 + extra.0,
            subsample = step,
            residual = choice.residual,
            ?level_region,
            "pipeline plan"
        );

        let read_timeout = std::time::Duration::from_secs(self.config.read_timeout_secs);
        let (mut matrix, hints) = tokio::time::timeout(
            read_timeout,
            reader.read(choice.level, Some(level_region), step),
        )
        .await
        .map_err(|_| Error::Timeout {
            stage: "source read",
            seconds: self.config.read_timeout_secs,
        })??;

        // 5. Crop here only if the reader did not.
        if !hints.already_cropped {
            matrix = matrix.crop(Region::new(
                level_region.x / step,
                level_region.y / step,
                level_region.width.div_ceil(step),
                level_region.height.div_ceil(step),
            ));
        }

        // 6. Residual scale to the exact target size.
        let (target_w, target_h) =
            scale.target_dimensions(full_region.width, full_region.height);
        if (matrix.width(), matrix.height()) != (target_w, target_h) {
            // The level and subsample got us within a factor of two;
            // Lanczos covers the rest. Nearest is only ever the no-op case
            // handled by the equality check above.
            matrix = matrix.map(|img| {
                img.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3)
            });
        }

        // 7. Remaining operations in canonical order.
        for op in ops.iter() {
            matrix = match op {
                Operation::Crop(_) | Operation::Scale(_) | Operation::Encode(_) => matrix,
                Operation::Transpose(axis) => apply_transpose(matrix, *axis),
                Operation::Rotate(rotate) => apply_rotate(matrix, rotate.degrees),
                Operation::ColorTransform(transform) => apply_color(matrix, *transform),
                Operation::Sharpen(sharpen) => {
                    matrix.map(|img| img.unsharpen(sharpen.amount, 1))
                }
                Operation::Overlay(overlay) => apply_overlay(matrix, overlay)?,
            };
        }

        // 8. Encode.
        let encode = ops.encode();
        let metadata = reader.metadata(0);
        let bytes = writer::encode(
            &matrix,
            encode,
            info.format,
            metadata.as_ref(),
            self.config.preserve_metadata,
        )?;

        Ok((bytes, encode.format))
    }
}

// =============================================================================
// Residual Operations
// =============================================================================

fn apply_transpose(matrix: PixelMatrix, axis: Transpose) -> PixelMatrix {
    matrix.map(|img| match axis {
        Transpose::Horizontal => img.fliph(),
        Transpose::Vertical => img.flipv(),
    })
}

/// Rotate with bilinear sampling over a transparent expanded canvas.
///
/// Quarter turns stay exact and lossless; anything else is composited into
/// the rotated bounding box.
fn apply_rotate(matrix: PixelMatrix, degrees: f64) -> PixelMatrix {
    if degrees == 0.0 {
        return matrix;
    }
    if degrees == 90.0 {
        return matrix.map(|img| img.rotate90());
    }
    if degrees == 180.0 {
        return matrix.map(|img| img.rotate180());
    }
    if degrees == 270.0 {
        return matrix.map(|img| img.rotate270());
    }

    matrix.map(|img| {
        let (w, h) = img.dimensions();
        let radians = degrees.to_radians();
        let (sin, cos) = (radians.sin().abs(), radians.cos().abs());

        // Output canvas is the rotated bounding box; the rotation itself
        // happens on a diagonal-sized square so no corner leaves the frame
        // mid-transform.
        let out_w = (w as f64 * cos + h as f64 * sin).ceil() as u32;
        let out_h = (w as f64 * sin + h as f64 * cos).ceil() as u32;
        let side = ((w as f64).hypot(h as f64)).ceil() as u32;

        let mut canvas = image::RgbaImage::from_pixel(side, side, Rgba([0, 0, 0, 0]));
        image::imageops::overlay(
            &mut canvas,
            &img.to_rgba8(),
            ((side - w) / 2) as i64,
            ((side - h) / 2) as i64,
        );

        let rotated = imageproc::geometric_transformations::rotate_about_center(
            &canvas,
            radians as f32,
            imageproc::geometric_transformations::Interpolation::Bilinear,
            Rgba([0, 0, 0, 0]),
        );

        DynamicImage::ImageRgba8(rotated).crop_imm(
            (side - out_w.min(side)) / 2,
            (side - out_h.min(side)) / 2,
            out_w.min(side),
            out_h.min(side),
        )
    })
}

fn apply_color(matrix: PixelMatrix, transform: ColorTransform) -> PixelMatrix {
    match transform {
        ColorTransform::Identity => matrix,
        ColorTransform::Gray => matrix.map(|img| DynamicImage::ImageLuma8(img.to_luma8())),
        ColorTransform::Bitonal => matrix.map(|img| {
            let rgb = img.to_rgb8();
            let out = image::GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let px = rgb.get_pixel(x, y);
                let luminance = 0.2126 * srgb_to_linear(px[0])
                    + 0.7152 * srgb_to_linear(px[1])
                    + 0.0722 * srgb_to_linear(px[2]);
                image::Luma([if luminance >= 0.5 { 255 } else { 0 }])
            });
            DynamicImage::ImageLuma8(out)
        }),
    }
}

/// sRGB component to linear light, [0, 1].
fn srgb_to_linear(v: u8) -> f64 {
    let v = v as f64 / 255.0;
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn apply_overlay(matrix: PixelMatrix, overlay: &crate::ops::Overlay) -> Result<PixelMatrix, Error> {
    let mark = image::load_from_memory(&overlay.image)
        .map_err(|e| Error::InvalidRequest(format!("undecodable overlay image: {}", e)))?
        .to_rgba8();

    Ok(matrix.map(|img| {
        let mut base = img.to_rgba8();
        let (bw, bh) = (base.width() as i64, base.height() as i64);
        let (mw, mh) = (mark.width() as i64, mark.height() as i64);
        let inset = overlay.inset as i64;

        let (x, y) = match overlay.position {
            OverlayPosition::TopLeft => (inset, inset),
            OverlayPosition::TopRight => (bw - mw - inset, inset),
            OverlayPosition::BottomLeft => (inset, bh - mh - inset),
            OverlayPosition::BottomRight => (bw - mw - inset, bh - mh - inset),
            OverlayPosition::Center => ((bw - mw) / 2, (bh - mh) / 2),
        };

        image::imageops::overlay(&mut base, &mark, x, y);
        DynamicImage::ImageRgba8(base)
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageInfo;
    use crate::ops::{Encode, Rotate, Sharpen};
    use crate::reader::{ReadHints, ReaderOptions};
    use async_trait::async_trait;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A reader over a synthetic in-memory pyramid; pixel (x, y) at level L
    /// holds ((x + y) % 251). Tracks which levels were read.
    struct PyramidStub {
        info: ImageInfo,
        reads: AtomicUsize,
        last_level: AtomicUsize,
        options: ReaderOptions,
    }

    impl PyramidStub {
        fn new(widths: &[u32]) -> Self {
            let levels = widths
                .iter()
                .map(|&w| crate::image::LevelInfo {
                    width: w,
                    height: w,
                    tile_width: 256,
                    tile_height: 256,
                })
                .collect();
            Self {
                info: ImageInfo {
                    identifier: "stub.tif".to_string(),
                    format: Format::Tiff,
                    width: widths[0],
                    height: widths[0],
                    levels,
                    bits_per_sample: 8,
                    samples_per_pixel: 1,
                    has_color_profile: false,
                },
                reads: AtomicUsize::new(0),
                last_level: AtomicUsize::new(usize::MAX),
                options: ReaderOptions::default(),
            }
        }
    }

    #[async_trait]
    impl ImageReader for PyramidStub {
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
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.last_level.store(level, Ordering::SeqCst);

            let dims = self.info.level(level).unwrap();
            let region = region.unwrap_or(Region::full(dims.width, dims.height));
            let step = subsample.max(1);

            let img = GrayImage::from_fn(
                region.width.div_ceil(step),
                region.height.div_ceil(step),
                |x, y| {
                    let lx = region.x + x * step;
                    let ly = region.y + y * step;
                    Luma([((lx + ly) % 251) as u8])
                },
            );
            let matrix = self
                .options
                .finish(PixelMatrix::new(DynamicImage::ImageLuma8(img)));
            Ok((matrix, ReadHints { already_cropped: true }))
        }
    }

    fn list(raw: Vec<Operation>) -> OperationList {
        OperationList::new(raw).unwrap()
    }

    fn png_encode() -> Operation {
        Operation::Encode(Encode::new(Format::Png))
    }

    #[tokio::test]
    async fn test_deep_zoom_uses_half_level() {
        // 10000px pyramid; crop 512² at (2048, 2048), fit to 256 → level 1.
        let reader = PyramidStub::new(&[10000, 5000, 2500, 1250]);
        let config = Config::standalone();
        let executor = PipelineExecutor::new(&config);

        let ops = list(vec![
            Operation::Crop(Crop::Pixels { x: 2048, y: 2048, width: 512, height: 512 }),
            Operation::Scale(Scale::FitInside(256, 256)),
            png_encode(),
        ]);

        let (bytes, format) = executor.execute(&reader, &ops).await.unwrap();
        assert_eq!(format, Format::Png);
        assert_eq!(reader.last_level.load(Ordering::SeqCst), 1);

        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (256, 256));
    }

    #[tokio::test]
    async fn test_non_pyramidal_quarter_scale_subsamples() {
        // One 8000px level at 25%: level 0 with subsample, output 2000².
        let reader = PyramidStub::new(&[8000]);
        let config = Config::standalone();
        let executor = PipelineExecutor::new(&config);

        let ops = list(vec![
            Operation::Scale(Scale::Percent(0.25)),
            png_encode(),
        ]);

        let (bytes, _) = executor.execute(&reader, &ops).await.unwrap();
        assert_eq!(reader.last_level.load(Ordering::SeqCst), 0);

        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (2000, 2000));
    }

    #[tokio::test]
    async fn test_unscaled_crop_reads_level_zero() {
        let reader = PyramidStub::new(&[4000, 2000]);
        let config = Config::standalone();
        let executor = PipelineExecutor::new(&config);

        let ops = list(vec![
            Operation::Crop(Crop::Pixels { x: 100, y: 100, width: 300, height: 200 }),
            png_encode(),
        ]);

        let (bytes, _) = executor.execute(&reader, &ops).await.unwrap();
        assert_eq!(reader.last_level.load(Ordering::SeqCst), 0);

        let img = image::load_from_memory(&bytes).unwrap().into_luma8();
        assert_eq!((img.width(), img.height()), (300, 200));
        // Pixel identity: output (0,0) is source (100,100).
        assert_eq!(img.get_pixel(0, 0)[0], 200 % 251);
    }

    #[tokio::test]
    async fn test_quarter_turn_rotation() {
        let reader = PyramidStub::new(&[400]);
        let config = Config::standalone();
        let executor = PipelineExecutor::new(&config);

        let ops = list(vec![
            Operation::Crop(Crop::Pixels { x: 0, y: 0, width: 100, height: 50 }),
            Operation::Rotate(Rotate::new(90.0)),
            png_encode(),
        ]);

        let (bytes, _) = executor.execute(&reader, &ops).await.unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (50, 100));
    }

    #[tokio::test]
    async fn test_arbitrary_rotation_expands_canvas() {
        let reader = PyramidStub::new(&[400]);
        let config = Config::standalone();
        let executor = PipelineExecutor::new(&config);

        let ops = list(vec![
            Operation::Crop(Crop::Pixels { x: 0, y: 0, width: 100, height: 100 }),
            Operation::Rotate(Rotate::new(45.0)),
            png_encode(),
        ]);

        let (bytes, _) = executor.execute(&reader, &ops).await.unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        // 100×100 rotated 45° needs ~142px on each side.
        assert!(img.width() >= 141 && img.width() <= 143);
        assert_eq!(img.width(), img.height());
        // Corners are transparent.
        assert_eq!(img.to_rgba8().get_pixel(0, 0)[3], 0);
    }

    #[tokio::test]
    async fn test_bitonal_threshold() {
        let reader = PyramidStub::new(&[400]);
        let config = Config::standalone();
        let executor = PipelineExecutor::new(&config);

        let ops = list(vec![
            Operation::ColorTransform(ColorTransform::Bitonal),
            png_encode(),
        ]);

        let (bytes, _) = executor.execute(&reader, &ops).await.unwrap();
        let img = image::load_from_memory(&bytes).unwrap().into_luma8();
        // Every pixel is 0 or 255.
        assert!(img.pixels().all(|p| p[0] == 0 || p[0] == 255));
        // The gradient contains both classes.
        assert!(img.pixels().any(|p| p[0] == 0));
        assert!(img.pixels().any(|p| p[0] == 255));
    }

    #[tokio::test]
    async fn test_sharpen_runs() {
        let reader = PyramidStub::new(&[400]);
        let config = Config::standalone();
        let executor = PipelineExecutor::new(&config);

        let ops = list(vec![
            Operation::Sharpen(Sharpen { amount: 1.5 }),
            png_encode(),
        ]);
        assert!(executor.execute(&reader, &ops).await.is_ok());
    }

    #[tokio::test]
    async fn test_idempotent_output() {
        let reader = PyramidStub::new(&[1000, 500]);
        let config = Config::standalone();
        let executor = PipelineExecutor::new(&config);

        let ops = list(vec![
            Operation::Crop(Crop::SquareCenter),
            Operation::Scale(Scale::FitInside(128, 128)),
            png_encode(),
        ]);

        let (a, _) = executor.execute(&reader, &ops).await.unwrap();
        let (b, _) = executor.execute(&reader, &ops).await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_srgb_linearization_endpoints() {
        assert!(srgb_to_linear(0) < 1e-9);
        assert!((srgb_to_linear(255) - 1.0).abs() < 1e-9);
        // 50% threshold sits near v=188 in sRGB.
        assert!(srgb_to_linear(187) < 0.5);
        assert!(srgb_to_linear(189) > 0.5);
    }
}
