//! The operation vocabulary and normalized operation lists.
//!
//! An [`OperationList`] is the complete description of a derivative: an
//! optional crop and scale, orientation and color adjustments, and exactly
//! one terminal encode. Construction normalizes the sequence into canonical
//! order (crop → scale → transpose → rotate → color → sharpen → overlay →
//! encode) and validates every operand; anything that fails validation is an
//! [`Error::InvalidRequest`] before any source byte is touched.

mod fingerprint;
mod reduction;

pub use fingerprint::Fingerprint;
pub use reduction::{pick_level, subsample_for, LevelChoice, ReductionFactor};

use crate::error::Error;
use crate::format::Format;
use crate::image::Region;

// =============================================================================
// Crop
// =============================================================================

/// Region selection in full-image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Crop {
    /// The whole image.
    Full,

    /// A pixel-aligned rectangle; clipped to the image extent on resolve.
    Pixels { x: u32, y: u32, width: u32, height: u32 },

    /// A rectangle in unit fractions of the full size.
    Percent { x: f64, y: f64, width: f64, height: f64 },

    /// The centered square with side min(width, height).
    SquareCenter,
}

impl Crop {
    /// Whether this crop selects every pixel.
    pub fn is_full(&self) -> bool {
        matches!(self, Crop::Full)
    }

    fn validate(&self) -> Result<(), Error> {
        match *self {
            Crop::Full | Crop::SquareCenter => Ok(()),
            Crop::Pixels { width, height, .. } => {
                if width == 0 || height == 0 {
                    Err(Error::InvalidRequest("crop width and height must be positive".into()))
                } else {
                    Ok(())
                }
            }
            Crop::Percent { x, y, width, height } => {
                let in_unit = (0.0..=1.0).contains(&x)
                    && (0.0..=1.0).contains(&y)
                    && width > 0.0
                    && height > 0.0
                    && width <= 1.0
                    && height <= 1.0;
                if in_unit {
                    Ok(())
                } else {
                    Err(Error::InvalidRequest("percent crop out of [0, 1]".into()))
                }
            }
        }
    }

    /// Resolve to a concrete full-image region, clipped to the extent.
    pub fn resolve(&self, full_width: u32, full_height: u32) -> Result<Region, Error> {
        let region = match *self {
            Crop::Full => Region::full(full_width, full_height),
            Crop::Pixels { x, y, width, height } => {
                Region::new(x, y, width, height).clipped_to(full_width, full_height)
            }
            Crop::Percent { x, y, width, height } => Region::new(
                (x * full_width as f64).round() as u32,
                (y * full_height as f64).round() as u32,
                (width * full_width as f64).round() as u32,
                (height * full_height as f64).round() as u32,
            )
            .clipped_to(full_width, full_height),
            Crop::SquareCenter => {
                let side = full_width.min(full_height);
                Region::new(
                    (full_width - side) / 2,
                    (full_height - side) / 2,
                    side,
                    side,
                )
            }
        };
        if region.is_empty() {
            return Err(Error::InvalidRequest(
                "crop selects no pixels inside the image".into(),
            ));
        }
        Ok(region)
    }

    fn token(&self) -> String {
        match *self {
            Crop::Full => "crop:full".into(),
            Crop::Pixels { x, y, width, height } => {
                format!("crop:px,{},{},{},{}", x, y, width, height)
            }
            Crop::Percent { x, y, width, height } => {
                format!("crop:pct,{},{},{},{}", x, y, width, height)
            }
            Crop::SquareCenter => "crop:square".into(),
        }
    }
}

// =============================================================================
// Scale
// =============================================================================

/// Output sizing relative to the cropped region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// Keep the region size.
    Full,

    /// Uniform fraction of the region size; 1.0 ≡ `Full`.
    Percent(f64),

    /// Fit to an exact width, preserving aspect.
    FitWidth(u32),

    /// Fit to an exact height, preserving aspect.
    FitHeight(u32),

    /// Largest aspect-preserving size inside the box.
    FitInside(u32, u32),

    /// Exact box, aspect not preserved.
    NonAspectFill(u32, u32),
}

impl Scale {
    /// Whether this scale changes nothing.
    pub fn is_noop(&self) -> bool {
        matches!(self, Scale::Full) || matches!(self, Scale::Percent(p) if *p == 1.0)
    }

    fn validate(&self) -> Result<(), Error> {
        let ok = match *self {
            Scale::Full => true,
            Scale::Percent(p) => p > 0.0 && p <= 1.0,
            Scale::FitWidth(w) => w > 0,
            Scale::FitHeight(h) => h > 0,
            Scale::FitInside(w, h) | Scale::NonAspectFill(w, h) => w > 0 && h > 0,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidRequest(format!("invalid scale {:?}", self)))
        }
    }

    /// The linear factor a resolution level must support for this scale over
    /// a `region_width`×`region_height` source region.
    ///
    /// For box fits this is the more demanding axis, so the chosen level is
    /// always good enough for both.
    pub fn level_factor(&self, region_width: u32, region_height: u32) -> f64 {
        match *self {
            Scale::Full => 1.0,
            Scale::Percent(p) => p,
            Scale::FitWidth(w) => w as f64 / region_width as f64,
            Scale::FitHeight(h) => h as f64 / region_height as f64,
            Scale::FitInside(w, h) | Scale::NonAspectFill(w, h) => {
                let wr = w as f64 / region_width as f64;
                let hr = h as f64 / region_height as f64;
                wr.max(hr)
            }
        }
    }

    /// Target output dimensions for a region of the given size.
    pub fn target_dimensions(&self, region_width: u32, region_height: u32) -> (u32, u32) {
        let dims = match *self {
            Scale::Full => (region_width as f64, region_height as f64),
            Scale::Percent(p) => (region_width as f64 * p, region_height as f64 * p),
            Scale::FitWidth(w) => {
                let r = w as f64 / region_width as f64;
                (w as f64, region_height as f64 * r)
            }
            Scale::FitHeight(h) => {
                let r = h as f64 / region_height as f64;
                (region_width as f64 * r, h as f64)
            }
            Scale::FitInside(w, h) => {
                let r = (w as f64 / region_width as f64).min(h as f64 / region_height as f64);
                (region_width as f64 * r, region_height as f64 * r)
            }
            Scale::NonAspectFill(w, h) => (w as f64, h as f64),
        };
        ((dims.0.round() as u32).max(1), (dims.1.round() as u32).max(1))
    }

    fn token(&self) -> String {
        match *self {
            Scale::Full => "scale:full".into(),
            Scale::Percent(p) => format!("scale:pct,{}", p),
            Scale::FitWidth(w) => format!("scale:fw,{}", w),
            Scale::FitHeight(h) => format!("scale:fh,{}", h),
            Scale::FitInside(w, h) => format!("scale:fit,{},{}", w, h),
            Scale::NonAspectFill(w, h) => format!("scale:fill,{},{}", w, h),
        }
    }
}

// =============================================================================
// Orientation, Color, Filters
// =============================================================================

/// Mirror across an axis, applied before any rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    Horizontal,
    Vertical,
}

/// Clockwise rotation in degrees, [0, 360).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotate {
    pub degrees: f64,
}

impl Rotate {
    pub fn new(degrees: f64) -> Self {
        Self { degrees }
    }

    /// Whether this rotation changes nothing.
    pub fn is_noop(&self) -> bool {
        self.degrees == 0.0
    }

    fn validate(&self) -> Result<(), Error> {
        if (0.0..360.0).contains(&self.degrees) {
            Ok(())
        } else {
            Err(Error::InvalidRequest(format!(
                "rotation {} out of [0, 360)",
                self.degrees
            )))
        }
    }
}

/// Colorspace reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTransform {
    Identity,
    Gray,
    /// 50% threshold over linear luminance.
    Bitonal,
}

/// Unsharp-mask strength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sharpen {
    pub amount: f32,
}

impl Sharpen {
    fn validate(&self) -> Result<(), Error> {
        if self.amount > 0.0 {
            Ok(())
        } else {
            Err(Error::InvalidRequest("sharpen amount must be positive".into()))
        }
    }
}

/// Where an overlay is pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

/// A watermark-style overlay composited after all geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// Encoded overlay image bytes (any readable format).
    pub image: bytes::Bytes,
    pub position: OverlayPosition,
    /// Pixel inset from the pinned corner.
    pub inset: u32,
}

// =============================================================================
// Encode
// =============================================================================

/// Compression choices for the TIFF writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffCompression {
    None,
    Lzw,
    Deflate,
    Jpeg,
}

/// The terminal encode of every operation list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Encode {
    pub format: Format,
    /// JPEG quality 0–100; ignored by other writers.
    pub quality: u8,
    /// TIFF compression; ignored by other writers.
    pub compression: TiffCompression,
}

impl Encode {
    /// Encode with per-format defaults (quality 80, LZW).
    pub fn new(format: Format) -> Self {
        Self {
            format,
            quality: 80,
            compression: TiffCompression::Lzw,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.format.is_writable() {
            return Err(Error::UnsupportedOutputFormat(
                self.format.name().to_string(),
            ));
        }
        if self.quality > 100 {
            return Err(Error::InvalidRequest(format!(
                "quality {} out of 0-100",
                self.quality
            )));
        }
        Ok(())
    }

    fn token(&self) -> String {
        format!(
            "encode:{},{},{:?}",
            self.format.extension(),
            self.quality,
            self.compression
        )
    }
}

// =============================================================================
// Operation & OperationList
// =============================================================================

/// One step of a derivative request.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Crop(Crop),
    Scale(Scale),
    Transpose(Transpose),
    Rotate(Rotate),
    ColorTransform(ColorTransform),
    Sharpen(Sharpen),
    Overlay(Overlay),
    Encode(Encode),
}

impl Operation {
    /// Canonical-order rank.
    fn rank(&self) -> u8 {
        match self {
            Operation::Crop(_) => 0,
            Operation::Scale(_) => 1,
            Operation::Transpose(_) => 2,
            Operation::Rotate(_) => 3,
            Operation::ColorTransform(_) => 4,
            Operation::Sharpen(_) => 5,
            Operation::Overlay(_) => 6,
            Operation::Encode(_) => 7,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            Operation::Crop(c) => c.validate(),
            Operation::Scale(s) => s.validate(),
            Operation::Rotate(r) => r.validate(),
            Operation::Sharpen(s) => s.validate(),
            Operation::Encode(e) => e.validate(),
            _ => Ok(()),
        }
    }

    /// Stable token for fingerprinting.
    fn token(&self) -> String {
        match self {
            Operation::Crop(c) => c.token(),
            Operation::Scale(s) => s.token(),
            Operation::Transpose(Transpose::Horizontal) => "transpose:h".into(),
            Operation::Transpose(Transpose::Vertical) => "transpose:v".into(),
            Operation::Rotate(r) => format!("rotate:{}", r.degrees),
            Operation::ColorTransform(ColorTransform::Identity) => "color:identity".into(),
            Operation::ColorTransform(ColorTransform::Gray) => "color:gray".into(),
            Operation::ColorTransform(ColorTransform::Bitonal) => "color:bitonal".into(),
            Operation::Sharpen(s) => format!("sharpen:{}", s.amount),
            Operation::Overlay(o) => {
                // Content-address the overlay bytes so different watermarks
                // never share a fingerprint.
                use sha2::{Digest, Sha256};
                let digest = Sha256::digest(&o.image);
                format!(
                    "overlay:{:?},{},{}",
                    o.position,
                    o.inset,
                    hex::encode(&digest[..8])
                )
            }
            Operation::Encode(e) => e.token(),
        }
    }
}

/// A validated, canonically ordered operation sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationList {
    ops: Vec<Operation>,
}

impl OperationList {
    /// Normalize and validate a raw operation sequence.
    ///
    /// No-op crops, scales, and rotations are dropped; the rest are sorted
    /// into canonical order. At most one crop and one scale may remain, and
    /// exactly one encode must be present.
    pub fn new(raw: Vec<Operation>) -> Result<Self, Error> {
        for op in &raw {
            op.validate()?;
        }

        let mut ops: Vec<Operation> = raw
            .into_iter()
            .filter(|op| match op {
                Operation::Crop(c) => !c.is_full(),
                Operation::Scale(s) => !s.is_noop(),
                Operation::Rotate(r) => !r.is_noop(),
                Operation::ColorTransform(c) => *c != ColorTransform::Identity,
                _ => true,
            })
            .collect();
        ops.sort_by_key(|op| op.rank());

        let crops = ops.iter().filter(|o| matches!(o, Operation::Crop(_))).count();
        let scales = ops.iter().filter(|o| matches!(o, Operation::Scale(_))).count();
        let encodes = ops
            .iter()
            .filter(|o| matches!(o, Operation::Encode(_)))
            .count();

        if crops > 1 {
            return Err(Error::InvalidRequest("more than one crop".into()));
        }
        if scales > 1 {
            return Err(Error::InvalidRequest("more than one scale".into()));
        }
        if encodes != 1 {
            return Err(Error::InvalidRequest(format!(
                "expected exactly one encode, found {}",
                encodes
            )));
        }

        Ok(OperationList { ops })
    }

    /// The crop, when present.
    pub fn crop(&self) -> Option<&Crop> {
        self.ops.iter().find_map(|op| match op {
            Operation::Crop(c) => Some(c),
            _ => None,
        })
    }

    /// The scale, when present.
    pub fn scale(&self) -> Option<&Scale> {
        self.ops.iter().find_map(|op| match op {
            Operation::Scale(s) => Some(s),
            _ => None,
        })
    }

    /// The terminal encode.
    pub fn encode(&self) -> &Encode {
        self.ops
            .iter()
            .find_map(|op| match op {
                Operation::Encode(e) => Some(e),
                _ => None,
            })
            .expect("normalized list always has an encode")
    }

    /// Iterate the operations in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter()
    }

    /// Canonical text rendering: what the fingerprint hashes.
    pub fn canonical(&self) -> String {
        self.ops
            .iter()
            .map(|op| op.token())
            .collect::<Vec<_>>()
            .join(";")
    }
}

// =============================================================================
// Tests
// =============================================================================
