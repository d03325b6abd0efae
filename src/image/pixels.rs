//! The in-memory pixel matrix handed between readers, pipeline, and writers.

use bytes::Bytes;
use image::{DynamicImage, GenericImageView};

use super::Region;

/// A decoded pixel matrix plus the color context that must travel with it.
///
/// The matrix is backed by an [`image::DynamicImage`], so 8- and 16-bit
/// grayscale/RGB/RGBA variants are all representable. An embedded ICC profile
/// rides along as opaque bytes; the pipeline never interprets it.
#[derive(Debug, Clone)]
pub struct PixelMatrix {
    image: DynamicImage,
    icc_profile: Option<Bytes>,
}

impl PixelMatrix {
    /// Wrap a decoded image.
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            icc_profile: None,
        }
    }

    /// Wrap a decoded image with its embedded ICC profile.
    pub fn with_profile(image: DynamicImage, icc_profile: Option<Bytes>) -> Self {
        Self { image, icc_profile }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Channels per pixel.
    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    /// Bits per sample (8 or 16).
    pub fn bit_depth(&self) -> u8 {
        (self.image.color().bits_per_pixel() / self.image.color().channel_count() as u16) as u8
    }

    /// The embedded ICC profile, if any.
    pub fn icc_profile(&self) -> Option<&Bytes> {
        self.icc_profile.as_ref()
    }

    /// Borrow the backing image.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Take the backing image, dropping the profile association.
    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    /// Replace the backing image, keeping the profile.
    pub fn map(self, f: impl FnOnce(DynamicImage) -> DynamicImage) -> Self {
        Self {
            image: f(self.image),
            icc_profile: self.icc_profile,
        }
    }

    /// Crop to a region (clipped to the matrix extent).
    pub fn crop(self, region: Region) -> Self {
        let clipped = region.clipped_to(self.width(), self.height());
        self.map(|img| img.crop_imm(clipped.x, clipped.y, clipped.width, clipped.height))
    }

    /// Nearest-neighbor decimation by an integer factor.
    ///
    /// This is the software stand-in for codec-level subsampling; output
    /// dimensions are the ceiling of size/factor.
    pub fn decimate(self, factor: u32) -> Self {
        if factor <= 1 {
            return self;
        }
        let w = (self.width() + factor - 1) / factor;
        let h = (self.height() + factor - 1) / factor;
        self.map(|img| img.resize_exact(w.max(1), h.max(1), image::imageops::FilterType::Nearest))
    }

    /// Linearly stretch each channel's observed [min, max] to the full range.
    ///
    /// Runs before any bit-depth reduction so deep sources keep their
    /// contrast when clamped to 8 bits.
    pub fn normalize(self) -> Self {
        let icc = self.icc_profile.clone();
        let image = match self.image {
            DynamicImage::ImageLuma8(img) => {
                DynamicImage::ImageLuma8(stretch_u8(img, 1))
            }
            DynamicImage::ImageRgb8(img) => DynamicImage::ImageRgb8(stretch_u8(img, 3)),
            DynamicImage::ImageRgba8(img) => DynamicImage::ImageRgba8(stretch_u8(img, 3)),
            DynamicImage::ImageLuma16(img) => {
                DynamicImage::ImageLuma16(stretch_u16(img, 1))
            }
            DynamicImage::ImageRgb16(img) => DynamicImage::ImageRgb16(stretch_u16(img, 3)),
            DynamicImage::ImageRgba16(img) => DynamicImage::ImageRgba16(stretch_u16(img, 3)),
            other => other,
        };
        Self {
            image,
            icc_profile: icc,
        }
    }

    /// Reduce 16-bit variants to 8 bits per sample.
    pub fn clamp_to_8_bits(self) -> Self {
        let needs_clamp = self.bit_depth() > 8;
        if !needs_clamp {
            return self;
        }
        self.map(|img| match img {
            DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(img.to_luma8()),
            DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLumaA8(img.to_luma_alpha8()),
            DynamicImage::ImageRgb16(_) => DynamicImage::ImageRgb8(img.to_rgb8()),
            DynamicImage::ImageRgba16(_) => DynamicImage::ImageRgba8(img.to_rgba8()),
            other => other,
        })
    }
}

/// Stretch the first `color_channels` channels of an 8-bit buffer in place.
///
/// Alpha (any channel past `color_channels`) is left alone.
fn stretch_u8<P>(mut img: image::ImageBuffer<P, Vec<u8>>, color_channels: usize)
    -> image::ImageBuffer<P, Vec<u8>>
where
    P: image::Pixel<Subpixel = u8> + 'static,
{
    let channels = P::CHANNEL_COUNT as usize;
    let samples: &mut [u8] = &mut img;

    for c in 0..color_channels.min(channels) {
        let mut min = u8::MAX;
        let mut max = u8::MIN;
        for px in samples.chunks_exact(channels) {
            min = min.min(px[c]);
            max = max.max(px[c]);
        }
        if max <= min {
            continue;
        }
        let range = (max - min) as f32;
        for px in samples.chunks_exact_mut(channels) {
            px[c] = (((px[c] - min) as f32 / range) * 255.0).round() as u8;
        }
    }
    img
}

/// 16-bit counterpart of [`stretch_u8`].
fn stretch_u16<P>(mut img: image::ImageBuffer<P, Vec<u16>>, color_channels: usize)
    -> image::ImageBuffer<P, Vec<u16>>
where
    P: image::Pixel<Subpixel = u16> + 'static,
{
    let channels = P::CHANNEL_COUNT as usize;
    let samples: &mut [u16] = &mut img;

    for c in 0..color_channels.min(channels) {
        let mut min = u16::MAX;
        let mut max = u16::MIN;
        for px in samples.chunks_exact(channels) {
            min = min.min(px[c]);
            max = max.max(px[c]);
        }
        if max <= min {
            continue;
        }
        let range = (max - min) as f32;
        for px in samples.chunks_exact_mut(channels) {
            px[c] = (((px[c] - min) as f32 / range) * 65535.0).round() as u16;
        }
    }
    img
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn gradient_gray(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, _| Luma([(x % 256) as u8])))
    }

    #[test]
    fn test_dimensions_and_depth() {
        let m = PixelMatrix::new(gradient_gray(64, 32));
        assert_eq!(m.width(), 64);
        assert_eq!(m.height(), 32);
        assert_eq!(m.channels(), 1);
        assert_eq!(m.bit_depth(), 8);

        let deep = PixelMatrix::new(DynamicImage::ImageLuma16(
            image::ImageBuffer::from_pixel(4, 4, Luma([1000u16])),
        ));
        assert_eq!(deep.bit_depth(), 16);
    }

    #[test]
    fn test_crop_clips() {
        let m = PixelMatrix::new(gradient_gray(100, 100));
        let cropped = m.crop(Region::new(90, 90, 50, 50));
        assert_eq!(cropped.width(), 10);
        assert_eq!(cropped.height(), 10);
    }

    #[test]
    fn test_decimate() {
        let m = PixelMatrix::new(gradient_gray(100, 50));
        let d = m.decimate(4);
        assert_eq!(d.width(), 25);
        assert_eq!(d.height(), 13); // ceil(50/4)

        // Factor 1 is identity
        let m = PixelMatrix::new(gradient_gray(10, 10));
        assert_eq!(m.decimate(1).width(), 10);
    }

    #[test]
    fn test_normalize_stretches_range() {
        // Values confined to [100, 150]
        let img = GrayImage::from_fn(10, 1, |x, _| Luma([100 + (x as u8) * 5]));
        let m = PixelMatrix::new(DynamicImage::ImageLuma8(img)).normalize();

        let out = m.into_image().into_luma8();
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(9, 0)[0], 255);
    }

    #[test]
    fn test_normalize_flat_image_unchanged() {
        let img = GrayImage::from_pixel(4, 4, Luma([77]));
        let m = PixelMatrix::new(DynamicImage::ImageLuma8(img)).normalize();
        assert_eq!(m.into_image().into_luma8().get_pixel(0, 0)[0], 77);
    }

    #[test]
    fn test_normalize_per_channel() {
        // Red confined to [0,100], green flat, blue full range
        let img = RgbImage::from_fn(11, 1, |x, _| {
            Rgb([(x * 10) as u8, 40, (x * 25).min(255) as u8])
        });
        let m = PixelMatrix::new(DynamicImage::ImageRgb8(img)).normalize();
        let out = m.into_image().into_rgb8();
        assert_eq!(out.get_pixel(10, 0)[0], 255); // red stretched
        assert_eq!(out.get_pixel(5, 0)[1], 40); // flat green untouched
    }

    #[test]
    fn test_clamp_to_8_bits() {
        let deep = PixelMatrix::new(DynamicImage::ImageLuma16(
            image::ImageBuffer::from_pixel(4, 4, Luma([0xABCDu16])),
        ));
        let clamped = deep.clamp_to_8_bits();
        assert_eq!(clamped.bit_depth(), 8);
        assert_eq!(clamped.into_image().into_luma8().get_pixel(0, 0)[0], 0xAB);
    }

    #[test]
    fn test_clamp_8_bit_passthrough() {
        let m = PixelMatrix::new(gradient_gray(8, 8));
        assert_eq!(m.clamp_to_8_bits().bit_depth(), 8);
    }

    #[test]
    fn test_profile_survives_map() {
        let m = PixelMatrix::with_profile(
            gradient_gray(8, 8),
            Some(Bytes::from_static(b"fake-profile")),
        );
        let cropped = m.crop(Region::new(0, 0, 4, 4));
        assert_eq!(cropped.icc_profile().unwrap().as_ref(), b"fake-profile");
    }
}
