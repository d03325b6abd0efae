//! Derivative encoders.
//!
//! One writer per output format — JPEG, PNG, TIFF, GIF — dispatched from a
//! static table keyed by [`Format`]. Writers accept a pixel matrix plus the
//! encode operands (quality for JPEG, compression for TIFF) and a captured
//! metadata blob to re-embed when the output format matches the source.
//! Cross-format metadata carry-over is best-effort: unsupported blobs are
//! dropped silently.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use tiff::encoder::{colortype, Compression as TiffLibCompression, DeflateLevel, TiffEncoder};
use tracing::debug;

use crate::error::Error;
use crate::format::jpeg::embed_app_segments;
use crate::format::Format;
use crate::image::PixelMatrix;
use crate::ops::{Encode, TiffCompression};

/// Encode a pixel matrix into the requested output format.
///
/// `metadata` is the opaque blob captured by the reader; it is re-embedded
/// only when `preserve` is set and `source_format` equals the target format.
pub fn encode(
    matrix: &PixelMatrix,
    operation: &Encode,
    source_format: Format,
    metadata: Option<&Bytes>,
    preserve: bool,
) -> Result<Bytes, Error> {
    let same_format = source_format == operation.format;
    let embed = if preserve && same_format {
        metadata
    } else {
        None
    };

    debug!(
        format = operation.format.name(),
        quality = operation.quality,
        preserve = embed.is_some(),
        width = matrix.width(),
        height = matrix.height(),
        "encoding derivative"
    );

    match operation.format {
        Format::Jpeg => encode_jpeg(matrix.image(), operation.quality, embed),
        Format::Png => encode_png(matrix.image()),
        Format::Gif => encode_gif(matrix.image()),
        Format::Tiff => encode_tiff(matrix.image(), operation.compression, embed),
        other => Err(Error::UnsupportedOutputFormat(other.name().to_string())),
    }
}

// =============================================================================
// JPEG
// =============================================================================

fn encode_jpeg(image: &DynamicImage, quality: u8, metadata: Option<&Bytes>) -> Result<Bytes, Error> {
    // JPEG carries no alpha and at most 8 bits per sample here.
    let prepared: DynamicImage = match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.clone(),
        DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLuma8(image.to_luma8()),
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    };

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder
        .encode_image(&prepared)
        .map_err(|e| Error::Internal(format!("JPEG encode: {}", e)))?;

    match metadata {
        Some(blob) => Ok(embed_app_segments(&buf, blob)),
        None => Ok(Bytes::from(buf)),
    }
}

// =============================================================================
// PNG
// =============================================================================

fn encode_png(image: &DynamicImage) -> Result<Bytes, Error> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| Error::Internal(format!("PNG encode: {}", e)))?;
    Ok(Bytes::from(cursor.into_inner()))
}

// =============================================================================
// GIF
// =============================================================================

fn encode_gif(image: &DynamicImage) -> Result<Bytes, Error> {
    let mut buf = Vec::new();
    {
        let mut encoder = image::codecs::gif::GifEncoder::new(&mut buf);
        encoder
            .encode_frame(image::Frame::new(image.to_rgba8()))
            .map_err(|e| Error::Internal(format!("GIF encode: {}", e)))?;
    }
    Ok(Bytes::from(buf))
}

// =============================================================================
// TIFF
// =============================================================================

fn encode_tiff(
    image: &DynamicImage,
    compression: TiffCompression,
    metadata: Option<&Bytes>,
) -> Result<Bytes, Error> {
    if compression == TiffCompression::Jpeg {
        return encode_jpeg_in_tiff(image, metadata);
    }

    let description = metadata.and_then(|m| String::from_utf8(m.to_vec()).ok());

    match image {
        DynamicImage::ImageLuma8(b) => write_tiff::<colortype::Gray8>(
            b.as_raw(),
            image.width(),
            image.height(),
            compression,
            description,
        ),
        DynamicImage::ImageRgb8(b) => write_tiff::<colortype::RGB8>(
            b.as_raw(),
            image.width(),
            image.height(),
            compression,
            description,
        ),
        DynamicImage::ImageRgba8(b) => write_tiff::<colortype::RGBA8>(
            b.as_raw(),
            image.width(),
            image.height(),
            compression,
            description,
        ),
        DynamicImage::ImageLuma16(b) => write_tiff::<colortype::Gray16>(
            b.as_raw(),
            image.width(),
            image.height(),
            compression,
            description,
        ),
        DynamicImage::ImageRgb16(b) => write_tiff::<colortype::RGB16>(
            b.as_raw(),
            image.width(),
            image.height(),
            compression,
            description,
        ),
        other => {
            let rgb = other.to_rgb8();
            write_tiff::<colortype::RGB8>(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                compression,
                description,
            )
        }
    }
}

fn write_tiff<C: colortype::ColorType>(
    data: &[C::Inner],
    width: u32,
    height: u32,
    compression: TiffCompression,
    description: Option<String>,
) -> Result<Bytes, Error>
where
    [C::Inner]: tiff::encoder::TiffValue,
{
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)
            .map_err(|e| Error::Internal(format!("TIFF encode: {}", e)))?;

        macro_rules! write_with {
            ($comp:expr) => {{
                encoder = encoder.with_compression($comp);
                let mut img = encoder
                    .new_image::<C>(width, height)
                    .map_err(|e| Error::Internal(format!("TIFF encode: {}", e)))?;
                if let Some(ref desc) = description {
                    img.encoder()
                        .write_tag(tiff::tags::Tag::ImageDescription, desc.as_str())
                        .map_err(|e| Error::Internal(format!("TIFF encode: {}", e)))?;
                }
                img.write_data(data)
                    .map_err(|e| Error::Internal(format!("TIFF encode: {}", e)))?;
            }};
        }

        match compression {
            TiffCompression::None => write_with!(TiffLibCompression::Uncompressed),
            TiffCompression::Lzw => write_with!(TiffLibCompression::Lzw),
            TiffCompression::Deflate => {
                write_with!(TiffLibCompression::Deflate(DeflateLevel::default()))
            }
            TiffCompression::Jpeg => unreachable!("routed to encode_jpeg_in_tiff"),
        }
    }
    Ok(Bytes::from(cursor.into_inner()))
}

/// Hand-built single-strip TIFF wrapping a complete JPEG stream
/// ("new-style" JPEG-in-TIFF, compression 7).
///
/// The codec crates do not write JPEG-compressed TIFF, but the container is
/// just a directory pointing one strip at a JFIF stream.
fn encode_jpeg_in_tiff(image: &DynamicImage, metadata: Option<&Bytes>) -> Result<Bytes, Error> {
    let gray = matches!(
        image,
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_)
    );
    let jpeg = encode_jpeg(image, 90, metadata)?;
    let (width, height) = (image.width(), image.height());
    let samples: u16 = if gray { 1 } else { 3 };

    // Tags must appear in ascending order: 256, 257, 258, 259, 262, 273,
    // 277, 278, 279.
    let entry_count: u16 = 9;
    let ifd_at: u32 = 8;
    let ifd_len = 2 + entry_count as u32 * 12 + 4;
    let bits_array_at = ifd_at + ifd_len; // used only for 3 samples
    let data_at = {
        let end = if samples == 3 {
            bits_array_at + 6
        } else {
            bits_array_at
        };
        (end + 1) & !1 // keep the strip on an even offset
    };

    let mut out = Vec::with_capacity(data_at as usize + jpeg.len());
    out.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00]); // II, classic
    out.extend_from_slice(&ifd_at.to_le_bytes());

    out.extend_from_slice(&entry_count.to_le_bytes());
    let mut entry = |tag: u16, typ: u16, count: u32, value: u32| {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&typ.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    };

    entry(256, 4, 1, width); // ImageWidth
    entry(257, 4, 1, height); // ImageLength
    if samples == 3 {
        entry(258, 3, 3, bits_array_at); // BitsPerSample array
    } else {
        entry(258, 3, 1, 8);
    }
    entry(259, 3, 1, 7); // Compression: JPEG
    entry(262, 3, 1, if gray { 1 } else { 6 }); // Photometric: gray or YCbCr
    entry(273, 4, 1, data_at); // StripOffsets
    entry(277, 3, 1, samples as u32); // SamplesPerPixel
    entry(278, 4, 1, height); // RowsPerStrip: one strip
    entry(279, 4, 1, jpeg.len() as u32); // StripByteCounts

    out.extend_from_slice(&0u32.to_le_bytes()); // no next directory

    if samples == 3 {
        for _ in 0..3 {
            out.extend_from_slice(&8u16.to_le_bytes());
        }
    }
    while out.len() < data_at as usize {
        out.push(0);
    }
    out.extend_from_slice(&jpeg);

    Ok(Bytes::from(out))
}

// =============================================================================
// Tests
// =============================================================================
