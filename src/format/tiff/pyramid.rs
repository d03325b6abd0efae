//! Resolution pyramid extraction from a TIFF directory chain.
//!
//! A multi-resolution TIFF stores each level as its own directory, largest
//! first by convention but not by guarantee. Each level is either tiled
//! (independent fixed-size blocks, cheap region access) or striped
//! (horizontal bands). This module classifies directories into pyramid
//! levels, orders them large→small, and exposes the per-level pixel layout
//! the region reader walks.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{parse_directories, ByteOrder, Directory, DirectoryEntry, TiffHeader};
use super::parser::BIG_HEADER_LEN;
use super::tags::{CompressionScheme, Tag};

// =============================================================================
// Constants
// =============================================================================

/// Safety cap on directory-chain length (guards offset cycles).
const MAX_DIRECTORIES: usize = 64;

/// Levels must shrink by roughly a power of two; 20% slack absorbs rounding.
const DOWNSAMPLE_TOLERANCE: f64 = 0.2;

// =============================================================================
// Pixel Layout
// =============================================================================

/// How a level's pixel data is organized in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Fixed-size independently coded blocks.
    Tiled { tile_width: u32, tile_height: u32 },

    /// Horizontal bands of `rows_per_strip` rows (last band may be shorter).
    Striped { rows_per_strip: u32 },
}

// =============================================================================
// Level
// =============================================================================

/// One resolution level of the pyramid.
#[derive(Debug, Clone)]
pub struct Level {
    /// Position in the pyramid after sorting (0 = full resolution).
    pub index: usize,

    /// Position of the backing directory in the file's chain.
    pub directory_index: usize,

    /// Level width in pixels.
    pub width: u32,

    /// Level height in pixels.
    pub height: u32,

    /// Tile or strip organization.
    pub layout: PixelLayout,

    /// Downsample relative to the full-resolution level (1.0 at level 0).
    pub downsample: f64,

    /// Compression scheme of the pixel data.
    pub compression: CompressionScheme,

    /// Bits per sample (first sample; mixed depths are not supported).
    pub bits_per_sample: u16,

    /// Components per pixel.
    pub samples_per_pixel: u16,

    /// Photometric interpretation tag value.
    pub photometric: u16,

    /// Predictor applied before LZW/Deflate.
    pub predictor: u16,

    /// Offsets array entry (tiles or strips, per layout).
    offsets_entry: DirectoryEntry,

    /// Byte-counts array entry.
    byte_counts_entry: DirectoryEntry,

    /// Shared JPEG tables, when tiles are abbreviated streams.
    jpeg_tables_entry: Option<DirectoryEntry>,

    /// Embedded ICC profile.
    icc_entry: Option<DirectoryEntry>,

    /// Native description blob, carried opaquely.
    description_entry: Option<DirectoryEntry>,
}

impl Level {
    /// Build a level from a directory, or `None` when it holds no usable
    /// pixel data (no dimensions, or neither tile nor strip arrays).
    fn from_directory(
        directory: &Directory,
        directory_index: usize,
        order: ByteOrder,
    ) -> Option<Self> {
        let width = directory.value_u32(Tag::ImageWidth, order)?;
        let height = directory.value_u32(Tag::ImageLength, order)?;
        if width == 0 || height == 0 {
            return None;
        }

        let (layout, offsets_entry, byte_counts_entry) = if directory.is_tiled() {
            let tile_width = directory.value_u32(Tag::TileWidth, order)?;
            let tile_height = directory.value_u32(Tag::TileLength, order)?;
            if tile_width == 0 || tile_height == 0 {
                return None;
            }
            (
                PixelLayout::Tiled {
                    tile_width,
                    tile_height,
                },
                directory.entry(Tag::TileOffsets)?.clone(),
                directory.entry(Tag::TileByteCounts)?.clone(),
            )
        } else if directory.is_striped() {
            let rows_per_strip = directory
                .value_u32(Tag::RowsPerStrip, order)
                .unwrap_or(height)
                .min(height)
                .max(1);
            (
                PixelLayout::Striped { rows_per_strip },
                directory.entry(Tag::StripOffsets)?.clone(),
                directory.entry(Tag::StripByteCounts)?.clone(),
            )
        } else {
            return None;
        };

        let compression = CompressionScheme::from_u16(
            directory.value_u16(Tag::Compression, order).unwrap_or(1),
        );

        // BitsPerSample is an array for multi-sample images; a single inline
        // value covers the common homogeneous case, and the array form is
        // resolved at load time.
        let bits_per_sample = directory.value_u16(Tag::BitsPerSample, order).unwrap_or(8);
        let samples_per_pixel = directory
            .value_u16(Tag::SamplesPerPixel, order)
            .unwrap_or(1);
        let photometric = directory
            .value_u16(Tag::PhotometricInterpretation, order)
            .unwrap_or(super::tags::photometric::BLACK_IS_ZERO);
        let predictor = directory
            .value_u16(Tag::Predictor, order)
            .unwrap_or(super::tags::predictor::NONE);

        Some(Level {
            index: 0,
            directory_index,
            width,
            height,
            layout,
            downsample: 1.0,
            compression,
            bits_per_sample,
            samples_per_pixel,
            photometric,
            predictor,
            offsets_entry,
            byte_counts_entry,
            jpeg_tables_entry: directory.entry(Tag::JpegTables).cloned(),
            icc_entry: directory.entry(Tag::IccProfile).cloned(),
            description_entry: directory.entry(Tag::ImageDescription).cloned(),
        })
    }

    /// Whether this level is tiled (vs striped).
    pub fn is_tiled(&self) -> bool {
        matches!(self.layout, PixelLayout::Tiled { .. })
    }

    /// Chunk grid dimensions: tiles across/down, or (1, strip count).
    pub fn chunk_grid(&self) -> (u32, u32) {
        match self.layout {
            PixelLayout::Tiled {
                tile_width,
                tile_height,
            } => (
                (self.width + tile_width - 1) / tile_width,
                (self.height + tile_height - 1) / tile_height,
            ),
            PixelLayout::Striped { rows_per_strip } => {
                (1, (self.height + rows_per_strip - 1) / rows_per_strip)
            }
        }
    }

    /// Nominal chunk dimensions (edge chunks may be smaller).
    pub fn chunk_size(&self) -> (u32, u32) {
        match self.layout {
            PixelLayout::Tiled {
                tile_width,
                tile_height,
            } => (tile_width, tile_height),
            PixelLayout::Striped { rows_per_strip } => (self.width, rows_per_strip),
        }
    }

    /// Linear chunk index for grid coordinates, if in bounds.
    pub fn chunk_index(&self, cx: u32, cy: u32) -> Option<u32> {
        let (across, down) = self.chunk_grid();
        if cx >= across || cy >= down {
            return None;
        }
        Some(cy * across + cx)
    }

    /// Actual pixel dimensions of the chunk at grid coordinates.
    pub fn chunk_dimensions(&self, cx: u32, cy: u32) -> Option<(u32, u32)> {
        let (across, down) = self.chunk_grid();
        if cx >= across || cy >= down {
            return None;
        }
        let (cw, ch) = self.chunk_size();
        let w = if cx == across - 1 {
            self.width - cx * cw
        } else {
            cw
        };
        let h = if cy == down - 1 {
            self.height - cy * ch
        } else {
            ch
        };
        Some((w, h))
    }
}

// =============================================================================
// Pyramid
// =============================================================================

/// A parsed multi-resolution TIFF.
#[derive(Debug, Clone)]
pub struct Pyramid {
    /// The file header (byte order, offset widths).
    pub header: TiffHeader,

    /// Levels ordered large→small; index 0 is full resolution.
    pub levels: Vec<Level>,
}

impl Pyramid {
    /// Parse the file structure and classify directories into levels.
    pub async fn parse(reader: &dyn RangeReader) -> Result<Self, TiffError> {
        let header_len = BIG_HEADER_LEN.min(reader.size() as usize);
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let directories = parse_directories(reader, &header, MAX_DIRECTORIES).await?;

        let mut candidates: Vec<Level> = directories
            .iter()
            .enumerate()
            .filter_map(|(i, d)| Level::from_directory(d, i, header.byte_order))
            .collect();

        if candidates.is_empty() {
            return Err(TiffError::MissingTag("ImageWidth"));
        }

        // Largest area first; that image defines full resolution.
        candidates.sort_by(|a, b| {
            let area_a = a.width as u64 * a.height as u64;
            let area_b = b.width as u64 * b.height as u64;
            area_b.cmp(&area_a)
        });

        let base_width = candidates[0].width as f64;
        let mut levels = Vec::with_capacity(candidates.len());
        for mut level in candidates {
            let downsample = base_width / level.width as f64;
            if !is_pyramid_downsample(downsample, levels.len()) {
                continue;
            }
            level.index = levels.len();
            level.downsample = downsample;
            levels.push(level);
        }

        Ok(Pyramid { header, levels })
    }

    /// Number of resolution levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Level by index.
    pub fn level(&self, index: usize) -> Option<&Level> {
        self.levels.get(index)
    }

    /// Full-resolution dimensions.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.levels.first().map(|l| (l.width, l.height))
    }
}

/// Whether a downsample factor can belong to the pyramid at this position.
///
/// Level 0 must be ~1.0; deeper levels must sit near a power of two.
fn is_pyramid_downsample(downsample: f64, position: usize) -> bool {
    if position == 0 {
        return (downsample - 1.0).abs() < 0.01;
    }
    let rounded = downsample.log2().round();
    if rounded < 1.0 {
        return false;
    }
    let ratio = downsample / 2.0_f64.powf(rounded);
    (1.0 - ratio).abs() < DOWNSAMPLE_TOLERANCE
}

// =============================================================================
// Level Data
// =============================================================================

/// Loaded chunk location arrays and per-level blobs for one level.
#[derive(Debug, Clone)]
pub struct LevelData {
    /// Byte offset of each chunk.
    pub offsets: Vec<u64>,

    /// Byte count of each chunk.
    pub byte_counts: Vec<u64>,

    /// Bits per sample, resolved from the array form when present.
    pub bits_per_sample: u16,

    /// Shared JPEG tables (abbreviated tile streams).
    pub jpeg_tables: Option<Bytes>,

    /// Embedded ICC profile.
    pub icc_profile: Option<Bytes>,

    /// Native description blob.
    pub description: Option<Bytes>,
}

impl LevelData {
    /// Fetch the offset/count arrays and metadata blobs for a level.
    pub async fn load(
        reader: &dyn RangeReader,
        level: &Level,
        header: &TiffHeader,
    ) -> Result<Self, TiffError> {
        let offsets = level.offsets_entry.read_u64s(reader, header).await?;
        let byte_counts = level.byte_counts_entry.read_u64s(reader, header).await?;

        let jpeg_tables = match level.jpeg_tables_entry {
            Some(ref entry) => Some(entry.read_bytes(reader, header).await?),
            None => None,
        };
        let icc_profile = match level.icc_entry {
            Some(ref entry) => Some(entry.read_bytes(reader, header).await?),
            None => None,
        };
        let description = match level.description_entry {
            Some(ref entry) => Some(entry.read_bytes(reader, header).await?),
            None => None,
        };

        Ok(LevelData {
            offsets,
            byte_counts,
            bits_per_sample: level.bits_per_sample,
            jpeg_tables,
            icc_profile,
            description,
        })
    }

    /// Location of a chunk by linear index.
    pub fn chunk_location(&self, index: u32) -> Option<(u64, u64)> {
        let i = index as usize;
        if i >= self.offsets.len() || i >= self.byte_counts.len() {
            return None;
        }
        Some((self.offsets[i], self.byte_counts[i]))
    }
}

// =============================================================================
// Tests
// =============================================================================
