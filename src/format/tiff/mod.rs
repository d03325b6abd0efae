//! TIFF and BigTIFF container parsing.
//!
//! The parser is deliberately independent of any decoding library: it walks
//! the directory chain with positioned reads, so a remote pyramidal TIFF can
//! be opened with a handful of small range requests. Pixel decoding happens
//! later, per chunk, in the reader layer.

mod parser;
mod pyramid;
mod tags;

pub use parser::{
    parse_directories, ByteOrder, Directory, DirectoryEntry, TiffHeader, BIG_HEADER_LEN,
    CLASSIC_HEADER_LEN,
};
pub use pyramid::{Level, LevelData, PixelLayout, Pyramid};
pub use tags::{photometric, predictor, CompressionScheme, FieldType, Tag};
