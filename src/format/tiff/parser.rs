//! TIFF and BigTIFF structure parsing.
//!
//! Parsing is split into a fixed-size header, then a chain of image file
//! directories (IFDs). Every multi-byte value respects the byte order
//! declared in the first two bytes. Classic TIFF uses 4-byte offsets and
//! 12-byte entries; BigTIFF widens those to 8 bytes and 20-byte entries.
//!
//! Directory entries either carry their value inline (when it fits the
//! value/offset field) or point at it elsewhere in the file; value reads that
//! may need a fetch are async and take the [`RangeReader`].

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};
use crate::io::RangeReader;

use super::tags::{FieldType, Tag};

// =============================================================================
// Constants
// =============================================================================

/// "II": all values little-endian.
const ORDER_LITTLE: u16 = 0x4949;

/// "MM": all values big-endian.
const ORDER_BIG: u16 = 0x4D4D;

/// Classic TIFF version word.
const VERSION_CLASSIC: u16 = 42;

/// BigTIFF version word.
const VERSION_BIG: u16 = 43;

/// Classic header size in bytes.
pub const CLASSIC_HEADER_LEN: usize = 8;

/// BigTIFF header size in bytes; also the most bytes any header needs.
pub const BIG_HEADER_LEN: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order of all multi-byte values in a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Read a u16 honoring this order.
    #[inline]
    pub fn u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::Little => read_u16_le(bytes),
            ByteOrder::Big => read_u16_be(bytes),
        }
    }

    /// Read a u32 honoring this order.
    #[inline]
    pub fn u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::Little => read_u32_le(bytes),
            ByteOrder::Big => read_u32_be(bytes),
        }
    }

    /// Read a u64 honoring this order.
    #[inline]
    pub fn u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::Little => read_u64_le(bytes),
            ByteOrder::Big => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed file header: byte order, offset width, and where the IFD chain starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub bigtiff: bool,
    pub first_directory_offset: u64,
}

impl TiffHeader {
    /// Parse the header from the file's leading bytes.
    ///
    /// `file_size` bounds the first directory offset.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < CLASSIC_HEADER_LEN {
            return Err(TiffError::FileTooSmall {
                required: CLASSIC_HEADER_LEN as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = read_u16_le(&bytes[0..2]);
        let byte_order = match magic {
            ORDER_LITTLE => ByteOrder::Little,
            ORDER_BIG => ByteOrder::Big,
            other => return Err(TiffError::InvalidMagic(other)),
        };

        let version = byte_order.u16(&bytes[2..4]);
        let (bigtiff, first_directory_offset) = match version {
            VERSION_CLASSIC => (false, byte_order.u32(&bytes[4..8]) as u64),
            VERSION_BIG => {
                if bytes.len() < BIG_HEADER_LEN {
                    return Err(TiffError::FileTooSmall {
                        required: BIG_HEADER_LEN as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.u64(&bytes[8..16]))
            }
            other => return Err(TiffError::InvalidVersion(other)),
        };

        if first_directory_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_directory_offset));
        }

        Ok(TiffHeader {
            byte_order,
            bigtiff,
            first_directory_offset,
        })
    }

    /// Bytes per directory entry: 12 classic, 20 BigTIFF.
    #[inline]
    pub const fn entry_len(&self) -> usize {
        if self.bigtiff {
            20
        } else {
            12
        }
    }

    /// Bytes of the entry-count field leading a directory.
    #[inline]
    pub const fn count_len(&self) -> usize {
        if self.bigtiff {
            8
        } else {
            2
        }
    }

    /// Bytes of the trailing next-directory offset.
    #[inline]
    pub const fn next_offset_len(&self) -> usize {
        if self.bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// DirectoryEntry
// =============================================================================

/// One parsed directory entry.
///
/// `value_bytes` holds the raw value/offset field (4 or 8 bytes); whether it
/// is the value itself or a pointer is recorded in `inline`.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub tag_id: u16,
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u64,
    pub value_bytes: Vec<u8>,
    pub inline: bool,
}

impl DirectoryEntry {
    fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let order = header.byte_order;
        let tag_id = order.u16(&bytes[0..2]);
        let field_type_raw = order.u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let (count, value_bytes) = if header.bigtiff {
            (order.u64(&bytes[4..12]), bytes[12..20].to_vec())
        } else {
            (order.u32(&bytes[4..8]) as u64, bytes[8..12].to_vec())
        };

        let inline = field_type
            .map(|ft| ft.fits_inline(count, header.bigtiff))
            .unwrap_or(false);

        DirectoryEntry {
            tag_id,
            field_type,
            field_type_raw,
            count,
            value_bytes,
            inline,
        }
    }

    /// The known tag, if this id is one we recognize.
    pub fn tag(&self) -> Option<Tag> {
        Tag::from_u16(self.tag_id)
    }

    /// Total byte size of the value data.
    pub fn byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|ft| ft.value_size() as u64 * self.count)
    }

    /// Offset of the out-of-line value.
    pub fn value_offset(&self, order: ByteOrder) -> u64 {
        if self.value_bytes.len() == 8 {
            order.u64(&self.value_bytes)
        } else {
            order.u32(&self.value_bytes) as u64
        }
    }

    /// Inline scalar as u64 (Short/Long/Long8), or `None`.
    pub fn inline_u64(&self, order: ByteOrder) -> Option<u64> {
        if !self.inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Byte => Some(self.value_bytes[0] as u64),
            FieldType::Short => Some(order.u16(&self.value_bytes) as u64),
            FieldType::Long => Some(order.u32(&self.value_bytes) as u64),
            FieldType::Long8 if self.value_bytes.len() >= 8 => {
                Some(order.u64(&self.value_bytes))
            }
            _ => None,
        }
    }

    /// Fetch the raw value bytes, inline or from the file.
    pub async fn read_bytes(
        &self,
        reader: &dyn RangeReader,
        header: &TiffHeader,
    ) -> Result<Bytes, TiffError> {
        let size = self
            .byte_size()
            .ok_or(TiffError::UnknownFieldType(self.field_type_raw))?;

        if self.inline {
            Ok(Bytes::copy_from_slice(&self.value_bytes[..size as usize]))
        } else {
            let offset = self.value_offset(header.byte_order);
            Ok(reader.read_exact_at(offset, size as usize).await?)
        }
    }

    /// Fetch the value as an array of u64, converting from the stored width.
    pub async fn read_u64s(
        &self,
        reader: &dyn RangeReader,
        header: &TiffHeader,
    ) -> Result<Vec<u64>, TiffError> {
        let field_type = self
            .field_type
            .ok_or(TiffError::UnknownFieldType(self.field_type_raw))?;
        let count = self.count as usize;
        if count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(reader, header).await?;
        let order = header.byte_order;

        let mut values = Vec::with_capacity(count);
        match field_type {
            FieldType::Short => {
                for i in 0..count {
                    values.push(order.u16(&bytes[i * 2..]) as u64);
                }
            }
            FieldType::Long => {
                for i in 0..count {
                    values.push(order.u32(&bytes[i * 4..]) as u64);
                }
            }
            FieldType::Long8 => {
                for i in 0..count {
                    values.push(order.u64(&bytes[i * 8..]));
                }
            }
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag: "array",
                    message: format!("expected Short/Long/Long8, got {:?}", other),
                })
            }
        }
        Ok(values)
    }

    /// Fetch the value as an array of u16.
    pub async fn read_u16s(
        &self,
        reader: &dyn RangeReader,
        header: &TiffHeader,
    ) -> Result<Vec<u16>, TiffError> {
        let field_type = self
            .field_type
            .ok_or(TiffError::UnknownFieldType(self.field_type_raw))?;
        if field_type != FieldType::Short {
            return Err(TiffError::InvalidTagValue {
                tag: "array",
                message: format!("expected Short, got {:?}", field_type),
            });
        }
        let count = self.count as usize;
        let bytes = self.read_bytes(reader, header).await?;
        let order = header.byte_order;
        Ok((0..count).map(|i| order.u16(&bytes[i * 2..])).collect())
    }
}

// =============================================================================
// Directory
// =============================================================================

/// A parsed image file directory: one image's worth of metadata.
#[derive(Debug, Clone)]
pub struct Directory {
    /// Entries in file order.
    pub entries: Vec<DirectoryEntry>,

    /// Tag id → entry index.
    by_tag: HashMap<u16, usize>,

    /// Offset of the next directory, 0 at the end of the chain.
    pub next_offset: u64,
}

impl Directory {
    /// Parse a directory from bytes starting at its offset.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count_len = header.count_len();
        if bytes.len() < count_len {
            return Err(TiffError::FileTooSmall {
                required: count_len as u64,
                actual: bytes.len() as u64,
            });
        }

        let order = header.byte_order;
        let entry_count = if header.bigtiff {
            order.u64(&bytes[0..8])
        } else {
            order.u16(&bytes[0..2]) as u64
        };

        let entry_len = header.entry_len();
        let entries_end = count_len + entry_count as usize * entry_len;
        let total = entries_end + header.next_offset_len();
        if bytes.len() < total {
            return Err(TiffError::FileTooSmall {
                required: total as u64,
                actual: bytes.len() as u64,
            });
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut by_tag = HashMap::with_capacity(entry_count as usize);
        for i in 0..entry_count as usize {
            let start = count_len + i * entry_len;
            let entry = DirectoryEntry::parse(&bytes[start..start + entry_len], header);
            by_tag.insert(entry.tag_id, entries.len());
            entries.push(entry);
        }

        let next_offset = if header.bigtiff {
            order.u64(&bytes[entries_end..entries_end + 8])
        } else {
            order.u32(&bytes[entries_end..entries_end + 4]) as u64
        };

        Ok(Directory {
            entries,
            by_tag,
            next_offset,
        })
    }

    /// Bytes needed to parse a directory with `entry_count` entries.
    pub fn byte_len(entry_count: u64, header: &TiffHeader) -> usize {
        header.count_len() + entry_count as usize * header.entry_len() + header.next_offset_len()
    }

    /// Look up an entry by tag.
    pub fn entry(&self, tag: Tag) -> Option<&DirectoryEntry> {
        self.by_tag.get(&tag.as_u16()).map(|&i| &self.entries[i])
    }

    /// Inline scalar for a tag, as u64.
    pub fn value_u64(&self, tag: Tag, order: ByteOrder) -> Option<u64> {
        self.entry(tag)?.inline_u64(order)
    }

    /// Inline scalar for a tag, as u32.
    pub fn value_u32(&self, tag: Tag, order: ByteOrder) -> Option<u32> {
        self.value_u64(tag, order).map(|v| v as u32)
    }

    /// Inline scalar for a tag, as u16.
    pub fn value_u16(&self, tag: Tag, order: ByteOrder) -> Option<u16> {
        self.value_u64(tag, order).map(|v| v as u16)
    }

    /// Whether pixel data is organized as tiles.
    pub fn is_tiled(&self) -> bool {
        self.entry(Tag::TileWidth).is_some() && self.entry(Tag::TileOffsets).is_some()
    }

    /// Whether pixel data is organized as strips.
    pub fn is_striped(&self) -> bool {
        self.entry(Tag::StripOffsets).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory carries no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walk the directory chain, parsing every directory.
///
/// The chain is capped to guard against offset cycles in corrupt files.
pub async fn parse_directories(
    reader: &dyn RangeReader,
    header: &TiffHeader,
    max_directories: usize,
) -> Result<Vec<Directory>, TiffError> {
    let mut directories = Vec::new();
    let mut offset = header.first_directory_offset;

    while offset != 0 && directories.len() < max_directories {
        let count_bytes = reader.read_exact_at(offset, header.count_len()).await?;
        let entry_count = if header.bigtiff {
            header.byte_order.u64(&count_bytes)
        } else {
            header.byte_order.u16(&count_bytes) as u64
        };

        let len = Directory::byte_len(entry_count, header);
        let dir_bytes = reader.read_exact_at(offset, len).await?;
        let directory = Directory::parse(&dir_bytes, header)?;

        offset = directory.next_offset;
        directories.push(directory);
    }

    Ok(directories)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRangeReader;

    fn classic_header() -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::Little,
            bigtiff: false,
            first_directory_offset: 8,
        }
    }

    fn big_header() -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::Little,
            bigtiff: true,
            first_directory_offset: 16,
        }
    }

    /// Append a classic little-endian entry to a buffer.
    fn push_entry(buf: &mut Vec<u8>, tag: u16, typ: u16, count: u32, value: u32) {
        buf.extend_from_slice(&tag.to_le_bytes());
        buf.extend_from_slice(&typ.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }

    // -------------------------------------------------------------------------
    // Header parsing
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_classic_little_endian() {
        let bytes = [0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        let header = TiffHeader::parse(&bytes, 1000).unwrap();
        assert_eq!(header.byte_order, ByteOrder::Little);
        assert!(!header.bigtiff);
        assert_eq!(header.first_directory_offset, 8);
        assert_eq!(header.entry_len(), 12);
        assert_eq!(header.count_len(), 2);
        assert_eq!(header.next_offset_len(), 4);
    }

    #[test]
    fn test_parse_classic_big_endian() {
        let bytes = [0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08];
        let header = TiffHeader::parse(&bytes, 1000).unwrap();
        assert_eq!(header.byte_order, ByteOrder::Big);
        assert!(!header.bigtiff);
        assert_eq!(header.first_directory_offset, 8);
    }

    #[test]
    fn test_parse_bigtiff() {
        let bytes = [
            0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00, //
            0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let header = TiffHeader::parse(&bytes, 1000).unwrap();
        assert!(header.bigtiff);
        assert_eq!(header.first_directory_offset, 16);
        assert_eq!(header.entry_len(), 20);
        assert_eq!(header.count_len(), 8);
        assert_eq!(header.next_offset_len(), 8);
    }

    #[test]
    fn test_parse_bigtiff_offset_beyond_4gb() {
        let bytes = [
            0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00, //
            0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        ];
        let header = TiffHeader::parse(&bytes, 10_000_000_000).unwrap();
        assert_eq!(header.first_directory_offset, 1 << 32);
    }

    #[test]
    fn test_parse_header_errors() {
        // Bad magic
        let bytes = [0x00, 0x00, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&bytes, 1000),
            Err(TiffError::InvalidMagic(0))
        ));

        // Bad version
        let bytes = [0x49, 0x49, 0x99, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&bytes, 1000),
            Err(TiffError::InvalidVersion(0x99))
        ));

        // BigTIFF with wrong offset size
        let bytes = [
            0x49, 0x49, 0x2B, 0x00, 0x04, 0x00, 0x00, 0x00, //
            0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(matches!(
            TiffHeader::parse(&bytes, 1000),
            Err(TiffError::InvalidBigTiffOffsetSize(4))
        ));

        // Offset beyond file
        let bytes = [0x49, 0x49, 0x2A, 0x00, 0xE8, 0x03, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&bytes, 500),
            Err(TiffError::InvalidIfdOffset(1000))
        ));

        // Truncated
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49], 1000),
            Err(TiffError::FileTooSmall { .. })
        ));
    }

    // -------------------------------------------------------------------------
    // Entry parsing
    // -------------------------------------------------------------------------

    #[test]
    fn test_entry_inline_short() {
        let mut bytes = Vec::new();
        push_entry(&mut bytes, 256, 3, 1, 1024);
        let entry = DirectoryEntry::parse(&bytes, &classic_header());

        assert_eq!(entry.tag(), Some(Tag::ImageWidth));
        assert_eq!(entry.field_type, Some(FieldType::Short));
        assert!(entry.inline);
        assert_eq!(entry.inline_u64(ByteOrder::Little), Some(1024));
    }

    #[test]
    fn test_entry_offset_array() {
        let mut bytes = Vec::new();
        push_entry(&mut bytes, 324, 4, 100, 2000);
        let entry = DirectoryEntry::parse(&bytes, &classic_header());

        assert_eq!(entry.tag(), Some(Tag::TileOffsets));
        assert!(!entry.inline);
        assert_eq!(entry.value_offset(ByteOrder::Little), 2000);
        assert_eq!(entry.byte_size(), Some(400));
    }

    #[test]
    fn test_entry_unknown_field_type() {
        let mut bytes = Vec::new();
        push_entry(&mut bytes, 256, 99, 1, 0);
        let entry = DirectoryEntry::parse(&bytes, &classic_header());
        assert_eq!(entry.field_type, None);
        assert!(!entry.inline);
    }

    #[test]
    fn test_entry_bigtiff_long8() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&256u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&100_000u64.to_le_bytes());
        let entry = DirectoryEntry::parse(&bytes, &big_header());

        assert!(entry.inline);
        assert_eq!(entry.inline_u64(ByteOrder::Little), Some(100_000));
    }

    // -------------------------------------------------------------------------
    // Directory parsing
    // -------------------------------------------------------------------------

    #[test]
    fn test_directory_parse_and_lookup() {
        let mut bytes = 3u16.to_le_bytes().to_vec();
        push_entry(&mut bytes, 256, 4, 1, 4096); // width
        push_entry(&mut bytes, 257, 4, 1, 3072); // height
        push_entry(&mut bytes, 259, 3, 1, 7); // compression
        bytes.extend_from_slice(&500u32.to_le_bytes()); // next

        let header = classic_header();
        let dir = Directory::parse(&bytes, &header).unwrap();

        assert_eq!(dir.len(), 3);
        assert_eq!(dir.next_offset, 500);
        assert_eq!(dir.value_u32(Tag::ImageWidth, header.byte_order), Some(4096));
        assert_eq!(
            dir.value_u32(Tag::ImageLength, header.byte_order),
            Some(3072)
        );
        assert_eq!(dir.value_u16(Tag::Compression, header.byte_order), Some(7));
        assert!(dir.entry(Tag::TileWidth).is_none());
    }

    #[test]
    fn test_directory_layout_predicates() {
        let header = classic_header();

        let mut tiled = 3u16.to_le_bytes().to_vec();
        push_entry(&mut tiled, 322, 3, 1, 256);
        push_entry(&mut tiled, 323, 3, 1, 256);
        push_entry(&mut tiled, 324, 4, 4, 1000);
        tiled.extend_from_slice(&0u32.to_le_bytes());
        let dir = Directory::parse(&tiled, &header).unwrap();
        assert!(dir.is_tiled());
        assert!(!dir.is_striped());

        let mut striped = 2u16.to_le_bytes().to_vec();
        push_entry(&mut striped, 273, 4, 4, 1000);
        push_entry(&mut striped, 278, 4, 1, 64);
        striped.extend_from_slice(&0u32.to_le_bytes());
        let dir = Directory::parse(&striped, &header).unwrap();
        assert!(!dir.is_tiled());
        assert!(dir.is_striped());
    }

    #[test]
    fn test_directory_truncated() {
        let mut bytes = 5u16.to_le_bytes().to_vec();
        push_entry(&mut bytes, 256, 4, 1, 4096); // only 1 of 5 entries
        let result = Directory::parse(&bytes, &classic_header());
        assert!(matches!(result, Err(TiffError::FileTooSmall { .. })));
    }

    // -------------------------------------------------------------------------
    // Value reading
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_read_u64s_from_offset() {
        let mut file = vec![0u8; 300];
        for (i, v) in [100u32, 200, 300, 400, 500].iter().enumerate() {
            file[40 + i * 4..40 + i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        let reader = MemoryRangeReader::new(file, "mem://t");

        let entry = DirectoryEntry {
            tag_id: 324,
            field_type: Some(FieldType::Long),
            field_type_raw: 4,
            count: 5,
            value_bytes: 40u32.to_le_bytes().to_vec(),
            inline: false,
        };

        let values = entry.read_u64s(&reader, &classic_header()).await.unwrap();
        assert_eq!(values, vec![100, 200, 300, 400, 500]);
    }

    #[tokio::test]
    async fn test_read_bytes_inline() {
        let reader = MemoryRangeReader::new(vec![0u8; 10], "mem://t");
        let entry = DirectoryEntry {
            tag_id: 258,
            field_type: Some(FieldType::Short),
            field_type_raw: 3,
            count: 2,
            value_bytes: vec![0x08, 0x00, 0x08, 0x00],
            inline: true,
        };
        let bytes = entry.read_bytes(&reader, &classic_header()).await.unwrap();
        assert_eq!(&bytes[..], &[0x08, 0x00, 0x08, 0x00]);

        let values = entry.read_u16s(&reader, &classic_header()).await.unwrap();
        assert_eq!(values, vec![8, 8]);
    }

    #[tokio::test]
    async fn test_read_unknown_type_errors() {
        let reader = MemoryRangeReader::new(vec![0u8; 10], "mem://t");
        let entry = DirectoryEntry {
            tag_id: 256,
            field_type: None,
            field_type_raw: 99,
            count: 1,
            value_bytes: vec![0; 4],
            inline: false,
        };
        assert!(matches!(
            entry.read_bytes(&reader, &classic_header()).await,
            Err(TiffError::UnknownFieldType(99))
        ));
    }

    #[tokio::test]
    async fn test_parse_directories_chain() {
        // Two chained directories.
        let mut file = vec![0u8; 200];
        file[0..4].copy_from_slice(&[0x49, 0x49, 0x2A, 0x00]);
        file[4..8].copy_from_slice(&8u32.to_le_bytes());

        // Directory 1 at offset 8: width entry, next at 60
        let mut d1 = 1u16.to_le_bytes().to_vec();
        push_entry(&mut d1, 256, 4, 1, 1000);
        d1.extend_from_slice(&60u32.to_le_bytes());
        file[8..8 + d1.len()].copy_from_slice(&d1);

        // Directory 2 at offset 60: width entry, end of chain
        let mut d2 = 1u16.to_le_bytes().to_vec();
        push_entry(&mut d2, 256, 4, 1, 500);
        d2.extend_from_slice(&0u32.to_le_bytes());
        file[60..60 + d2.len()].copy_from_slice(&d2);

        let reader = MemoryRangeReader::new(file, "mem://t");
        let header = TiffHeader::parse(
            &reader.read_exact_at(0, 8).await.unwrap(),
            reader.size(),
        )
        .unwrap();

        let dirs = parse_directories(&reader, &header, 32).await.unwrap();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0].value_u32(Tag::ImageWidth, header.byte_order), Some(1000));
        assert_eq!(dirs[1].value_u32(Tag::ImageWidth, header.byte_order), Some(500));
    }
}
