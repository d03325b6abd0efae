//! JPEG stream utilities.
//!
//! Tiled TIFFs frequently store their tiles as "abbreviated" JPEG streams:
//! the quantization (DQT) and Huffman (DHT) tables are factored out into the
//! container's JPEGTables tag and each tile carries only entropy-coded data.
//! Those tiles must be merged with the shared tables before any standard
//! decoder will accept them.
//!
//! The same segment walker also powers dimension probing (SOF scan), opaque
//! metadata capture (APPn segments), and ICC profile extraction/stripping.

use bytes::{Bytes, BytesMut};

// =============================================================================
// JPEG Markers
// =============================================================================

/// Start Of Image.
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Start Of Scan.
pub const SOS: u8 = 0xDA;

/// Define Quantization Table.
pub const DQT: u8 = 0xDB;

/// Define Huffman Table.
pub const DHT: u8 = 0xC4;

/// ICC profiles live in APP2 segments with this tag.
const ICC_TAG: &[u8] = b"ICC_PROFILE\0";

/// A segment found by the marker walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Marker byte (the one after 0xFF).
    pub marker: u8,
    /// Offset of the 0xFF marker prefix.
    pub start: usize,
    /// Total segment length including the two marker bytes.
    pub len: usize,
}

/// Walk the marker segments of a JPEG stream up to (and including) SOS.
///
/// Entropy-coded data after SOS is not segmented and is not walked. Broken
/// streams simply end the walk early; callers decide whether that matters.
pub fn segments(data: &[u8]) -> Vec<Segment> {
    let mut found = Vec::new();
    if data.len() < 2 || data[0..2] != SOI {
        return found;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            break;
        }
        let marker = data[pos + 1];

        // Standalone markers (RSTn, EOI) carry no length word.
        if marker == 0xD9 || (0xD0..=0xD7).contains(&marker) || marker == 0x01 || marker == 0x00 {
            pos += 2;
            continue;
        }

        let seg_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if seg_len < 2 || pos + 2 + seg_len > data.len() {
            break;
        }

        found.push(Segment {
            marker,
            start: pos,
            len: 2 + seg_len,
        });

        if marker == SOS {
            break;
        }
        pos += 2 + seg_len;
    }

    found
}

/// Check whether a JPEG stream is abbreviated (tables factored out).
///
/// An abbreviated stream reaches SOS without ever defining a quantization or
/// Huffman table.
pub fn is_abbreviated(data: &[u8]) -> bool {
    let mut saw_tables = false;
    for seg in segments(data) {
        match seg.marker {
            DQT | DHT => saw_tables = true,
            SOS => return !saw_tables,
            _ => {}
        }
    }
    false
}

/// Merge shared JPEGTables with an abbreviated tile stream.
///
/// Both inputs are SOI...EOI sequences. The result is
/// SOI + tables content + tile content + EOI, which standard decoders accept.
pub fn merge_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile);
    }
    if tile.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.len() >= 2 && tables[tables.len() - 2..] == EOI {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile.len() >= 2 && tile[0..2] == SOI {
        2
    } else {
        0
    };

    let mut merged = BytesMut::with_capacity(tables_end + tile.len() - tile_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&tile[tile_start..]);
    merged.freeze()
}

// =============================================================================
// Header Probing
// =============================================================================

/// Frame header facts from the SOF segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    pub precision: u8,
}

/// Parse the SOF segment for dimensions, component count, and precision.
///
/// Handles baseline and progressive frames (SOF0-SOF15, excluding the
/// table/extension markers that share the range).
pub fn parse_frame_header(data: &[u8]) -> Option<FrameHeader> {
    for seg in segments(data) {
        let is_sof = matches!(seg.marker, 0xC0..=0xCF)
            && !matches!(seg.marker, 0xC4 | 0xC8 | 0xCC);
        if !is_sof {
            continue;
        }
        // Segment payload: precision(1) height(2) width(2) components(1)
        let payload = &data[seg.start + 4..seg.start + seg.len];
        if payload.len() < 6 {
            return None;
        }
        return Some(FrameHeader {
            precision: payload[0],
            height: u16::from_be_bytes([payload[1], payload[2]]) as u32,
            width: u16::from_be_bytes([payload[3], payload[4]]) as u32,
            components: payload[5],
        });
    }
    None
}

// =============================================================================
// Metadata Segments
// =============================================================================

/// Collect APPn segments (EXIF, XMP, vendor blocks) as one opaque blob.
///
/// The blob is a plain concatenation of complete segments and can be
/// re-inserted after SOI verbatim. APP0 (JFIF) is skipped — encoders write
/// their own.
pub fn extract_app_segments(data: &[u8]) -> Option<Bytes> {
    let mut blob = BytesMut::new();
    for seg in segments(data) {
        if matches!(seg.marker, 0xE1..=0xEF) {
            blob.extend_from_slice(&data[seg.start..seg.start + seg.len]);
        }
    }
    if blob.is_empty() {
        None
    } else {
        Some(blob.freeze())
    }
}

/// Extract an embedded ICC profile from APP2 segments.
///
/// Multi-segment profiles are reassembled in sequence order.
pub fn extract_icc_profile(data: &[u8]) -> Option<Bytes> {
    let mut chunks: Vec<(u8, &[u8])> = Vec::new();
    for seg in segments(data) {
        if seg.marker != 0xE2 {
            continue;
        }
        let payload = &data[seg.start + 4..seg.start + seg.len];
        if payload.len() < ICC_TAG.len() + 2 || &payload[..ICC_TAG.len()] != ICC_TAG {
            continue;
        }
        let seq = payload[ICC_TAG.len()];
        chunks.push((seq, &payload[ICC_TAG.len() + 2..]));
    }
    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|(seq, _)| *seq);

    let mut profile = BytesMut::new();
    for (_, chunk) in chunks {
        profile.extend_from_slice(chunk);
    }
    Some(profile.freeze())
}

/// Remove ICC profile segments from a stream, keeping everything else.
///
/// Used when an embedded profile is incompatible with the pixel data: the
/// stream is re-decoded without the profile so color is preserved.
pub fn strip_icc_profile(data: &[u8]) -> Bytes {
    let mut icc_spans: Vec<(usize, usize)> = Vec::new();
    for seg in segments(data) {
        if seg.marker != 0xE2 {
            continue;
        }
        let payload = &data[seg.start + 4..seg.start + seg.len];
        if payload.len() >= ICC_TAG.len() && &payload[..ICC_TAG.len()] == ICC_TAG {
            icc_spans.push((seg.start, seg.start + seg.len));
        }
    }
    if icc_spans.is_empty() {
        return Bytes::copy_from_slice(data);
    }

    let mut out = BytesMut::with_capacity(data.len());
    let mut cursor = 0;
    for (start, end) in icc_spans {
        out.extend_from_slice(&data[cursor..start]);
        cursor = end;
    }
    out.extend_from_slice(&data[cursor..]);
    out.freeze()
}

/// Insert a previously captured APPn blob right after SOI.
pub fn embed_app_segments(data: &[u8], blob: &[u8]) -> Bytes {
    if data.len() < 2 || data[0..2] != SOI || blob.is_empty() {
        return Bytes::copy_from_slice(data);
    }
    let mut out = BytesMut::with_capacity(data.len() + blob.len());
    out.extend_from_slice(&SOI);
    out.extend_from_slice(blob);
    out.extend_from_slice(&data[2..]);
    out.freeze()
}

// =============================================================================
// Tests
// =============================================================================
