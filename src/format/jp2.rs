//! JPEG2000 container and codestream header parsing.
//!
//! Full decoding is delegated to the codec, but level selection and info
//! caching need the geometry up front: image and tile dimensions, component
//! count and depth, and the number of wavelet decomposition levels. Those all
//! live in the SIZ and COD marker segments at the head of the codestream, so
//! they can be read from a small prefix without touching the packet data.
//!
//! # Layout
//!
//! A `.jp2` file is a sequence of boxes, each `length(4) type(4) payload`;
//! the codestream lives in the `jp2c` box. A raw `.j2k` codestream starts
//! directly with the SOC marker. Codestream markers are big-endian
//! `0xFF__ length(2) payload`.

use crate::error::FormatError;
use crate::io::{read_u16_be, read_u32_be};

// =============================================================================
// Markers and Boxes
// =============================================================================

/// Start Of Codestream.
const SOC: u16 = 0xFF4F;

/// Image and tile size.
const SIZ: u16 = 0xFF51;

/// Coding style default.
const COD: u16 = 0xFF52;

/// Start Of Data (ends the main header).
const SOD: u16 = 0xFF93;

/// Contiguous codestream box type.
const BOX_JP2C: &[u8; 4] = b"jp2c";

/// How many leading bytes callers should fetch to cover the main header.
///
/// SIZ and COD sit at the very front of the codestream; 4KB is generous even
/// for files with large XML boxes before `jp2c` being absent.
pub const HEADER_PREFIX_LEN: usize = 4096;

// =============================================================================
// Codestream Header
// =============================================================================

/// Geometry facts parsed from the SIZ and COD segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodestreamHeader {
    /// Image width on the reference grid.
    pub width: u32,
    /// Image height on the reference grid.
    pub height: u32,
    /// Number of components.
    pub components: u16,
    /// Bit depth of the first component.
    pub bit_depth: u8,
    /// Tile width (equals image width for untiled codestreams).
    pub tile_width: u32,
    /// Tile height.
    pub tile_height: u32,
    /// Number of wavelet decomposition levels.
    pub decomposition_levels: u8,
}

impl CodestreamHeader {
    /// Number of usable resolutions: the full image plus one per level.
    pub fn num_resolutions(&self) -> usize {
        self.decomposition_levels as usize + 1
    }

    /// Dimensions of resolution `r` (0 = full size), halving per level.
    pub fn level_dimensions(&self, r: usize) -> (u32, u32) {
        let div = 1u32 << r.min(31);
        (
            (self.width + div - 1) / div,
            (self.height + div - 1) / div,
        )
    }
}

/// Parse the codestream header from a file prefix.
///
/// Accepts both raw codestreams and JP2 containers. `prefix` should be the
/// first [`HEADER_PREFIX_LEN`] bytes (or the whole file when shorter).
pub fn parse_header(prefix: &[u8]) -> Result<CodestreamHeader, FormatError> {
    let codestream = locate_codestream(prefix)?;
    parse_codestream(codestream)
}

/// Find the codestream: either the input itself or inside the jp2c box.
fn locate_codestream(data: &[u8]) -> Result<&[u8], FormatError> {
    if data.len() >= 2 && read_u16_be(data) == SOC {
        return Ok(data);
    }

    // Walk the box sequence.
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let len = read_u32_be(&data[pos..]) as usize;
        let box_type = &data[pos + 4..pos + 8];

        if box_type == BOX_JP2C {
            return Ok(&data[pos + 8..]);
        }

        let advance = match len {
            0 => break, // box extends to end of file and is not jp2c
            1 => {
                // 64-bit extended length; header is 16 bytes
                if pos + 16 > data.len() {
                    break;
                }
                let ext = crate::io::read_u64_be(&data[pos + 8..]) as usize;
                if ext < 16 {
                    break;
                }
                ext
            }
            l if l >= 8 => l,
            _ => break,
        };
        pos = pos.saturating_add(advance);
    }

    Err(FormatError::Malformed {
        format: "JPEG2000",
        message: "no codestream box in prefix".to_string(),
    })
}

/// Walk codestream marker segments collecting SIZ and COD.
fn parse_codestream(data: &[u8]) -> Result<CodestreamHeader, FormatError> {
    if data.len() < 4 || read_u16_be(data) != SOC {
        return Err(FormatError::Malformed {
            format: "JPEG2000",
            message: "missing SOC marker".to_string(),
        });
    }

    let mut siz: Option<(u32, u32, u16, u8, u32, u32)> = None;
    let mut levels: Option<u8> = None;

    let mut pos = 2usize;
    while pos + 4 <= data.len() {
        let marker = read_u16_be(&data[pos..]);
        if marker == SOD {
            break;
        }
        let seg_len = read_u16_be(&data[pos + 2..]) as usize;
        if seg_len < 2 || pos + 2 + seg_len > data.len() {
            break;
        }
        let payload = &data[pos + 4..pos + 2 + seg_len];

        match marker {
            SIZ => {
                // Rsiz(2) Xsiz(4) Ysiz(4) XOsiz(4) YOsiz(4)
                // XTsiz(4) YTsiz(4) XTOsiz(4) YTOsiz(4) Csiz(2) then
                // (Ssiz XRsiz YRsiz) per component.
                if payload.len() < 36 {
                    return Err(FormatError::Malformed {
                        format: "JPEG2000",
                        message: "SIZ segment too short".to_string(),
                    });
                }
                let xsiz = read_u32_be(&payload[2..]);
                let ysiz = read_u32_be(&payload[6..]);
                let xosiz = read_u32_be(&payload[10..]);
                let yosiz = read_u32_be(&payload[14..]);
                let xtsiz = read_u32_be(&payload[18..]);
                let ytsiz = read_u32_be(&payload[22..]);
                let csiz = read_u16_be(&payload[34..]);
                let depth = if payload.len() >= 37 {
                    (payload[36] & 0x7F) + 1
                } else {
                    8
                };
                siz = Some((
                    xsiz - xosiz,
                    ysiz - yosiz,
                    csiz,
                    depth,
                    xtsiz,
                    ytsiz,
                ));
            }
            COD => {
                // Scod(1) SGcod(4) SPcod: decomposition levels first.
                if payload.len() < 6 {
                    return Err(FormatError::Malformed {
                        format: "JPEG2000",
                        message: "COD segment too short".to_string(),
                    });
                }
                levels = Some(payload[5]);
            }
            _ => {}
        }

        if siz.is_some() && levels.is_some() {
            break;
        }
        pos += 2 + seg_len;
    }

    let (width, height, components, bit_depth, tile_width, tile_height) =
        siz.ok_or(FormatError::Malformed {
            format: "JPEG2000",
            message: "missing SIZ segment".to_string(),
        })?;
    let decomposition_levels = levels.ok_or(FormatError::Malformed {
        format: "JPEG2000",
        message: "missing COD segment".to_string(),
    })?;

    Ok(CodestreamHeader {
        width,
        height,
        components,
        bit_depth,
        tile_width: tile_width.min(width),
        tile_height: tile_height.min(height),
        decomposition_levels,
    })
}

// =============================================================================
// Tests
// =============================================================================
