//! Structural inspection of little-endian TIFF byte streams.
//!
//! Only the parts needed to verify cloud-optimized layout are decoded: the
//! IFD chain, image dimensions, subfile type and tile locations.

use crate::error::{CogError, Result};

const IMAGE_WIDTH: u16 = 256;
const IMAGE_LENGTH: u16 = 257;
const NEW_SUBFILE_TYPE: u16 = 254;
const TILE_OFFSETS: u16 = 324;
const TILE_BYTE_COUNTS: u16 = 325;

/// Guard against cyclic IFD chains.
const MAX_IFDS: usize = 64;

/// One image directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdSummary {
    pub offset: u32,
    pub width: u32,
    pub height: u32,
    pub subfile_type: u32,
    pub tile_offsets: Vec<u32>,
    pub tile_byte_counts: Vec<u32>,
}

impl IfdSummary {
    pub fn is_overview(&self) -> bool {
        self.subfile_type & 1 == 1
    }

    /// End of this directory's tile data.
    fn data_end(&self) -> u64 {
        self.tile_offsets
            .iter()
            .zip(&self.tile_byte_counts)
            .map(|(o, c)| *o as u64 + *c as u64)
            .max()
            .unwrap_or(0)
    }

    fn data_start(&self) -> Option<u32> {
        self.tile_offsets.iter().copied().min()
    }
}

/// IFD chain of a TIFF file in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CogLayout {
    pub ifds: Vec<IfdSummary>,
}

impl CogLayout {
    /// Number of overview levels.
    pub fn overview_count(&self) -> usize {
        self.ifds.iter().filter(|i| i.is_overview()).count()
    }

    /// True when every IFD precedes all tile data, resolution decreases along
    /// the chain, and tile data is stored smallest level first.
    pub fn is_cloud_optimized(&self) -> bool {
        let Some(first_data) = self.ifds.iter().filter_map(IfdSummary::data_start).min() else {
            return false;
        };
        if self.ifds.iter().any(|i| i.offset >= first_data) {
            return false;
        }
        if self.ifds.first().map_or(true, IfdSummary::is_overview) {
            return false;
        }
        self.ifds.windows(2).all(|pair| {
            let (larger, smaller) = (&pair[0], &pair[1]);
            smaller.width < larger.width
                && smaller.is_overview()
                && smaller.data_end() <= larger.data_start().unwrap_or(0) as u64
        })
    }
}

/// Walk the IFD chain of a little-endian classic TIFF.
pub fn inspect_layout(bytes: &[u8]) -> Result<CogLayout> {
    if bytes.len() < 8 || &bytes[0..2] != b"II" {
        return Err(CogError::Malformed("not a little-endian TIFF".into()));
    }
    if read_u16(bytes, 2)? != 42 {
        return Err(CogError::Unsupported("BigTIFF or unknown version".into()));
    }

    let mut ifds = Vec::new();
    let mut next = read_u32(bytes, 4)?;
    while next != 0 {
        if ifds.len() == MAX_IFDS {
            return Err(CogError::Malformed("IFD chain too long".into()));
        }
        let (ifd, following) = read_ifd(bytes, next)?;
        ifds.push(ifd);
        next = following;
    }

    Ok(CogLayout { ifds })
}

fn read_ifd(bytes: &[u8], offset: u32) -> Result<(IfdSummary, u32)> {
    let base = offset as usize;
    let count = read_u16(bytes, base)? as usize;

    let mut summary = IfdSummary {
        offset,
        width: 0,
        height: 0,
        subfile_type: 0,
        tile_offsets: Vec::new(),
        tile_byte_counts: Vec::new(),
    };

    for i in 0..count {
        let entry = base + 2 + i * 12;
        let tag = read_u16(bytes, entry)?;
        let field_type = read_u16(bytes, entry + 2)?;
        let n = read_u32(bytes, entry + 4)? as usize;
        match tag {
            IMAGE_WIDTH => summary.width = first_value(bytes, entry, field_type)?,
            IMAGE_LENGTH => summary.height = first_value(bytes, entry, field_type)?,
            NEW_SUBFILE_TYPE => summary.subfile_type = first_value(bytes, entry, field_type)?,
            TILE_OFFSETS => summary.tile_offsets = values(bytes, entry, field_type, n)?,
            TILE_BYTE_COUNTS => summary.tile_byte_counts = values(bytes, entry, field_type, n)?,
            _ => {}
        }
    }

    let next = read_u32(bytes, base + 2 + count * 12)?;
    Ok((summary, next))
}

fn first_value(bytes: &[u8], entry: usize, field_type: u16) -> Result<u32> {
    values(bytes, entry, field_type, 1)?
        .first()
        .copied()
        .ok_or_else(|| CogError::Malformed("empty tag".into()))
}

/// SHORT or LONG values of an entry, inline or out of line.
fn values(bytes: &[u8], entry: usize, field_type: u16, n: usize) -> Result<Vec<u32>> {
    let width = match field_type {
        3 => 2,
        4 => 4,
        other => {
            return Err(CogError::Unsupported(format!(
                "field type {} for a layout tag",
                other
            )))
        }
    };
    let start = if n * width <= 4 {
        entry + 8
    } else {
        read_u32(bytes, entry + 8)? as usize
    };
    (0..n)
        .map(|i| {
            let at = start + i * width;
            if width == 2 {
                read_u16(bytes, at).map(u32::from)
            } else {
                read_u32(bytes, at)
            }
        })
        .collect()
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| CogError::Malformed(format!("truncated at byte {}", at)))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| CogError::Malformed(format!("truncated at byte {}", at)))
}
