//! Compound File Binary (MS-CFB) container support.
//!
//! The reader accepts v3 (512-byte sectors) and v4 (4096-byte sectors) files and exposes the
//! streams stored directly under the root storage. The writer only emits what an encrypted OOXML
//! package needs: a v3 file with a flat set of root-level streams.

mod reader;
mod writer;

use std::cmp::Ordering;
use std::fmt;

pub use reader::CfbReader;
pub use writer::CfbWriter;

pub(crate) const HEADER_LEN: usize = 512;
pub(crate) const HEADER_DIFAT_ENTRIES: usize = 109;
pub(crate) const DIR_ENTRY_LEN: usize = 128;
pub(crate) const MINI_SECTOR_SHIFT: u16 = 6;
pub(crate) const MINI_SECTOR_LEN: usize = 1 << MINI_SECTOR_SHIFT;
pub(crate) const MINI_STREAM_CUTOFF: u32 = 4096;
pub(crate) const MINOR_VERSION: u16 = 0x003E;
pub(crate) const BYTE_ORDER_MARK: u16 = 0xFFFE;

pub(crate) const MAXREGSECT: u32 = 0xFFFF_FFFA;
pub(crate) const DIFSECT: u32 = 0xFFFF_FFFC;
pub(crate) const FATSECT: u32 = 0xFFFF_FFFD;
pub(crate) const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
pub(crate) const FREESECT: u32 = 0xFFFF_FFFF;
pub(crate) const NOSTREAM: u32 = 0xFFFF_FFFF;

/// Longest entry name, in UTF-16 code units, excluding the terminator.
pub const MAX_NAME_UNITS: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfbVersion {
    V3,
    V4,
}

impl CfbVersion {
    pub(crate) fn major(self) -> u16 {
        match self {
            Self::V3 => 3,
            Self::V4 => 4,
        }
    }

    pub(crate) fn sector_shift(self) -> u16 {
        match self {
            Self::V3 => 9,
            Self::V4 => 12,
        }
    }

    pub fn sector_len(self) -> usize {
        1 << self.sector_shift()
    }
}

impl fmt::Display for CfbVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.major())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Empty,
    Storage,
    Stream,
    Root,
}

impl EntryType {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Empty),
            1 => Some(Self::Storage),
            2 => Some(Self::Stream),
            5 => Some(Self::Root),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Storage => 1,
            Self::Stream => 2,
            Self::Root => 5,
        }
    }
}

/// One 128-byte directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub(crate) left: u32,
    pub(crate) right: u32,
    pub(crate) child: u32,
    pub start_sector: u32,
    pub size: u64,
}

/// Sibling order used by the directory red-black tree: shorter names first, then code unit
/// order after simple uppercasing.
pub(crate) fn compare_names(a: &str, b: &str) -> Ordering {
    let a: Vec<u16> = a.encode_utf16().map(uppercase_unit).collect();
    let b: Vec<u16> = b.encode_utf16().map(uppercase_unit).collect();
    a.len().cmp(&b.len()).then_with(|| a.cmp(&b))
}

fn uppercase_unit(unit: u16) -> u16 {
    let Some(c) = char::from_u32(u32::from(unit)) else {
        // Lone surrogate.
        return unit;
    };
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) if (u as u32) <= 0xFFFF => u as u16,
        _ => unit,
    }
}

pub(crate) fn names_equal(a: &str, b: &str) -> bool {
    compare_names(a, b) == Ordering::Equal
}
