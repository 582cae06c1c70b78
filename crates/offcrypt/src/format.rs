//! Magic-signature classification of input documents.

use std::fmt;

/// Compound File Binary signature (`D0 CF 11 E0 A1 B1 1A E1`).
pub const CFB_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
/// ZIP local file header signature (`PK\x03\x04`).
pub const ZIP_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// An OLE/CFB container, i.e. an encrypted document.
    Cfb,
    /// A plain OOXML (ZIP) package.
    Zip,
    Unknown,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Cfb => "CFB",
            Format::Zip => "ZIP",
            Format::Unknown => "unknown",
        })
    }
}

/// Classify `bytes` by an exact signature match at offset 0.
pub fn detect(bytes: &[u8]) -> Format {
    if bytes.starts_with(&CFB_SIGNATURE) {
        Format::Cfb
    } else if bytes.starts_with(&ZIP_SIGNATURE) {
        Format::Zip
    } else {
        Format::Unknown
    }
}

/// An input buffer together with its detected format.
#[derive(Debug, Clone, Copy)]
pub struct Document<'a> {
    bytes: &'a [u8],
    format: Format,
}

impl<'a> Document<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            format: detect(bytes),
        }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn format(&self) -> Format {
        self.format
    }
}
