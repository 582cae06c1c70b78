use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use subtle::ConstantTimeEq as _;

use crate::error::{OffcryptError, Result};

/// Bounds-checked little-endian cursor over untrusted bytes.
///
/// Every read names what it was reading; running out of input maps that name through
/// `truncated`, so the same reader serves both container and descriptor parsing.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    truncated: fn(&'static str) -> OffcryptError,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8], truncated: fn(&'static str) -> OffcryptError) -> Self {
        Self {
            bytes,
            pos: 0,
            truncated,
        }
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        self.bytes.get(self.pos..).unwrap_or_default()
    }

    pub(crate) fn skip(&mut self, n: usize, context: &'static str) -> Result<()> {
        self.take(n, context).map(|_| ())
    }

    pub(crate) fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8]> {
        let end = self.pos.saturating_add(n);
        let out = self
            .bytes
            .get(self.pos..end)
            .ok_or((self.truncated)(context))?;
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self, context: &'static str) -> Result<u8> {
        let b = self.take(1, context)?;
        Ok(b[0])
    }

    pub(crate) fn read_u16_le(&mut self, context: &'static str) -> Result<u16> {
        let b = self.take(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32_le(&mut self, context: &'static str) -> Result<u32> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u64_le(&mut self, context: &'static str) -> Result<u64> {
        let b = self.take(8, context)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

/// Constant-time equality for verifier and HMAC digests.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

pub(crate) fn utf16le_bytes(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len().saturating_mul(2));
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Decode a base64 XML attribute value.
///
/// Pretty-printed descriptors may wrap long values across lines and some producers drop the `=`
/// padding, so whitespace is stripped and both padded and unpadded forms are accepted.
pub(crate) fn decode_b64_attr(value: &str) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = value
        .bytes()
        .filter(|b| !matches!(b, b'\r' | b'\n' | b'\t' | b' '))
        .collect();
    STANDARD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .map_err(|_| OffcryptError::descriptor("invalid base64 value"))
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Round `len` up to the next multiple of `align` (a power of two).
pub(crate) fn align_up(len: usize, align: usize) -> usize {
    (len + (align - 1)) & !(align - 1)
}
