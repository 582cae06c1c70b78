use std::fmt;

use zeroize::Zeroizing;

use crate::util::utf16le_bytes;

/// A document password in its hashed form: UTF-16LE code units, no BOM, no terminator.
///
/// The bytes are wiped on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct Password(Zeroizing<Vec<u8>>);

impl Password {
    pub fn new(password: &str) -> Self {
        Self(Zeroizing::new(utf16le_bytes(password)))
    }

    /// Wrap bytes that are already UTF-16LE encoded.
    pub fn from_utf16le(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Build a password from raw UTF-16 code units (unpaired surrogates are kept as-is).
    pub fn from_utf16_units(units: &[u16]) -> Self {
        let mut out = Vec::with_capacity(units.len() * 2);
        for unit in units {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        Self(Zeroizing::new(out))
    }

    pub fn as_utf16le(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_utf16le_without_terminator() {
        assert_eq!(Password::new("hi").as_utf16le(), &[b'h', 0, b'i', 0]);
        // U+3042 HIRAGANA LETTER A
        assert_eq!(Password::new("\u{3042}").as_utf16le(), &[0x42, 0x30]);
        assert!(Password::new("").is_empty());
    }

    #[test]
    fn code_units_match_str_encoding() {
        assert_eq!(
            Password::from_utf16_units(&[0x3042, 0x3044]).as_utf16le(),
            Password::new("\u{3042}\u{3044}").as_utf16le()
        );
    }

    #[test]
    fn debug_is_redacted() {
        assert_eq!(format!("{:?}", Password::new("secret")), "Password(<redacted>)");
    }
}
