//! `EncryptionInfo` stream codec.
//!
//! The stream starts with an `EncryptionVersionInfo` (`u16 major`, `u16 minor`, `u32 flags`).
//! `minor == 2` with `major` in `2..=4` selects the binary Standard descriptor; `4.4` selects the
//! XML Agile descriptor. Anything else is rejected rather than guessed at.

mod agile;
mod standard;

use std::fmt;

pub use agile::{
    AgileDataIntegrity, AgileDescriptor, AgileKeyData, PasswordKeyEncryptor, AGILE_CIPHER_ALGORITHM,
    AGILE_CIPHER_CHAINING, ENCRYPTION_NS, PASSWORD_KEY_ENCRYPTOR_NS,
};
pub use standard::{
    StandardDescriptor, StandardHeader, StandardVerifier, CALG_AES_128, CALG_AES_192,
    CALG_AES_256, CALG_SHA1, PROV_RSA_AES, STANDARD_CSP_NAME,
};

use crate::crypto::HashAlgorithm;
use crate::error::{OffcryptError, Result};
use crate::kdf::STANDARD_SPIN_COUNT;
use crate::util::Reader;

/// `EncryptionVersionInfo` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionVersion {
    pub major: u16,
    pub minor: u16,
    pub flags: u32,
}

impl EncryptionVersion {
    pub(crate) const LEN: usize = 8;

    fn parse(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            major: r.read_u16_le("EncryptionVersionInfo.major")?,
            minor: r.read_u16_le("EncryptionVersionInfo.minor")?,
            flags: r.read_u32_le("EncryptionVersionInfo.flags")?,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.major.to_le_bytes());
        out.extend_from_slice(&self.minor.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
    }

    pub fn scheme(&self) -> Result<Scheme> {
        match (self.major, self.minor) {
            (4, 4) => Ok(Scheme::Agile),
            (2..=4, 2) => Ok(Scheme::Standard),
            (major, minor) => Err(OffcryptError::UnsupportedScheme { major, minor }),
        }
    }
}

impl fmt::Display for EncryptionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// ECMA-376 Standard encryption (binary descriptor, AES-ECB).
    Standard,
    /// ECMA-376 Agile encryption (XML descriptor, segmented AES-CBC).
    Agile,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Standard => "Standard",
            Scheme::Agile => "Agile",
        })
    }
}

/// A parsed (or freshly built) `EncryptionInfo` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionDescriptor {
    Standard(StandardDescriptor),
    Agile(AgileDescriptor),
}

impl EncryptionDescriptor {
    /// Parse and validate an `EncryptionInfo` stream.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, OffcryptError::descriptor);
        let version = EncryptionVersion::parse(&mut r)?;
        let descriptor = match version.scheme()? {
            Scheme::Agile => Self::Agile(AgileDescriptor::parse(version, r.remaining())?),
            Scheme::Standard => Self::Standard(StandardDescriptor::parse(version, &mut r)?),
        };
        log::debug!(
            "parsed {} EncryptionInfo {}: {}-bit AES, {}, spinCount {}",
            descriptor.scheme(),
            descriptor.version(),
            descriptor.key_bits(),
            descriptor.hash_algorithm(),
            descriptor.spin_count()
        );
        Ok(descriptor)
    }

    /// Serialize to `EncryptionInfo` stream bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Standard(info) => Ok(info.to_bytes()),
            Self::Agile(info) => info.to_bytes(),
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            Self::Standard(_) => Scheme::Standard,
            Self::Agile(_) => Scheme::Agile,
        }
    }

    pub fn version(&self) -> EncryptionVersion {
        match self {
            Self::Standard(info) => info.version,
            Self::Agile(info) => info.version,
        }
    }

    /// Size of the package key.
    pub fn key_bits(&self) -> usize {
        match self {
            Self::Standard(info) => info.header.key_bits as usize,
            Self::Agile(info) => info.key_data.key_bits,
        }
    }

    /// Hash used by the password key schedule.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Standard(_) => HashAlgorithm::Sha1,
            Self::Agile(info) => info.password.hash_algorithm,
        }
    }

    pub fn spin_count(&self) -> u32 {
        match self {
            Self::Standard(_) => STANDARD_SPIN_COUNT,
            Self::Agile(info) => info.password.spin_count,
        }
    }
}
