use std::fmt;

use crate::cfb::{CfbReader, CfbVersion};
use crate::crypto::HashAlgorithm;
use crate::encryption_info::{EncryptionDescriptor, EncryptionVersion, Scheme};
use crate::error::{OffcryptError, Result};
use crate::format::{detect, Format};
use crate::segment::split_package;
use crate::{ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM};

/// What an encrypted container declares about itself, readable without key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub container_version: CfbVersion,
    pub scheme: Scheme,
    pub version: EncryptionVersion,
    pub key_bits: usize,
    pub hash_algorithm: HashAlgorithm,
    pub spin_count: u32,
    pub has_data_integrity: bool,
    pub encryption_info_len: usize,
    pub encrypted_package_len: usize,
    /// Plaintext size from the `EncryptedPackage` header.
    pub package_size: usize,
}

/// Summarize an encrypted container.
///
/// A plain ZIP package yields [`OffcryptError::NotEncrypted`]; input that is neither a compound
/// file nor a ZIP package yields [`OffcryptError::UnknownFormat`].
pub fn inspect(bytes: &[u8]) -> Result<ContainerSummary> {
    match detect(bytes) {
        Format::Cfb => {}
        Format::Zip => return Err(OffcryptError::NotEncrypted),
        Format::Unknown => return Err(OffcryptError::UnknownFormat),
    }
    let reader = CfbReader::open(bytes)?;
    let info = reader.read_stream(ENCRYPTION_INFO_STREAM)?;
    let package = reader.read_stream(ENCRYPTED_PACKAGE_STREAM)?;
    let descriptor = EncryptionDescriptor::parse(&info)?;
    let (package_size, _) = split_package(&package)?;

    Ok(ContainerSummary {
        container_version: reader.version(),
        scheme: descriptor.scheme(),
        version: descriptor.version(),
        key_bits: descriptor.key_bits(),
        hash_algorithm: descriptor.hash_algorithm(),
        spin_count: descriptor.spin_count(),
        has_data_integrity: matches!(
            &descriptor,
            EncryptionDescriptor::Agile(info) if info.data_integrity.is_some()
        ),
        encryption_info_len: info.len(),
        encrypted_package_len: package.len(),
        package_size,
    })
}

impl fmt::Display for ContainerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "container:        CFB {}", self.container_version)?;
        writeln!(f, "scheme:           {} ({})", self.scheme, self.version)?;
        writeln!(f, "cipher:           AES-{}", self.key_bits)?;
        writeln!(f, "hash:             {}", self.hash_algorithm)?;
        writeln!(f, "spin count:       {}", self.spin_count)?;
        if self.scheme == Scheme::Agile {
            writeln!(
                f,
                "data integrity:   {}",
                if self.has_data_integrity { "HMAC" } else { "absent" }
            )?;
        }
        writeln!(f, "EncryptionInfo:   {} bytes", self.encryption_info_len)?;
        writeln!(f, "EncryptedPackage: {} bytes", self.encrypted_package_len)?;
        write!(f, "package size:     {} bytes", self.package_size)
    }
}
