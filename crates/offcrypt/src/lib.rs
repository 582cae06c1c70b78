//! MS-OFFCRYPTO encryption and decryption of OOXML packages.
//!
//! This crate supports:
//! - Reading and writing the Compound File Binary container that wraps an encrypted package
//! - Parsing and serializing *Standard* (binary, version 2.2 to 4.2) and *Agile* (XML, version
//!   4.4) `EncryptionInfo` descriptors
//! - Password and raw secret-key key derivation, verifier checks and Agile `dataIntegrity` HMACs
//! - Segment-wise `EncryptedPackage` encryption and decryption
//!
//! The entry points are [`decode`] and [`encode`]. Both operate on whole in-memory buffers and
//! report no-op inputs (already decrypted / already encrypted) and wrong passwords as outcome
//! values rather than errors.

pub mod cfb;
mod crypto;
pub mod decode;
pub mod encode;
pub mod encryption_info;
mod error;
pub mod format;
pub mod inspect;
pub mod integrity;
pub mod kdf;
mod password;
pub mod secret_key;
pub mod segment;
mod util;

#[cfg(test)]
mod fuzz_tests;

pub use crate::crypto::HashAlgorithm;
pub use crate::decode::{decode, DecodeOptions, DecodeOutcome, Decrypted, Verification};
pub use crate::encode::{
    encode, encode_with_rng, encrypt_package, encrypt_package_with_rng, EncodeOptions,
    EncodeOutcome, Encrypted,
};
pub use crate::encryption_info::{EncryptionDescriptor, Scheme};
pub use crate::error::{OffcryptError, Result};
pub use crate::format::{detect, Format};
pub use crate::inspect::{inspect, ContainerSummary};
pub use crate::password::Password;
pub use crate::secret_key::secret_key_from_key_file;
pub use crate::segment::SegmentCipher;

/// Name of the CFB stream holding the encryption descriptor.
pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
/// Name of the CFB stream holding the encrypted package.
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";
