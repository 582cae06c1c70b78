use std::fmt;

use zeroize::Zeroizing;

use crate::cfb::CfbReader;
use crate::encryption_info::{EncryptionDescriptor, Scheme};
use crate::error::{OffcryptError, Result};
use crate::format::{Document, Format};
use crate::integrity;
use crate::kdf::{unlock, KeyMaterial};
use crate::password::Password;
use crate::segment::{split_package, SegmentCipher};
use crate::{ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Check the Agile `dataIntegrity` HMAC when the descriptor carries one.
    pub verify_integrity: bool,
    /// Return the package key alongside the plaintext.
    pub expose_secret_key: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            verify_integrity: true,
            expose_secret_key: false,
        }
    }
}

/// Whether the password verifier was checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// A raw secret key was supplied, so there was no password to verify.
    Skipped,
}

pub struct Decrypted {
    pub package: Vec<u8>,
    pub scheme: Scheme,
    pub verification: Verification,
    /// The package key, when [`DecodeOptions::expose_secret_key`] is set.
    pub secret_key: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for Decrypted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decrypted")
            .field("package_len", &self.package.len())
            .field("scheme", &self.scheme)
            .field("verification", &self.verification)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug)]
pub enum DecodeOutcome {
    Decrypted(Decrypted),
    /// The input is already a plain ZIP package; nothing was done.
    AlreadyDecrypted,
    /// The password did not match the verifier.
    AuthenticationFailed,
}

/// Decrypt an encrypted OOXML container.
///
/// A secret key, when given, is used directly as the package key and takes precedence over the
/// password.
pub fn decode(
    bytes: &[u8],
    password: Option<&Password>,
    secret_key: Option<&[u8]>,
    options: &DecodeOptions,
) -> Result<DecodeOutcome> {
    if bytes.len() as u64 > u64::from(u32::MAX) {
        return Err(OffcryptError::OversizedInput {
            size: bytes.len() as u64,
        });
    }
    let doc = Document::new(bytes);
    match doc.format() {
        Format::Zip => {
            log::info!("input is a plain package; nothing to decrypt");
            return Ok(DecodeOutcome::AlreadyDecrypted);
        }
        Format::Unknown => return Err(OffcryptError::UnknownFormat),
        Format::Cfb => {}
    }

    let reader = CfbReader::open(doc.bytes())?;
    if !reader.has_stream(ENCRYPTION_INFO_STREAM) {
        return Err(OffcryptError::malformed("container has no EncryptionInfo stream"));
    }
    if !reader.has_stream(ENCRYPTED_PACKAGE_STREAM) {
        return Err(OffcryptError::malformed("container has no EncryptedPackage stream"));
    }
    let descriptor = EncryptionDescriptor::parse(&reader.read_stream(ENCRYPTION_INFO_STREAM)?)?;
    let package_stream = reader.read_stream(ENCRYPTED_PACKAGE_STREAM)?;
    log::trace!(
        "EncryptedPackage stream is {} bytes",
        package_stream.len()
    );
    // Framing is checked before any key work so a short stream reads as malformed on both schemes.
    split_package(&package_stream)?;

    let (package_key, verification) = match (secret_key, password) {
        (Some(secret), _) => {
            let expected = descriptor.key_bits() / 8;
            if secret.len() != expected {
                return Err(OffcryptError::InvalidOptions(format!(
                    "secret key is {} bytes but the document uses {}-bit keys",
                    secret.len(),
                    descriptor.key_bits()
                )));
            }
            if password.is_some() {
                log::debug!("secret key supplied; ignoring the password");
            }
            (Zeroizing::new(secret.to_vec()), Verification::Skipped)
        }
        (None, Some(password)) => match unlock(&descriptor, KeyMaterial::Password(password))? {
            Some(key) => (key, Verification::Verified),
            None => return Ok(DecodeOutcome::AuthenticationFailed),
        },
        (None, None) => {
            return Err(OffcryptError::InvalidOptions(
                "a password or a secret key is required to decrypt".to_string(),
            ))
        }
    };

    if let EncryptionDescriptor::Agile(info) = &descriptor {
        match &info.data_integrity {
            Some(di) if options.verify_integrity => {
                integrity::verify(&info.key_data, di, &package_key, &package_stream)?;
                log::debug!("dataIntegrity HMAC verified");
            }
            Some(_) => log::debug!("dataIntegrity check disabled by options"),
            None => log::warn!("document has no dataIntegrity element; skipping HMAC check"),
        }
    }

    let cipher = SegmentCipher::for_descriptor(&descriptor, &package_key);
    let package = cipher.decrypt_package(&package_stream)?;
    if Document::new(&package).format() != Format::Zip {
        log::warn!("decrypted package does not start with a ZIP signature");
    }

    Ok(DecodeOutcome::Decrypted(Decrypted {
        package,
        scheme: descriptor.scheme(),
        verification,
        secret_key: options.expose_secret_key.then_some(package_key),
    }))
}
