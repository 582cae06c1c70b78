use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::cfb::CfbWriter;
use crate::crypto::{aes_cbc_encrypt_padded, aes_ecb_encrypt_in_place, HashAlgorithm, AES_BLOCK_SIZE};
use crate::encryption_info::{
    AgileDescriptor, AgileKeyData, EncryptionDescriptor, PasswordKeyEncryptor, Scheme,
    StandardDescriptor, AGILE_CIPHER_ALGORITHM, AGILE_CIPHER_CHAINING,
};
use crate::error::{OffcryptError, Result};
use crate::format::{Document, Format};
use crate::integrity;
use crate::kdf::{salt_iv, validate_spin_count, DerivedKeys, KeyMaterial, STANDARD_SPIN_COUNT};
use crate::password::Password;
use crate::segment::SegmentCipher;
use crate::{ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM};

const SALT_LEN: usize = 16;
const DEFAULT_SPIN_COUNT: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub scheme: Scheme,
    pub key_bits: usize,
    /// Agile only; Standard is always SHA-1.
    pub hash_algorithm: HashAlgorithm,
    /// Agile only; Standard is fixed at 50,000 rounds.
    pub spin_count: u32,
    /// Return the generated (or supplied) package key with the container.
    pub expose_secret_key: bool,
}

impl Default for EncodeOptions {
    /// Office 2010 profile: Agile, AES-128, SHA-1, 100,000 rounds.
    fn default() -> Self {
        Self {
            scheme: Scheme::Agile,
            key_bits: 128,
            hash_algorithm: HashAlgorithm::Sha1,
            spin_count: DEFAULT_SPIN_COUNT,
            expose_secret_key: false,
        }
    }
}

impl EncodeOptions {
    /// Office 2013+ profile: Agile, AES-256, SHA-512, 100,000 rounds.
    pub fn office2013() -> Self {
        Self {
            key_bits: 256,
            hash_algorithm: HashAlgorithm::Sha512,
            ..Self::default()
        }
    }

    /// Office 2007 SP2 profile: Standard, AES-128, SHA-1.
    pub fn standard() -> Self {
        Self {
            scheme: Scheme::Standard,
            key_bits: 128,
            hash_algorithm: HashAlgorithm::Sha1,
            spin_count: STANDARD_SPIN_COUNT,
            expose_secret_key: false,
        }
    }

    fn validate(&self) -> Result<()> {
        match self.scheme {
            Scheme::Agile => {
                if !matches!(self.key_bits, 128 | 256) {
                    return Err(OffcryptError::InvalidOptions(format!(
                        "Agile encryption supports 128- or 256-bit keys, not {}",
                        self.key_bits
                    )));
                }
                validate_spin_count(self.spin_count).map_err(|_| {
                    OffcryptError::InvalidOptions(format!(
                        "spin count {} is outside 1..=10000000",
                        self.spin_count
                    ))
                })
            }
            Scheme::Standard => {
                if self.key_bits != 128 {
                    return Err(OffcryptError::InvalidOptions(format!(
                        "Standard encryption supports only 128-bit keys, not {}",
                        self.key_bits
                    )));
                }
                if self.hash_algorithm != HashAlgorithm::Sha1 {
                    return Err(OffcryptError::InvalidOptions(
                        "Standard encryption always uses SHA-1".to_string(),
                    ));
                }
                if self.spin_count != STANDARD_SPIN_COUNT {
                    log::warn!(
                        "Standard encryption uses a fixed spin count of {STANDARD_SPIN_COUNT}; ignoring {}",
                        self.spin_count
                    );
                }
                Ok(())
            }
        }
    }
}

pub struct Encrypted {
    /// The complete compound file.
    pub container: Vec<u8>,
    pub secret_key: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for Encrypted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encrypted")
            .field("container_len", &self.container.len())
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug)]
pub enum EncodeOutcome {
    Encrypted(Encrypted),
    /// The input is already a compound file; nothing was done.
    AlreadyEncrypted,
}

/// Encrypt a plain OOXML package with fresh randomness from the OS.
pub fn encode(
    bytes: &[u8],
    password: Option<&Password>,
    secret_key: Option<&[u8]>,
    options: &EncodeOptions,
) -> Result<EncodeOutcome> {
    encode_with_rng(&mut OsRng, bytes, password, secret_key, options)
}

pub fn encode_with_rng<R: RngCore + ?Sized>(
    rng: &mut R,
    bytes: &[u8],
    password: Option<&Password>,
    secret_key: Option<&[u8]>,
    options: &EncodeOptions,
) -> Result<EncodeOutcome> {
    if bytes.len() as u64 > u64::from(u32::MAX) {
        return Err(OffcryptError::OversizedInput {
            size: bytes.len() as u64,
        });
    }
    let doc = Document::new(bytes);
    match doc.format() {
        Format::Cfb => {
            log::info!("input is already a compound file; nothing to encrypt");
            Ok(EncodeOutcome::AlreadyEncrypted)
        }
        Format::Unknown => Err(OffcryptError::UnknownFormat),
        Format::Zip => {
            encrypt_package_with_rng(rng, doc.bytes(), password, secret_key, options)
                .map(EncodeOutcome::Encrypted)
        }
    }
}

/// Encrypt arbitrary package bytes into a container without checking their format.
pub fn encrypt_package(
    plaintext: &[u8],
    password: Option<&Password>,
    secret_key: Option<&[u8]>,
    options: &EncodeOptions,
) -> Result<Encrypted> {
    encrypt_package_with_rng(&mut OsRng, plaintext, password, secret_key, options)
}

pub fn encrypt_package_with_rng<R: RngCore + ?Sized>(
    rng: &mut R,
    plaintext: &[u8],
    password: Option<&Password>,
    secret_key: Option<&[u8]>,
    options: &EncodeOptions,
) -> Result<Encrypted> {
    options.validate()?;
    if password.is_none() && secret_key.is_none() {
        return Err(OffcryptError::InvalidOptions(
            "a password or a secret key is required to encrypt".to_string(),
        ));
    }
    if let Some(secret) = secret_key {
        if secret.len() != options.key_bits / 8 {
            return Err(OffcryptError::InvalidOptions(format!(
                "secret key is {} bytes but {}-bit keys were requested",
                secret.len(),
                options.key_bits
            )));
        }
    }

    let (descriptor, package_stream, package_key) = match options.scheme {
        Scheme::Agile => build_agile(rng, plaintext, password, secret_key, options)?,
        Scheme::Standard => build_standard(rng, plaintext, password, secret_key)?,
    };
    let info = descriptor.to_bytes()?;

    let mut writer = CfbWriter::new();
    writer
        .add_stream(ENCRYPTION_INFO_STREAM, &info)?
        .add_stream(ENCRYPTED_PACKAGE_STREAM, &package_stream)?;
    let container = writer.into_bytes()?;
    log::debug!(
        "encrypted {} package bytes with {} {}-bit AES into a {}-byte container",
        plaintext.len(),
        descriptor.scheme(),
        options.key_bits,
        container.len()
    );

    Ok(Encrypted {
        container,
        secret_key: options.expose_secret_key.then_some(package_key),
    })
}

type Built = (EncryptionDescriptor, Vec<u8>, Zeroizing<Vec<u8>>);

fn random_bytes<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    rng.fill_bytes(&mut out);
    out
}

fn build_agile<R: RngCore + ?Sized>(
    rng: &mut R,
    plaintext: &[u8],
    password: Option<&Password>,
    secret_key: Option<&[u8]>,
    options: &EncodeOptions,
) -> Result<Built> {
    let hash = options.hash_algorithm;
    let key_len = options.key_bits / 8;

    let key_data = AgileKeyData::new(random_bytes(rng, SALT_LEN).to_vec(), options.key_bits, hash);
    let password_salt = random_bytes(rng, SALT_LEN).to_vec();
    let package_key = match secret_key {
        Some(secret) => Zeroizing::new(secret.to_vec()),
        None => random_bytes(rng, key_len),
    };

    // Without a password the key encryptor is keyed by the secret itself.
    let material = match (password, secret_key) {
        (Some(password), _) => KeyMaterial::Password(password),
        (None, Some(secret)) => KeyMaterial::SecretKey(secret),
        (None, None) => {
            return Err(OffcryptError::InvalidOptions(
                "a password or a secret key is required to encrypt".to_string(),
            ))
        }
    };
    let keys = DerivedKeys::agile(material, &password_salt, hash, options.spin_count, options.key_bits)?;
    let iv = salt_iv(&password_salt, AES_BLOCK_SIZE);

    let verifier_input = random_bytes(rng, SALT_LEN);
    let verifier_hash = Zeroizing::new(hash.digest(&verifier_input));
    let password_encryptor = PasswordKeyEncryptor {
        spin_count: options.spin_count,
        salt: password_salt,
        block_size: AES_BLOCK_SIZE,
        key_bits: options.key_bits,
        hash_size: hash.digest_len(),
        hash_algorithm: hash,
        cipher_algorithm: AGILE_CIPHER_ALGORITHM.to_string(),
        cipher_chaining: AGILE_CIPHER_CHAINING.to_string(),
        encrypted_verifier_hash_input: aes_cbc_encrypt_padded(
            &keys.verifier_input_key,
            &iv,
            &verifier_input,
        )?,
        encrypted_verifier_hash_value: aes_cbc_encrypt_padded(
            &keys.verifier_hash_key,
            &iv,
            &verifier_hash,
        )?,
        encrypted_key_value: aes_cbc_encrypt_padded(&keys.encryption_key, &iv, &package_key)?,
    };

    let cipher = SegmentCipher::agile(&package_key, &key_data.salt, hash, key_data.block_size);
    let package_stream = cipher.encrypt_package(plaintext)?;
    let data_integrity = integrity::seal(rng, &key_data, &package_key, &package_stream)?;

    let descriptor = AgileDescriptor::new(key_data, Some(data_integrity), password_encryptor);
    Ok((EncryptionDescriptor::Agile(descriptor), package_stream, package_key))
}

fn build_standard<R: RngCore + ?Sized>(
    rng: &mut R,
    plaintext: &[u8],
    password: Option<&Password>,
    secret_key: Option<&[u8]>,
) -> Result<Built> {
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    // Standard has no key wrap: the verifier is encrypted under the package key itself.
    let package_key = match (password, secret_key) {
        (Some(_), Some(_)) => {
            return Err(OffcryptError::InvalidOptions(
                "Standard encryption cannot combine a password with a secret key".to_string(),
            ))
        }
        (Some(password), None) => {
            DerivedKeys::standard(KeyMaterial::Password(password), &salt, 128)?.encryption_key
        }
        (None, Some(secret)) => Zeroizing::new(secret.to_vec()),
        (None, None) => {
            return Err(OffcryptError::InvalidOptions(
                "a password or a secret key is required to encrypt".to_string(),
            ))
        }
    };

    let verifier = random_bytes(rng, SALT_LEN);
    let mut encrypted_verifier = [0u8; 16];
    encrypted_verifier.copy_from_slice(&verifier);
    aes_ecb_encrypt_in_place(&package_key, &mut encrypted_verifier)?;

    let mut encrypted_verifier_hash = [0u8; 32];
    encrypted_verifier_hash[..20].copy_from_slice(&HashAlgorithm::Sha1.digest(&verifier));
    aes_ecb_encrypt_in_place(&package_key, &mut encrypted_verifier_hash)?;

    let cipher = SegmentCipher::standard(&package_key);
    let package_stream = cipher.encrypt_package(plaintext)?;
    let descriptor = StandardDescriptor::new(salt, encrypted_verifier, encrypted_verifier_hash);
    Ok((EncryptionDescriptor::Standard(descriptor), package_stream, package_key))
}
