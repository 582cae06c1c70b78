//! Password and secret-key key derivation.
//!
//! Both schemes start from the same iterated hash:
//! 1. `H = Hash(salt || password_utf16le)`
//! 2. For `i in 0..spinCount`: `H = Hash(LE32(i) || H)`
//!
//! Agile then derives one key per purpose as `Hash(H || blockKey)`, truncated to the key length
//! or padded with `0x36`. Standard uses the CryptoAPI construction over `Hash(H || LE32(0))` and
//! a single key for both the verifier and the package.
//!
//! Supplying [`KeyMaterial::SecretKey`] skips steps 1 and 2: the raw bytes stand in for `H`.
//! This is a compatibility extension for documents that are not password protected and does not
//! correspond to anything other implementations produce.

use std::fmt;

use zeroize::Zeroizing;

use crate::crypto::{aes_cbc_decrypt, aes_ecb_decrypt_in_place, HashAlgorithm};
use crate::encryption_info::{
    AgileDescriptor, EncryptionDescriptor, PasswordKeyEncryptor, StandardDescriptor,
};
use crate::error::{OffcryptError, Result};
use crate::password::Password;
use crate::util::ct_eq;

/// Standard encryption always uses 50,000 rounds; the count is not stored in the descriptor.
pub const STANDARD_SPIN_COUNT: u32 = 50_000;
/// Upper bound on `spinCount` accepted from descriptors and options.
pub const MAX_SPIN_COUNT: u32 = 10_000_000;

/// Agile block key for the `encryptedVerifierHashInput` key.
pub const VERIFIER_HASH_INPUT_BLOCK: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
/// Agile block key for the `encryptedVerifierHashValue` key.
pub const VERIFIER_HASH_VALUE_BLOCK: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
/// Agile block key for the `encryptedKeyValue` key.
pub const KEY_VALUE_BLOCK: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
/// Agile block key for the `dataIntegrity` HMAC key IV.
pub const HMAC_KEY_BLOCK: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
/// Agile block key for the `dataIntegrity` HMAC value IV.
pub const HMAC_VALUE_BLOCK: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

const PAD_BYTE: u8 = 0x36;

/// What the iterated hash is computed from.
#[derive(Clone, Copy)]
pub enum KeyMaterial<'a> {
    Password(&'a Password),
    /// Raw bytes used directly as the iterated hash.
    SecretKey(&'a [u8]),
}

impl fmt::Debug for KeyMaterial<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Password(_) => f.write_str("KeyMaterial::Password(<redacted>)"),
            KeyMaterial::SecretKey(_) => f.write_str("KeyMaterial::SecretKey(<redacted>)"),
        }
    }
}

pub fn validate_spin_count(spin_count: u32) -> Result<()> {
    if spin_count == 0 {
        return Err(OffcryptError::descriptor("spinCount must be non-zero"));
    }
    if spin_count > MAX_SPIN_COUNT {
        return Err(OffcryptError::descriptor("spinCount exceeds 10,000,000"));
    }
    Ok(())
}

/// Compute the iterated hash `H` for `material`.
pub fn iterated_hash(
    material: KeyMaterial<'_>,
    salt: &[u8],
    hash_alg: HashAlgorithm,
    spin_count: u32,
) -> Zeroizing<Vec<u8>> {
    let password = match material {
        KeyMaterial::SecretKey(secret) => return Zeroizing::new(secret.to_vec()),
        KeyMaterial::Password(password) => password,
    };

    let digest_len = hash_alg.digest_len();
    let mut h = Zeroizing::new(vec![0u8; digest_len]);

    let mut initial = Zeroizing::new(Vec::with_capacity(salt.len() + password.as_utf16le().len()));
    initial.extend_from_slice(salt);
    initial.extend_from_slice(password.as_utf16le());
    hash_alg.digest_into(&initial, &mut h);

    // Reuse one round buffer: LE32(i) || H.
    let mut round = Zeroizing::new(vec![0u8; 4 + digest_len]);
    for i in 0..spin_count {
        round[..4].copy_from_slice(&i.to_le_bytes());
        round[4..].copy_from_slice(&h);
        hash_alg.digest_into(&round, &mut h);
    }

    h
}

fn fit_to_len(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    if bytes.len() < len {
        bytes.resize(len, PAD_BYTE);
    } else {
        bytes.truncate(len);
    }
    bytes
}

/// `Hash(h || block_key)`, truncated to `key_len` or padded with `0x36`.
pub fn derive_key(
    h: &[u8],
    block_key: &[u8],
    hash_alg: HashAlgorithm,
    key_len: usize,
) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(fit_to_len(hash_alg.digest_parts(&[h, block_key]), key_len))
}

/// `Hash(salt || block_key)`, truncated to `iv_len` or padded with `0x36`.
pub fn derive_iv(salt: &[u8], block_key: &[u8], hash_alg: HashAlgorithm, iv_len: usize) -> Vec<u8> {
    fit_to_len(hash_alg.digest_parts(&[salt, block_key]), iv_len)
}

/// IV for `EncryptedPackage` segment `index`: `Hash(keyDataSalt || LE32(index))`.
pub fn segment_iv(salt: &[u8], index: u32, hash_alg: HashAlgorithm, block_size: usize) -> Vec<u8> {
    derive_iv(salt, &index.to_le_bytes(), hash_alg, block_size)
}

/// The salt doubles as IV for the password verifier fields.
pub(crate) fn salt_iv(salt: &[u8], block_size: usize) -> Vec<u8> {
    fit_to_len(salt.to_vec(), block_size)
}

/// Keys derived from one iterated hash.
///
/// For Standard encryption all three are the same key.
pub struct DerivedKeys {
    pub encryption_key: Zeroizing<Vec<u8>>,
    pub verifier_input_key: Zeroizing<Vec<u8>>,
    pub verifier_hash_key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("key_len", &self.encryption_key.len())
            .finish_non_exhaustive()
    }
}

fn key_len_from_bits(key_bits: usize) -> Result<usize> {
    match key_bits {
        128 | 192 | 256 => Ok(key_bits / 8),
        _ => Err(OffcryptError::descriptor("keyBits must be 128, 192 or 256")),
    }
}

impl DerivedKeys {
    /// Derive the Agile key-encryptor keys. `encryption_key` unwraps `encryptedKeyValue`.
    pub fn agile(
        material: KeyMaterial<'_>,
        salt: &[u8],
        hash_alg: HashAlgorithm,
        spin_count: u32,
        key_bits: usize,
    ) -> Result<Self> {
        validate_spin_count(spin_count)?;
        let key_len = key_len_from_bits(key_bits)?;
        let h = iterated_hash(material, salt, hash_alg, spin_count);
        Ok(Self::agile_from_hash(&h, hash_alg, key_len))
    }

    fn agile_from_hash(h: &[u8], hash_alg: HashAlgorithm, key_len: usize) -> Self {
        Self {
            encryption_key: derive_key(h, &KEY_VALUE_BLOCK, hash_alg, key_len),
            verifier_input_key: derive_key(h, &VERIFIER_HASH_INPUT_BLOCK, hash_alg, key_len),
            verifier_hash_key: derive_key(h, &VERIFIER_HASH_VALUE_BLOCK, hash_alg, key_len),
        }
    }

    /// Derive the Standard (CryptoAPI, SHA-1) key.
    pub fn standard(material: KeyMaterial<'_>, salt: &[u8], key_bits: usize) -> Result<Self> {
        let key_len = key_len_from_bits(key_bits)?;
        let h = iterated_hash(material, salt, HashAlgorithm::Sha1, STANDARD_SPIN_COUNT);
        let key = standard_key_from_hash(&h, key_len);
        Ok(Self {
            encryption_key: key.clone(),
            verifier_input_key: key.clone(),
            verifier_hash_key: key,
        })
    }
}

/// CryptoAPI key expansion: `(SHA1(0x36^64 ^ Hfinal) || SHA1(0x5C^64 ^ Hfinal))[..key_len]`
/// with `Hfinal = SHA1(H || LE32(0))`.
fn standard_key_from_hash(h: &[u8], key_len: usize) -> Zeroizing<Vec<u8>> {
    let h_final = Zeroizing::new(HashAlgorithm::Sha1.digest_parts(&[h, &0u32.to_le_bytes()]));

    let mut inner = Zeroizing::new([0x36u8; 64]);
    let mut outer = Zeroizing::new([0x5Cu8; 64]);
    for (i, b) in h_final.iter().enumerate() {
        inner[i] ^= b;
        outer[i] ^= b;
    }

    let mut out = Zeroizing::new(HashAlgorithm::Sha1.digest(&inner[..]));
    out.extend_from_slice(&HashAlgorithm::Sha1.digest(&outer[..]));
    out.truncate(key_len);
    out
}

/// Compare `Hash(verifier_input)` against a decrypted verifier hash that may carry block padding.
pub fn verify_digest(hash_alg: HashAlgorithm, verifier_input: &[u8], decrypted_hash: &[u8]) -> bool {
    let digest = hash_alg.digest(verifier_input);
    match decrypted_hash.get(..digest.len()) {
        Some(expected) => ct_eq(&digest, expected),
        None => false,
    }
}

/// Check `material` against the descriptor's password verifier and recover the package key.
///
/// Returns `Ok(None)` when the verifier does not match.
pub fn unlock(
    descriptor: &EncryptionDescriptor,
    material: KeyMaterial<'_>,
) -> Result<Option<Zeroizing<Vec<u8>>>> {
    match descriptor {
        EncryptionDescriptor::Standard(info) => unlock_standard(info, material),
        EncryptionDescriptor::Agile(info) => unlock_agile(info, material),
    }
}

fn unlock_standard(
    info: &StandardDescriptor,
    material: KeyMaterial<'_>,
) -> Result<Option<Zeroizing<Vec<u8>>>> {
    let keys = DerivedKeys::standard(material, &info.verifier.salt, info.header.key_bits as usize)?;

    let mut verifier = Zeroizing::new(info.verifier.encrypted_verifier);
    aes_ecb_decrypt_in_place(&keys.verifier_input_key, &mut verifier[..])?;
    let mut verifier_hash = Zeroizing::new(info.verifier.encrypted_verifier_hash.clone());
    aes_ecb_decrypt_in_place(&keys.verifier_hash_key, &mut verifier_hash)?;

    if !verify_digest(HashAlgorithm::Sha1, &verifier[..], &verifier_hash) {
        log::debug!("standard password verifier mismatch");
        return Ok(None);
    }
    Ok(Some(keys.encryption_key))
}

fn unlock_agile(
    info: &AgileDescriptor,
    material: KeyMaterial<'_>,
) -> Result<Option<Zeroizing<Vec<u8>>>> {
    let enc: &PasswordKeyEncryptor = &info.password;
    let keys = DerivedKeys::agile(
        material,
        &enc.salt,
        enc.hash_algorithm,
        enc.spin_count,
        enc.key_bits,
    )?;
    let iv = salt_iv(&enc.salt, enc.block_size);

    let verifier_input = Zeroizing::new(aes_cbc_decrypt(
        &keys.verifier_input_key,
        &iv,
        &enc.encrypted_verifier_hash_input,
    )?);
    let verifier_input = verifier_input
        .get(..enc.salt.len())
        .ok_or(OffcryptError::descriptor("encryptedVerifierHashInput is truncated"))?;
    let verifier_hash = Zeroizing::new(aes_cbc_decrypt(
        &keys.verifier_hash_key,
        &iv,
        &enc.encrypted_verifier_hash_value,
    )?);

    if !verify_digest(enc.hash_algorithm, verifier_input, &verifier_hash) {
        log::debug!("agile password verifier mismatch");
        return Ok(None);
    }

    let key_value = Zeroizing::new(aes_cbc_decrypt(
        &keys.encryption_key,
        &iv,
        &enc.encrypted_key_value,
    )?);
    let package_key_len = info.key_data.key_bits / 8;
    let package_key = key_value
        .get(..package_key_len)
        .ok_or(OffcryptError::descriptor("encryptedKeyValue is truncated"))?;
    Ok(Some(Zeroizing::new(package_key.to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s).expect("valid hex")
    }

    #[test]
    fn agile_sha1_hello_zero_salt_vectors() {
        let password = Password::new("hello");
        let salt = [0u8; 16];
        let h = iterated_hash(
            KeyMaterial::Password(&password),
            &salt,
            HashAlgorithm::Sha1,
            100_000,
        );
        assert_eq!(h.as_slice(), unhex("5b5d5a853fdaf89a3eb658ca6315b92b38cf1930"));

        let keys = DerivedKeys::agile(
            KeyMaterial::Password(&password),
            &salt,
            HashAlgorithm::Sha1,
            100_000,
            128,
        )
        .unwrap();
        assert_eq!(
            keys.encryption_key.as_slice(),
            unhex("fa559f59592308aaeea580fe69815fd3")
        );
        assert_eq!(
            keys.verifier_input_key.as_slice(),
            unhex("54898bb50bdcaa099a69925011b3ca87")
        );
        assert_eq!(
            keys.verifier_hash_key.as_slice(),
            unhex("15b25b784ba00513b99089c77c3df83d")
        );
    }

    #[test]
    fn standard_key_vectors() {
        let salt: Vec<u8> = (0u8..16).collect();
        let keys =
            DerivedKeys::standard(KeyMaterial::Password(&Password::new("Password")), &salt, 128)
                .unwrap();
        assert_eq!(
            keys.encryption_key.as_slice(),
            unhex("1ba005261aaee4686a9939437075e6c4")
        );

        let keys =
            DerivedKeys::standard(KeyMaterial::Password(&Password::new("hello")), &[0u8; 16], 128)
                .unwrap();
        assert_eq!(
            keys.encryption_key.as_slice(),
            unhex("722460d38f408d7a7cca803ccb3dd627")
        );
        assert_eq!(keys.encryption_key, keys.verifier_input_key);
    }

    #[test]
    fn spin_count_changes_the_key() {
        let password = Password::new("hello");
        let a = DerivedKeys::agile(
            KeyMaterial::Password(&password),
            &[1u8; 16],
            HashAlgorithm::Sha256,
            1000,
            256,
        )
        .unwrap();
        let b = DerivedKeys::agile(
            KeyMaterial::Password(&password),
            &[1u8; 16],
            HashAlgorithm::Sha256,
            1001,
            256,
        )
        .unwrap();
        assert_ne!(a.encryption_key, b.encryption_key);
    }

    #[test]
    fn secret_key_skips_spin_loop() {
        let secret = [0xABu8; 32];
        let h = iterated_hash(KeyMaterial::SecretKey(&secret), &[0u8; 16], HashAlgorithm::Sha512, 1);
        assert_eq!(h.as_slice(), &secret);

        let keys = DerivedKeys::agile(
            KeyMaterial::SecretKey(&secret),
            &[0u8; 16],
            HashAlgorithm::Sha512,
            1,
            256,
        )
        .unwrap();
        let expected = HashAlgorithm::Sha512.digest_parts(&[&secret, &KEY_VALUE_BLOCK]);
        assert_eq!(keys.encryption_key.as_slice(), &expected[..32]);
    }

    #[test]
    fn short_digests_are_padded_with_0x36() {
        let key = derive_key(b"h", &KEY_VALUE_BLOCK, HashAlgorithm::Sha1, 32);
        let digest = HashAlgorithm::Sha1.digest_parts(&[b"h", &KEY_VALUE_BLOCK]);
        assert_eq!(&key[..20], digest.as_slice());
        assert!(key[20..].iter().all(|b| *b == 0x36));
    }

    #[test]
    fn segment_iv_uses_le32_index() {
        let salt = [7u8; 16];
        let iv = segment_iv(&salt, 3, HashAlgorithm::Sha256, 16);
        let expected = HashAlgorithm::Sha256.digest_parts(&[&salt, &[3, 0, 0, 0]]);
        assert_eq!(iv, &expected[..16]);
    }

    #[test]
    fn spin_count_bounds() {
        assert!(validate_spin_count(0).is_err());
        assert!(validate_spin_count(1).is_ok());
        assert!(validate_spin_count(MAX_SPIN_COUNT).is_ok());
        assert!(validate_spin_count(MAX_SPIN_COUNT + 1).is_err());
    }

    #[test]
    fn verify_digest_ignores_block_padding() {
        let input = [0x22u8; 16];
        let mut padded = HashAlgorithm::Sha1.digest(&input);
        padded.extend([0xA5u8; 12]);
        assert!(verify_digest(HashAlgorithm::Sha1, &input, &padded));

        padded[0] ^= 1;
        assert!(!verify_digest(HashAlgorithm::Sha1, &input, &padded));
        assert!(!verify_digest(HashAlgorithm::Sha1, &input, &[0u8; 8]));
    }
}
