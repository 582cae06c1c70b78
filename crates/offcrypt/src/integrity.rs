//! Agile `dataIntegrity`: an HMAC over the entire `EncryptedPackage` stream (size header
//! included), keyed by a random secret. Both the secret and the HMAC value are stored encrypted
//! under the package key.

use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::{aes_cbc_decrypt, aes_cbc_encrypt_padded, HashAlgorithm};
use crate::encryption_info::{AgileDataIntegrity, AgileKeyData};
use crate::error::{OffcryptError, Result};
use crate::kdf::{derive_iv, HMAC_KEY_BLOCK, HMAC_VALUE_BLOCK};
use crate::util::ct_eq;

pub fn compute_hmac(hash_algorithm: HashAlgorithm, hmac_key: &[u8], stream: &[u8]) -> Result<Vec<u8>> {
    hash_algorithm.hmac(hmac_key, stream)
}

/// Generate a fresh HMAC key and produce the encrypted `dataIntegrity` fields for `stream`.
pub fn seal<R: RngCore + ?Sized>(
    rng: &mut R,
    key_data: &AgileKeyData,
    package_key: &[u8],
    stream: &[u8],
) -> Result<AgileDataIntegrity> {
    let hash = key_data.hash_algorithm;
    let mut hmac_key = Zeroizing::new(vec![0u8; hash.digest_len()]);
    rng.fill_bytes(&mut hmac_key);
    let hmac_value = compute_hmac(hash, &hmac_key, stream)?;

    let key_iv = derive_iv(&key_data.salt, &HMAC_KEY_BLOCK, hash, key_data.block_size);
    let value_iv = derive_iv(&key_data.salt, &HMAC_VALUE_BLOCK, hash, key_data.block_size);
    Ok(AgileDataIntegrity {
        encrypted_hmac_key: aes_cbc_encrypt_padded(package_key, &key_iv, &hmac_key)?,
        encrypted_hmac_value: aes_cbc_encrypt_padded(package_key, &value_iv, &hmac_value)?,
    })
}

/// Check `stream` against the stored HMAC.
pub fn verify(
    key_data: &AgileKeyData,
    integrity: &AgileDataIntegrity,
    package_key: &[u8],
    stream: &[u8],
) -> Result<()> {
    let hash = key_data.hash_algorithm;
    let digest_len = hash.digest_len();

    let key_iv = derive_iv(&key_data.salt, &HMAC_KEY_BLOCK, hash, key_data.block_size);
    let hmac_key = Zeroizing::new(aes_cbc_decrypt(
        package_key,
        &key_iv,
        &integrity.encrypted_hmac_key,
    )?);
    let hmac_key = hmac_key
        .get(..digest_len)
        .ok_or(OffcryptError::descriptor("encryptedHmacKey is shorter than the hash"))?;

    let value_iv = derive_iv(&key_data.salt, &HMAC_VALUE_BLOCK, hash, key_data.block_size);
    let expected = aes_cbc_decrypt(package_key, &value_iv, &integrity.encrypted_hmac_value)?;
    let expected = expected
        .get(..digest_len)
        .ok_or(OffcryptError::descriptor("encryptedHmacValue is shorter than the hash"))?;

    let actual = compute_hmac(hash, hmac_key, stream)?;
    if !ct_eq(&actual, expected) {
        log::debug!("dataIntegrity HMAC mismatch over {} stream bytes", stream.len());
        return Err(OffcryptError::IntegrityCheckFailed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn key_data(hash: HashAlgorithm) -> AgileKeyData {
        AgileKeyData::new(vec![9; 16], 256, hash)
    }

    #[test]
    fn seal_then_verify() {
        for hash in [HashAlgorithm::Sha1, HashAlgorithm::Sha512] {
            let kd = key_data(hash);
            let stream = b"\x05\0\0\0\0\0\0\0ciphertext bytes";
            let sealed = seal(&mut StepRng::new(1, 1), &kd, &[3; 32], stream).unwrap();
            assert_eq!(sealed.encrypted_hmac_value.len(), hash.digest_len().div_ceil(16) * 16);
            verify(&kd, &sealed, &[3; 32], stream).unwrap();
        }
    }

    #[test]
    fn tampering_or_wrong_key_fails() {
        let kd = key_data(HashAlgorithm::Sha256);
        let stream = vec![7u8; 100];
        let sealed = seal(&mut StepRng::new(0, 0), &kd, &[3; 32], &stream).unwrap();

        let mut tampered = stream.clone();
        tampered[99] ^= 1;
        assert_eq!(
            verify(&kd, &sealed, &[3; 32], &tampered),
            Err(OffcryptError::IntegrityCheckFailed)
        );
        assert_eq!(
            verify(&kd, &sealed, &[4; 32], &stream),
            Err(OffcryptError::IntegrityCheckFailed)
        );
    }

    #[test]
    fn hmac_covers_the_size_header() {
        let kd = key_data(HashAlgorithm::Sha1);
        let mut stream = vec![0u8; 40];
        let sealed = seal(&mut StepRng::new(0, 0), &kd, &[3; 16], &stream).unwrap();
        stream[0] = 1;
        assert!(verify(&kd, &sealed, &[3; 16], &stream).is_err());
    }
}
