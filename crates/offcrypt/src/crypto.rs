//! Hash, HMAC and raw AES block-mode primitives shared by both schemes.

use std::fmt;

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha384, Sha512};

use crate::error::{OffcryptError, Result};

pub const AES_BLOCK_SIZE: usize = 16;

/// Hash algorithms accepted in Agile descriptors. Standard encryption is always SHA-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Parse a hash algorithm name as used in the Agile XML descriptor.
    ///
    /// Names are case-insensitive and tolerate `SHA-256`/`SHA_256` spellings.
    pub fn parse_offcrypto_name(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_uppercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(OffcryptError::descriptor("unsupported hashAlgorithm")),
        }
    }

    /// The spelling written into descriptors.
    pub fn as_offcrypto_name(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }

    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// Hash the concatenation of `parts` without materializing it.
    pub fn digest_parts(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: sha2::Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut h = D::new();
            for part in parts {
                h.update(part);
            }
            h.finalize().to_vec()
        }

        match self {
            Self::Sha1 => run::<Sha1>(parts),
            Self::Sha256 => run::<Sha256>(parts),
            Self::Sha384 => run::<Sha384>(parts),
            Self::Sha512 => run::<Sha512>(parts),
        }
    }

    /// Hash `data` into `out`, which must be exactly [`Self::digest_len`] bytes.
    ///
    /// Used by the spin loop, which must not allocate per round.
    pub(crate) fn digest_into(self, data: &[u8], out: &mut [u8]) {
        match self {
            Self::Sha1 => out.copy_from_slice(&Sha1::digest(data)),
            Self::Sha256 => out.copy_from_slice(&Sha256::digest(data)),
            Self::Sha384 => out.copy_from_slice(&Sha384::digest(data)),
            Self::Sha512 => out.copy_from_slice(&Sha512::digest(data)),
        }
    }

    pub fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        fn run<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
            let mut mac = <M as KeyInit>::new_from_slice(key)
                .map_err(|_| OffcryptError::descriptor("invalid HMAC key"))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }

        match self {
            Self::Sha1 => run::<Hmac<Sha1>>(key, data),
            Self::Sha256 => run::<Hmac<Sha256>>(key, data),
            Self::Sha384 => run::<Hmac<Sha384>>(key, data),
            Self::Sha512 => run::<Hmac<Sha512>>(key, data),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_offcrypto_name())
    }
}

fn invalid_key_length() -> OffcryptError {
    OffcryptError::descriptor("AES key must be 16, 24 or 32 bytes")
}

fn check_aligned(buf: &[u8]) -> Result<()> {
    if buf.len() % AES_BLOCK_SIZE != 0 {
        return Err(OffcryptError::descriptor(
            "ciphertext length is not a multiple of the AES block size",
        ));
    }
    Ok(())
}

fn ecb_with<C>(key: &[u8], buf: &mut [u8], encrypt: bool) -> Result<()>
where
    C: BlockEncrypt + BlockDecrypt + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| invalid_key_length())?;
    for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
        let block = GenericArray::from_mut_slice(block);
        if encrypt {
            cipher.encrypt_block(block);
        } else {
            cipher.decrypt_block(block);
        }
    }
    Ok(())
}

fn aes_ecb_in_place(key: &[u8], buf: &mut [u8], encrypt: bool) -> Result<()> {
    check_aligned(buf)?;
    match key.len() {
        16 => ecb_with::<Aes128>(key, buf, encrypt),
        24 => ecb_with::<Aes192>(key, buf, encrypt),
        32 => ecb_with::<Aes256>(key, buf, encrypt),
        _ => Err(invalid_key_length()),
    }
}

pub(crate) fn aes_ecb_encrypt_in_place(key: &[u8], buf: &mut [u8]) -> Result<()> {
    aes_ecb_in_place(key, buf, true)
}

pub(crate) fn aes_ecb_decrypt_in_place(key: &[u8], buf: &mut [u8]) -> Result<()> {
    aes_ecb_in_place(key, buf, false)
}

fn check_iv(iv: &[u8]) -> Result<()> {
    if iv.len() != AES_BLOCK_SIZE {
        return Err(OffcryptError::descriptor("AES-CBC IV must be 16 bytes"));
    }
    Ok(())
}

/// AES-CBC encryption without padding; `buf` must already be block aligned.
pub(crate) fn aes_cbc_encrypt_in_place(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    check_iv(iv)?;
    check_aligned(buf)?;
    if buf.is_empty() {
        return Ok(());
    }
    let len = buf.len();
    let res = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| invalid_key_length())?
            .encrypt_padded_mut::<NoPadding>(buf, len)
            .map(|_| ()),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| invalid_key_length())?
            .encrypt_padded_mut::<NoPadding>(buf, len)
            .map(|_| ()),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| invalid_key_length())?
            .encrypt_padded_mut::<NoPadding>(buf, len)
            .map(|_| ()),
        _ => return Err(invalid_key_length()),
    };
    res.map_err(|_| OffcryptError::descriptor("AES-CBC plaintext is not block aligned"))
}

/// AES-CBC decryption without padding removal.
///
/// Callers truncate the plaintext to the semantic length stored elsewhere in the format.
pub(crate) fn aes_cbc_decrypt_in_place(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    check_iv(iv)?;
    check_aligned(buf)?;
    if buf.is_empty() {
        return Ok(());
    }
    let res = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| invalid_key_length())?
            .decrypt_padded_mut::<NoPadding>(buf)
            .map(|_| ()),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| invalid_key_length())?
            .decrypt_padded_mut::<NoPadding>(buf)
            .map(|_| ()),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| invalid_key_length())?
            .decrypt_padded_mut::<NoPadding>(buf)
            .map(|_| ()),
        _ => return Err(invalid_key_length()),
    };
    res.map_err(|_| OffcryptError::descriptor("AES-CBC ciphertext is not block aligned"))
}

pub(crate) fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut out = ciphertext.to_vec();
    aes_cbc_decrypt_in_place(key, iv, &mut out)?;
    Ok(out)
}

/// Zero-pad `plaintext` to the AES block size and CBC-encrypt it.
pub(crate) fn aes_cbc_encrypt_padded(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut out = plaintext.to_vec();
    zero_pad_to_block(&mut out);
    aes_cbc_encrypt_in_place(key, iv, &mut out)?;
    Ok(out)
}

pub(crate) fn zero_pad_to_block(buf: &mut Vec<u8>) {
    let rem = buf.len() % AES_BLOCK_SIZE;
    if rem != 0 {
        buf.resize(buf.len() + (AES_BLOCK_SIZE - rem), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s).expect("valid hex")
    }

    #[test]
    fn parses_hash_names_leniently() {
        assert_eq!(HashAlgorithm::parse_offcrypto_name("SHA1").unwrap(), HashAlgorithm::Sha1);
        assert_eq!(HashAlgorithm::parse_offcrypto_name("sha-256").unwrap(), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::parse_offcrypto_name(" SHA_384 ").unwrap(), HashAlgorithm::Sha384);
        assert_eq!(HashAlgorithm::parse_offcrypto_name("Sha512").unwrap(), HashAlgorithm::Sha512);
        assert!(HashAlgorithm::parse_offcrypto_name("MD5").is_err());
    }

    #[test]
    fn digest_parts_matches_concatenation() {
        for alg in [
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            let joined = alg.digest(b"hello world");
            assert_eq!(alg.digest_parts(&[b"hello", b" ", b"world"]), joined);
            assert_eq!(joined.len(), alg.digest_len());

            let mut out = vec![0u8; alg.digest_len()];
            alg.digest_into(b"hello world", &mut out);
            assert_eq!(out, joined);
        }
    }

    #[test]
    fn sha1_known_answer() {
        assert_eq!(
            HashAlgorithm::Sha1.digest(b"abc"),
            unhex("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
    }

    #[test]
    fn hmac_sha256_rfc4231_case_2() {
        let mac = HashAlgorithm::Sha256
            .hmac(b"Jefe", b"what do ya want for nothing?")
            .unwrap();
        assert_eq!(
            mac,
            unhex("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );
    }

    #[test]
    fn aes128_cbc_nist_sp800_38a_vector() {
        // NIST SP 800-38A F.2.1/F.2.2 (first block).
        let key = unhex("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = unhex("000102030405060708090a0b0c0d0e0f");
        let plaintext = unhex("6bc1bee22e409f96e93d7e117393172a");
        let ciphertext = unhex("7649abac8119b246cee98e9b12e9197d");

        let mut buf = plaintext.clone();
        aes_cbc_encrypt_in_place(&key, &iv, &mut buf).unwrap();
        assert_eq!(buf, ciphertext);
        aes_cbc_decrypt_in_place(&key, &iv, &mut buf).unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn aes128_ecb_nist_sp800_38a_vector() {
        // NIST SP 800-38A F.1.1 (first block).
        let key = unhex("2b7e151628aed2a6abf7158809cf4f3c");
        let mut buf = unhex("6bc1bee22e409f96e93d7e117393172a");
        aes_ecb_encrypt_in_place(&key, &mut buf).unwrap();
        assert_eq!(buf, unhex("3ad77bb40d7a3660a89ecaf32466ef97"));
        aes_ecb_decrypt_in_place(&key, &mut buf).unwrap();
        assert_eq!(buf, unhex("6bc1bee22e409f96e93d7e117393172a"));
    }

    #[test]
    fn rejects_bad_key_iv_and_alignment() {
        let mut buf = [0u8; 16];
        assert!(aes_ecb_encrypt_in_place(&[0u8; 15], &mut buf).is_err());
        assert!(aes_cbc_decrypt_in_place(&[0u8; 16], &[0u8; 8], &mut buf).is_err());
        let mut unaligned = [0u8; 17];
        assert!(aes_cbc_decrypt_in_place(&[0u8; 16], &[0u8; 16], &mut unaligned).is_err());
    }

    #[test]
    fn padded_encrypt_zero_pads_to_block() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let ct = aes_cbc_encrypt_padded(&key, &iv, b"twenty bytes of data").unwrap();
        assert_eq!(ct.len(), 32);
        let pt = aes_cbc_decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(&pt[..20], b"twenty bytes of data");
        assert!(pt[20..].iter().all(|b| *b == 0));
    }
}
