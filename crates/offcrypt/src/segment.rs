//! `EncryptedPackage` framing and the package cipher.
//!
//! The stream is an 8-byte little-endian plaintext size followed by ciphertext. Agile encrypts
//! each 4096-byte segment independently with AES-CBC and a per-segment IV; Standard runs AES-ECB
//! over the whole payload. Plaintext is zero padded to the AES block size before encryption.

use std::fmt;

use zeroize::Zeroizing;

use crate::crypto::{
    aes_cbc_decrypt_in_place, aes_cbc_encrypt_in_place, aes_ecb_decrypt_in_place,
    aes_ecb_encrypt_in_place, zero_pad_to_block, HashAlgorithm, AES_BLOCK_SIZE,
};
use crate::encryption_info::EncryptionDescriptor;
use crate::error::{OffcryptError, Result};
use crate::kdf::segment_iv;
use crate::util::align_up;

pub const SEGMENT_LEN: usize = 4096;
pub const SIZE_HEADER_LEN: usize = 8;

enum Mode {
    Ecb,
    Cbc {
        salt: Vec<u8>,
        hash_algorithm: HashAlgorithm,
        block_size: usize,
    },
}

pub struct SegmentCipher {
    key: Zeroizing<Vec<u8>>,
    mode: Mode,
}

impl fmt::Debug for SegmentCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Ecb => "AES-ECB",
            Mode::Cbc { .. } => "AES-CBC",
        };
        f.debug_struct("SegmentCipher")
            .field("mode", &mode)
            .field("key_bits", &(self.key.len() * 8))
            .finish_non_exhaustive()
    }
}

impl SegmentCipher {
    /// Standard encryption: AES-ECB under the derived key.
    pub fn standard(key: &[u8]) -> Self {
        Self {
            key: Zeroizing::new(key.to_vec()),
            mode: Mode::Ecb,
        }
    }

    /// Agile encryption: AES-CBC per segment, IV = `Hash(salt || LE32(index))`.
    pub fn agile(key: &[u8], salt: &[u8], hash_algorithm: HashAlgorithm, block_size: usize) -> Self {
        Self {
            key: Zeroizing::new(key.to_vec()),
            mode: Mode::Cbc {
                salt: salt.to_vec(),
                hash_algorithm,
                block_size,
            },
        }
    }

    pub fn for_descriptor(descriptor: &EncryptionDescriptor, package_key: &[u8]) -> Self {
        match descriptor {
            EncryptionDescriptor::Standard(_) => Self::standard(package_key),
            EncryptionDescriptor::Agile(info) => Self::agile(
                package_key,
                &info.key_data.salt,
                info.key_data.hash_algorithm,
                info.key_data.block_size,
            ),
        }
    }

    /// IV for segment `index`, or `None` for the ECB (Standard) cipher.
    pub fn segment_iv(&self, index: u32) -> Option<Vec<u8>> {
        match &self.mode {
            Mode::Ecb => None,
            Mode::Cbc {
                salt,
                hash_algorithm,
                block_size,
            } => Some(segment_iv(salt, index, *hash_algorithm, *block_size)),
        }
    }

    fn encrypt_segment_in_place(&self, index: usize, buf: &mut [u8]) -> Result<()> {
        match self.segment_iv(segment_index(index)?) {
            None => aes_ecb_encrypt_in_place(&self.key, buf),
            Some(iv) => aes_cbc_encrypt_in_place(&self.key, &iv, buf),
        }
    }

    fn decrypt_segment_in_place(&self, index: usize, buf: &mut [u8]) -> Result<()> {
        match self.segment_iv(segment_index(index)?) {
            None => aes_ecb_decrypt_in_place(&self.key, buf),
            Some(iv) => aes_cbc_decrypt_in_place(&self.key, &iv, buf),
        }
    }

    /// Encrypt `plaintext` into complete `EncryptedPackage` stream bytes.
    pub fn encrypt_package(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let size = plaintext.len() as u64;
        if size > u64::from(u32::MAX) {
            return Err(OffcryptError::OversizedInput { size });
        }

        let mut out = Vec::with_capacity(SIZE_HEADER_LEN + align_up(plaintext.len(), AES_BLOCK_SIZE));
        out.extend_from_slice(&size.to_le_bytes());
        for (index, chunk) in plaintext.chunks(SEGMENT_LEN).enumerate() {
            let mut buf = chunk.to_vec();
            zero_pad_to_block(&mut buf);
            self.encrypt_segment_in_place(index, &mut buf)?;
            out.extend_from_slice(&buf);
        }
        log::debug!(
            "encrypted {size} package bytes in {} segments",
            plaintext.len().div_ceil(SEGMENT_LEN)
        );
        Ok(out)
    }

    /// Decrypt a complete `EncryptedPackage` stream.
    pub fn decrypt_package(&self, stream: &[u8]) -> Result<Vec<u8>> {
        let (size, ciphertext) = split_package(stream)?;
        let mut out = ciphertext.to_vec();
        for (index, chunk) in out.chunks_mut(SEGMENT_LEN).enumerate() {
            self.decrypt_segment_in_place(index, chunk)?;
        }
        out.truncate(size);
        log::debug!(
            "decrypted {size} package bytes from {} segments",
            ciphertext.len().div_ceil(SEGMENT_LEN)
        );
        Ok(out)
    }

    /// Decrypt segment `index` of an `EncryptedPackage` stream on its own.
    ///
    /// The result equals the matching slice of [`Self::decrypt_package`]'s output.
    pub fn decrypt_segment(&self, stream: &[u8], index: usize) -> Result<Vec<u8>> {
        let (size, ciphertext) = split_package(stream)?;
        let start = index
            .checked_mul(SEGMENT_LEN)
            .filter(|start| *start < ciphertext.len())
            .ok_or_else(|| {
                OffcryptError::InvalidOptions(format!("segment index {index} is out of range"))
            })?;
        let end = (start + SEGMENT_LEN).min(ciphertext.len());
        let mut out = ciphertext[start..end].to_vec();
        self.decrypt_segment_in_place(index, &mut out)?;
        out.truncate(size - start);
        Ok(out)
    }
}

fn segment_index(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| OffcryptError::OversizedInput {
        size: index as u64,
    })
}

/// Validate the size header and return the plaintext size with the block-aligned ciphertext that
/// covers it. Bytes past that point are ignored.
pub(crate) fn split_package(stream: &[u8]) -> Result<(usize, &[u8])> {
    let (header, ciphertext) = stream
        .split_first_chunk::<SIZE_HEADER_LEN>()
        .ok_or(OffcryptError::malformed(
            "EncryptedPackage is shorter than its size header",
        ))?;
    let size = u64::from_le_bytes(*header);
    if size > u64::from(u32::MAX) {
        return Err(OffcryptError::OversizedInput { size });
    }
    let size = size as usize;
    let needed = align_up(size, AES_BLOCK_SIZE);
    let ciphertext = ciphertext.get(..needed).ok_or(OffcryptError::malformed(
        "EncryptedPackage declares more bytes than it holds",
    ))?;
    if stream.len() - SIZE_HEADER_LEN > needed {
        log::trace!(
            "ignoring {} bytes past the declared EncryptedPackage size",
            stream.len() - SIZE_HEADER_LEN - needed
        );
    }
    Ok((size, ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aes_cbc_encrypt_padded;

    fn agile_cipher() -> SegmentCipher {
        SegmentCipher::agile(&[0x42; 32], &[0x17; 16], HashAlgorithm::Sha512, 16)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    #[test]
    fn roundtrip_boundary_sizes() {
        for cipher in [agile_cipher(), SegmentCipher::standard(&[0x24; 16])] {
            for len in [0, 1, 15, 16, 17, 4095, 4096, 4097, 8192, 10_000] {
                let plaintext = sample(len);
                let stream = cipher.encrypt_package(&plaintext).unwrap();
                assert_eq!(&stream[..8], &(len as u64).to_le_bytes());
                assert_eq!(stream.len(), 8 + align_up(len, 16), "len={len}");
                assert_eq!(cipher.decrypt_package(&stream).unwrap(), plaintext, "len={len}");
            }
        }
    }

    #[test]
    fn agile_segments_use_index_derived_ivs() {
        let cipher = agile_cipher();
        let plaintext = sample(5000);
        let stream = cipher.encrypt_package(&plaintext).unwrap();

        let iv1 = cipher.segment_iv(1).unwrap();
        let expected_iv1 = HashAlgorithm::Sha512.digest_parts(&[&[0x17; 16], &1u32.to_le_bytes()]);
        assert_eq!(iv1, &expected_iv1[..16]);

        let second = aes_cbc_encrypt_padded(&[0x42; 32], &iv1, &plaintext[4096..]).unwrap();
        assert_eq!(&stream[8 + 4096..], second.as_slice());
    }

    #[test]
    fn standard_is_plain_ecb() {
        let cipher = SegmentCipher::standard(&[0x24; 16]);
        assert!(cipher.segment_iv(0).is_none());
        let stream = cipher.encrypt_package(&[0xAA; 32]).unwrap();
        // Identical plaintext blocks encrypt identically under ECB.
        assert_eq!(stream[8..24], stream[24..40]);
    }

    #[test]
    fn single_segment_matches_full_decrypt() {
        for cipher in [agile_cipher(), SegmentCipher::standard(&[0x24; 32])] {
            let plaintext = sample(3 * SEGMENT_LEN + 123);
            let stream = cipher.encrypt_package(&plaintext).unwrap();
            let full = cipher.decrypt_package(&stream).unwrap();
            for index in 0..4 {
                let start = index * SEGMENT_LEN;
                let end = (start + SEGMENT_LEN).min(full.len());
                assert_eq!(cipher.decrypt_segment(&stream, index).unwrap(), &full[start..end]);
            }
            assert!(matches!(
                cipher.decrypt_segment(&stream, 4),
                Err(OffcryptError::InvalidOptions(_))
            ));
        }
    }

    #[test]
    fn framing_errors() {
        let cipher = agile_cipher();
        assert_eq!(
            cipher.decrypt_package(&[0u8; 7]),
            Err(OffcryptError::malformed(
                "EncryptedPackage is shorter than its size header"
            ))
        );

        let mut stream = cipher.encrypt_package(&sample(100)).unwrap();
        stream[..8].copy_from_slice(&200u64.to_le_bytes());
        assert!(matches!(
            cipher.decrypt_package(&stream),
            Err(OffcryptError::MalformedContainer { .. })
        ));

        stream[..8].copy_from_slice(&(u64::from(u32::MAX) + 1).to_le_bytes());
        assert_eq!(
            cipher.decrypt_package(&stream),
            Err(OffcryptError::OversizedInput {
                size: u64::from(u32::MAX) + 1
            })
        );
    }

    #[test]
    fn trailing_ciphertext_is_ignored() {
        let cipher = agile_cipher();
        let plaintext = sample(100);
        let mut stream = cipher.encrypt_package(&plaintext).unwrap();
        stream.extend_from_slice(&[0u8; 48]);
        assert_eq!(cipher.decrypt_package(&stream).unwrap(), plaintext);
    }
}
