#![allow(unexpected_cfgs)]

use proptest::prelude::*;

use crate::cfb::CfbReader;
use crate::encryption_info::EncryptionDescriptor;
use crate::format::CFB_SIGNATURE;
use crate::segment::SegmentCipher;
use crate::{decode, DecodeOptions, OffcryptError, Password};

// Keep CI runtime bounded. Heavier fuzzing can be enabled by building with
// `RUSTFLAGS="--cfg fuzzing"`.
#[cfg(fuzzing)]
const CASES: u32 = 1024;
#[cfg(not(fuzzing))]
const CASES: u32 = 64;

#[cfg(fuzzing)]
const MAX_INPUT_LEN: usize = 256 * 1024;
#[cfg(not(fuzzing))]
const MAX_INPUT_LEN: usize = 16 * 1024;

fn agile_prefix() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&0x40u32.to_le_bytes());
    bytes
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: CASES,
        max_shrink_iters: 0,
        .. ProptestConfig::default()
    })]

    #[test]
    fn cfb_reader_is_panic_free(tail in proptest::collection::vec(any::<u8>(), 0..=MAX_INPUT_LEN)) {
        let mut bytes = CFB_SIGNATURE.to_vec();
        bytes.extend_from_slice(&tail);

        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            CfbReader::open(&bytes).and_then(|r| r.read_stream("EncryptionInfo"))
        }));
        prop_assert!(res.is_ok(), "CfbReader panicked");
    }

    #[test]
    fn descriptor_parser_is_panic_free(bytes in proptest::collection::vec(any::<u8>(), 0..=MAX_INPUT_LEN)) {
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            EncryptionDescriptor::parse(&bytes)
        }));
        prop_assert!(res.is_ok(), "EncryptionDescriptor::parse panicked");
    }

    #[test]
    fn agile_parser_rejects_non_utf8_xml(tail in proptest::collection::vec(any::<u8>(), 0..=MAX_INPUT_LEN)) {
        // `<` followed by 0xFF is never valid UTF-8, so the result is always an error.
        let mut bytes = agile_prefix();
        bytes.push(b'<');
        bytes.push(0xFF);
        bytes.extend_from_slice(&tail);

        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            EncryptionDescriptor::parse(&bytes)
        }));
        prop_assert!(res.is_ok(), "EncryptionDescriptor::parse panicked");
        let is_invalid_descriptor =
            matches!(res.unwrap(), Err(OffcryptError::InvalidDescriptor { .. }));
        prop_assert!(is_invalid_descriptor);
    }

    #[test]
    fn package_decrypt_is_panic_free(
        declared_len in any::<u64>(),
        ciphertext in proptest::collection::vec(any::<u8>(), 0..=MAX_INPUT_LEN),
    ) {
        let mut stream = declared_len.to_le_bytes().to_vec();
        stream.extend_from_slice(&ciphertext);

        let cipher = SegmentCipher::agile(&[1; 16], &[2; 16], crate::HashAlgorithm::Sha1, 16);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cipher.decrypt_package(&stream)
        }));
        prop_assert!(res.is_ok(), "decrypt_package panicked");
    }

    #[test]
    fn decode_is_panic_free(tail in proptest::collection::vec(any::<u8>(), 0..=MAX_INPUT_LEN)) {
        let mut bytes = CFB_SIGNATURE.to_vec();
        bytes.extend_from_slice(&tail);
        let password = Password::new("password");

        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            decode(&bytes, Some(&password), None, &DecodeOptions::default())
        }));
        prop_assert!(res.is_ok(), "decode panicked");
        prop_assert!(res.unwrap().is_err(), "random bytes should not decode");
    }
}
