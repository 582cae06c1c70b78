//! Mutated and truncated containers must fail cleanly, never panic.

use rand::rngs::mock::StepRng;

use offcrypt::{
    decode, encrypt_package_with_rng, inspect, DecodeOptions, DecodeOutcome, EncodeOptions,
    OffcryptError, Password,
};

/// Deterministic linear congruential generator, enough to spread mutations.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn seed_containers(password: &Password) -> Vec<Vec<u8>> {
    let plaintext: Vec<u8> = (0..6000u32).map(|i| (i % 251) as u8).collect();
    let agile = EncodeOptions {
        spin_count: 10,
        ..EncodeOptions::default()
    };
    [agile, EncodeOptions::standard()]
        .iter()
        .map(|options| {
            encrypt_package_with_rng(
                &mut StepRng::new(7, 11),
                &plaintext,
                Some(password),
                None,
                options,
            )
            .unwrap()
            .container
        })
        .collect()
}

#[test]
fn byte_mutations_never_panic() {
    let password = Password::new("robust");
    let mut lcg = Lcg(0x5EED);

    for seed in seed_containers(&password) {
        for _ in 0..200 {
            let mut bytes = seed.clone();
            for _ in 0..=lcg.below(4) {
                let at = lcg.below(bytes.len());
                bytes[at] ^= 1 << lcg.below(8);
            }
            // Any outcome is acceptable; reaching the end of the call is the assertion.
            let _ = decode(&bytes, Some(&password), None, &DecodeOptions::default());
            let _ = inspect(&bytes);
        }
    }
}

#[test]
fn header_mutations_are_errors_not_successes() {
    let password = Password::new("robust");
    let mut lcg = Lcg(42);

    for seed in seed_containers(&password) {
        for _ in 0..100 {
            let mut bytes = seed.clone();
            // Corrupt one of the sector-size/version fields in the CFB header.
            let at = 0x1A + lcg.below(6);
            bytes[at] = bytes[at].wrapping_add(1 + lcg.below(200) as u8);
            let res = decode(&bytes, Some(&password), None, &DecodeOptions::default());
            assert!(
                matches!(res, Err(OffcryptError::MalformedContainer { .. })),
                "offset {at:#x}: {res:?}"
            );
        }
    }
}

#[test]
fn truncations_never_decrypt() {
    let password = Password::new("robust");
    let mut lcg = Lcg(7);

    for seed in seed_containers(&password) {
        for _ in 0..100 {
            // The final sector carries padding past the end of the package.
            let len = lcg.below(seed.len() - 512);
            let res = decode(&seed[..len], Some(&password), None, &DecodeOptions::default());
            assert!(
                !matches!(res, Ok(DecodeOutcome::Decrypted(_))),
                "truncated to {len} bytes still decrypted"
            );
        }
    }
}
