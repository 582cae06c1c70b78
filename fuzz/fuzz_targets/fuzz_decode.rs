#![no_main]

use libfuzzer_sys::fuzz_target;
use offcrypt::{decode, DecodeOptions, Password};

/// Document bytes after a one-byte selector for the key material.
fuzz_target!(|data: &[u8]| {
    let Some((&selector, bytes)) = data.split_first() else {
        return;
    };
    let password = Password::new("password");
    let secret = [selector; 16];
    let _ = if selector & 1 == 0 {
        decode(bytes, Some(&password), None, &DecodeOptions::default())
    } else {
        decode(bytes, None, Some(&secret), &DecodeOptions::default())
    };
});
