#![no_main]

use libfuzzer_sys::fuzz_target;
use offcrypt::encryption_info::EncryptionDescriptor;

fuzz_target!(|data: &[u8]| {
    if let Ok(descriptor) = EncryptionDescriptor::parse(data) {
        let _ = descriptor.to_bytes();
    }
});
