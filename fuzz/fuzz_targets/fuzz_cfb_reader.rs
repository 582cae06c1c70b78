#![no_main]

use libfuzzer_sys::fuzz_target;
use offcrypt::cfb::CfbReader;

fuzz_target!(|data: &[u8]| {
    let Ok(reader) = CfbReader::open(data) else {
        return;
    };
    let names: Vec<String> = reader.entries().map(|e| e.name.clone()).collect();
    for name in names {
        let _ = reader.read_stream(&name);
    }
});
