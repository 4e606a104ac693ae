#![no_main]

use chaintrace::format::{decode_binary, decode_text};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Neither decoder may panic on arbitrary trace files
    let _ = decode_binary(data);
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = decode_text(input);
    }
});
