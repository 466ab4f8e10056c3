#![no_main]

use dexopt::utils::mutf8;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(units) = mutf8::decode_utf16(data) {
        let encoded = mutf8::encode_utf16(&units);
        assert_eq!(mutf8::decode_utf16(&encoded).ok(), Some(units));
    }
    if let Ok(text) = std::str::from_utf8(data) {
        let encoded = mutf8::encode(text);
        assert_eq!(mutf8::decode(&encoded).ok().as_deref(), Some(text));
    }
});
