#![no_main]

use dexopt::utils::{leb128, Parser};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut parser = Parser::new(data);
    while parser.has_more_data() {
        let Ok(value) = parser.read_uleb128() else {
            break;
        };
        let mut out = Vec::new();
        leb128::write_uleb128(&mut out, value);
        assert_eq!(leb128::read_uleb128(&out).map(|(v, _)| v).ok(), Some(value));
    }

    let mut parser = Parser::new(data);
    while parser.has_more_data() {
        if parser.read_sleb128().is_err() {
            break;
        }
    }
});
