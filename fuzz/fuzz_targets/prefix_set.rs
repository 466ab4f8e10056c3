#![no_main]

use dexopt::utils::prefix_set::{self, PrefixSetView};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = prefix_set::decode(data);
    let view = PrefixSetView::new(data);
    let _ = view.longest_prefix("Lcom/example/Foo;");
});
