#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(calls) = seqbench_ir::parse_call_definitions(s) {
            for call in &calls {
                assert!(!call.signature.is_empty());
                assert!(!call.signature.starts_with('-'));
            }
        }
    }
});
