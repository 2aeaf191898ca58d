#![no_main]
use libfuzzer_sys::fuzz_target;
use seqbench_dsl::{check_policy, parse_with, BenchmarkPolicy, Dialect, ParseOptions, StepCatalogue};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let catalogue = StepCatalogue::standard();
    for dialect in [Dialect::Solc, Dialect::Marker] {
        let options = ParseOptions::new(dialect, &catalogue);
        if let Ok(sequence) = parse_with(s, &options) {
            let _ = check_policy(&sequence, s, BenchmarkPolicy::default());
            // Canonical notation must parse back to the same tree.
            let canonical = sequence.to_notation(dialect);
            let reparsed = parse_with(&canonical, &options).expect("canonical notation parses");
            assert_eq!(reparsed.to_notation(dialect), canonical);
        }
    }
});
