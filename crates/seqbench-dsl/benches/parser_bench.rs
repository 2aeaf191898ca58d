use criterion::{black_box, criterion_group, criterion_main, Criterion};
use seqbench_dsl::{parse, parse_with, Dialect, ParseOptions, StepCatalogue};

const DEFAULT_SEQUENCE: &str = "dhfoDgvulfnTUtnIf [ xa[r]EscLM cCTUtTOntnfDIl Lcul Vcul [j] Tpeul xa[rul] xa[r]cL gvif CTUca[r]LSsTFOtfDnca[r]Iulc ] jmul[jul] VcTOcul jmul : fDnTOcmu";
const FLAT_SEQUENCE: &str = "dhfoDgvulfnTUtnIfxarEscLMcCTUtTOntnfDIlLculVcul:fDnTOcmu";

fn bench_parse_default(c: &mut Criterion) {
    c.bench_function("parse_default_sequence", |b| {
        b.iter(|| parse(black_box(DEFAULT_SEQUENCE)).unwrap())
    });
}

fn bench_parse_flat(c: &mut Criterion) {
    c.bench_function("parse_flat_sequence", |b| {
        b.iter(|| parse(black_box(FLAT_SEQUENCE)).unwrap())
    });
}

fn bench_parse_marker_dialect(c: &mut Criterion) {
    let catalogue = StepCatalogue::standard();
    let marker = parse(DEFAULT_SEQUENCE)
        .unwrap()
        .to_notation(Dialect::Marker);
    c.bench_function("parse_marker_dialect", |b| {
        b.iter(|| {
            parse_with(
                black_box(&marker),
                &ParseOptions::new(Dialect::Marker, &catalogue),
            )
            .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_parse_default,
    bench_parse_flat,
    bench_parse_marker_dialect
);
criterion_main!(benches);
