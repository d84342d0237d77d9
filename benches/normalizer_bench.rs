//! Performance benchmarks for reader event normalization.
//!
//! Normalization runs on the kernel's callback thread for every event the
//! reader delivers, including the suppressed noise that arrives while a scan
//! is waiting for a card. These benchmarks keep an eye on that path.
//!
//! # Run Benchmarks
//!
//! ```sh
//! # Run all normalizer benchmarks
//! cargo bench --bench normalizer_bench
//!
//! # Run a specific benchmark group
//! cargo bench --bench normalizer_bench -- normalize_event
//!
//! # Compare against a saved baseline
//! cargo bench --bench normalizer_bench -- --save-baseline main
//! cargo bench --bench normalizer_bench -- --baseline main
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tapbridge_core::scan::ScanRequest;
use tapbridge_core::{ResultNormalizer, SuppressionPolicy};
use tapbridge_hardware::event::{Diagnostics, KEY_CODE, KEY_MESSAGE, KEY_UUID};
use tapbridge_hardware::{CheckCardCallback, HardwareEvent};

fn bundle(pairs: &[(&str, &str)]) -> Diagnostics {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Benchmark normalization of each event shape the reader produces.
fn bench_normalize_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_event");
    group.throughput(Throughput::Elements(1));

    let normalizer = ResultNormalizer::new(SuppressionPolicy::RepeatedCall);

    let cases = vec![
        ("card_found", HardwareEvent::card_found("04AABBCC")),
        (
            "suppressed",
            HardwareEvent::ErrorWithDiagnostics(Some(bundle(&[
                (KEY_CODE, "-20001"),
                (KEY_MESSAGE, "Repeated call"),
            ]))),
        ),
        (
            "non_payment",
            HardwareEvent::ErrorWithDiagnostics(Some(bundle(&[(KEY_CODE, "-2549")]))),
        ),
        (
            "recovered_identifier",
            HardwareEvent::ErrorWithDiagnostics(Some(bundle(&[
                (KEY_CODE, "-4000"),
                (KEY_UUID, "08C0FFEE"),
            ]))),
        ),
        (
            "failure",
            HardwareEvent::ErrorWithDiagnostics(Some(bundle(&[
                (KEY_CODE, "-4000"),
                (KEY_MESSAGE, "card removed"),
            ]))),
        ),
        ("legacy", HardwareEvent::IcCardFound {
            atr: "3B8F8001804F0CA000000306030001000000006A".to_string(),
        }),
    ];

    for (name, event) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &event, |b, event| {
            b.iter(|| black_box(normalizer.normalize(black_box(event))));
        });
    }

    group.finish();
}

/// Benchmark a scan that sees a burst of suppressed noise before the tap.
fn bench_noisy_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("noisy_scan");
    let normalizer = ResultNormalizer::new(SuppressionPolicy::RepeatedCall);

    for noise in [0usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*noise as u64 + 1));

        group.bench_with_input(BenchmarkId::from_parameter(noise), noise, |b, &noise| {
            b.iter(|| {
                let (request, mut pending) = ScanRequest::new(1, normalizer);
                for _ in 0..noise {
                    request.on_event(HardwareEvent::error_code(-20001));
                }
                request.on_event(HardwareEvent::card_found("04AABBCC"));
                black_box(pending.try_result())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize_event, bench_noisy_scan);
criterion_main!(benches);
