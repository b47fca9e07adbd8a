//! Criterion benchmarks for address parsing and payload resolution.
//!
//! Every unicast send parses its target address, and every broadcast resolves
//! its payload once, so both sit on the hot path of the hub.
//!
//! Run with:
//! ```bash
//! cargo bench --package fanout-core --bench address_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fanout_core::{least_loaded, Address, Payload};

fn bench_address_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("address_parse");
    for raw in [
        "ws:1718000000:3:42",
        "webrtc:1718000002:1001:18446744073709551615",
        "ws:1718000000:3",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(raw), raw, |b, raw| {
            b.iter(|| Address::parse(black_box(raw)))
        });
    }
    group.finish();
}

fn bench_payload_resolve(c: &mut Criterion) {
    let json = serde_json::json!({ "client_id": "ws:1718000000:3:42", "body": "hello" });
    c.bench_function("payload_resolve_json", |b| {
        b.iter(|| Payload::Json(black_box(json.clone())).into_frame())
    });
    c.bench_function("payload_resolve_text", |b| {
        b.iter(|| Payload::from(black_box("hello")).into_frame())
    });
}

fn bench_least_loaded(c: &mut Criterion) {
    let loads: Vec<usize> = (0..200).map(|i| 5_000 - (i % 17)).collect();
    c.bench_function("least_loaded_200_shards", |b| {
        b.iter(|| least_loaded(black_box(&loads).iter().copied()))
    });
}

criterion_group!(
    benches,
    bench_address_parse,
    bench_payload_resolve,
    bench_least_loaded
);
criterion_main!(benches);
