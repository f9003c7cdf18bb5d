//! Admission hot-path benchmarks.
//!
//! Canonical encoding and HMAC verification run once per telemetry
//! message; topic matching runs once per ACL rule per broker query.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use ares_trust_core::routing::topic_matches;
use ares_trust_core::validation::{canonical_json, sign_payload};

fn payload(readings: usize) -> Value {
    let data: Vec<Value> = (0..readings)
        .map(|i| {
            json!({
                "metric": format!("metric_{}", i),
                "value": 21.5 + i as f64,
                "unit": "°C",
                "avg": 21.4,
                "min": 20.9,
                "max": 22.1,
                "stddev": 0.3,
                "slope": -0.01,
                "count": 60
            })
        })
        .collect();
    json!({
        "cpu_serial": "10000000abcdef01",
        "component_type": "DHT22",
        "instance_name": "greenhouse-left",
        "snapshot_id": "snap-0001",
        "captured_at": "2026-01-01T10:00:00Z",
        "sequence_number": 2026010100010u64,
        "data": data
    })
}

fn bench_canonical(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission/canonical_json");
    for readings in [1usize, 8, 64] {
        let value = payload(readings);
        group.bench_with_input(BenchmarkId::from_parameter(readings), &value, |b, v| {
            b.iter(|| canonical_json(black_box(v)));
        });
    }
    group.finish();
}

fn bench_sign(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission/hmac_sign");
    for readings in [1usize, 8, 64] {
        let value = payload(readings);
        group.bench_with_input(BenchmarkId::from_parameter(readings), &value, |b, v| {
            b.iter(|| sign_payload(black_box("S3cr3t-device-key"), black_box(v)));
        });
    }
    group.finish();
}

fn bench_topic_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission/topic_matches");
    let cases = [
        ("exact", "ares4/D1/telemetry", "ares4/D1/telemetry"),
        ("plus", "ares4/+/telemetry/#", "ares4/D1/telemetry/dht22/left"),
        ("hash_miss", "ares/#", "ares4/D1/telemetry/dht22/left"),
    ];
    for (name, filter, topic) in cases {
        group.bench_function(name, |b| {
            b.iter(|| topic_matches(black_box(filter), black_box(topic)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_canonical, bench_sign, bench_topic_matching);
criterion_main!(benches);
