//! Hot path benchmarks.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! Per-record cost is dominated by JSON encoding and the buffered append;
//! key construction runs once per batch.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::{json, Value};
use target_s3_jsonl::sink::{build_key, encode_line, BatchBuffer, HivePartition, KeyScheme};

fn sample_record(fields: usize) -> Value {
    let mut map = serde_json::Map::new();
    for i in 0..fields {
        map.insert(format!("field_{}", i), json!(format!("value {} ünïcode", i)));
    }
    map.insert("id".to_string(), json!(42));
    map.insert("nested".to_string(), json!({"a": [1, 2, 3], "b": null}));
    Value::Object(map)
}

/// Benchmark encode_line - serialisation of one record to a JSONL line
fn bench_encode_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_line");
    group.throughput(Throughput::Elements(1));

    for fields in [4, 16, 64] {
        let record = sample_record(fields);
        group.bench_function(format!("fields_{}", fields), |b| {
            b.iter(|| encode_line(black_box(&record)))
        });
    }

    group.finish();
}

/// Benchmark build_key for both naming schemes
fn bench_build_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_key");
    group.throughput(Throughput::Elements(1));

    let partitions = vec![
        HivePartition::new("year", "2024"),
        HivePartition::new("month", "05"),
        HivePartition::new("day", "01"),
    ];
    let prefix = KeyScheme::Prefix {
        prefix: "raw/singer".to_string(),
    };
    let template = KeyScheme::Template {
        path_template: "exports/{stream_name}/{batch_id}".to_string(),
        filename_prefix: "{stream_name}-part".to_string(),
    };
    let batch_id = "0b6f3c1e-9b4f-4c55-8c0d-2f1f7c0e8a11";

    group.bench_function("prefix", |b| {
        b.iter(|| build_key(black_box("users"), &partitions, black_box(batch_id), &prefix))
    });
    group.bench_function("template", |b| {
        b.iter(|| build_key(black_box("users"), &partitions, black_box(batch_id), &template))
    });

    group.finish();
}

/// Benchmark BatchBuffer::append - encode plus buffered write
fn bench_buffer_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_append");
    group.throughput(Throughput::Elements(1));

    let dir = tempfile::tempdir().expect("tempdir");
    let record = sample_record(16);

    group.bench_function("fields_16", |b| {
        let mut buffer = BatchBuffer::open(dir.path().join("bench.jsonl")).expect("open buffer");
        b.iter(|| buffer.append(black_box(&record)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_line,
    bench_build_key,
    bench_buffer_append,
);

criterion_main!(benches);
