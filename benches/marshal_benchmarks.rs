//! 编解码与信封分帧性能基准测试
//!
//! 测试典型编辑器消息的负载编解码，以及信封写入/读取字节流的开销

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use game_engine_bridge::protocol::messages::{Brush, CreateObject, ObjectSettings, RecordType};
use game_engine_bridge::protocol::{Envelope, Marshaller};
use game_engine_bridge::transport::{read_envelope, write_envelope};
use glam::Vec3;
use std::hint::black_box;

fn create_object() -> CreateObject {
    CreateObject {
        template: "units/hele_infantry_spearman_b".to_string(),
        settings: ObjectSettings {
            player: 1,
            selections: vec!["winter".to_string(), "banner".to_string()],
            variant_groups: Vec::new(),
        },
        pos: Vec3::new(120.0, 4.5, 98.25),
        use_target: true,
        target: Vec3::new(130.0, 4.5, 100.0),
        angle: 0.0,
    }
}

fn brush(size: i32) -> Brush {
    Brush {
        width: size,
        height: size,
        data: (0..size * size).map(|i| (i % 7) as f32 / 7.0).collect(),
    }
}

fn bench_record_marshal(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_marshal");
    let marshaller = Marshaller::default();
    let schema = CreateObject::schema();
    let record = create_object().to_record();
    let bytes = marshaller.encode(&record, &schema).unwrap();

    group.bench_function("encode_create_object", |b| {
        b.iter(|| black_box(marshaller.encode(black_box(&record), &schema).unwrap()));
    });

    group.bench_function("decode_create_object", |b| {
        b.iter(|| black_box(marshaller.decode(black_box(&bytes), &schema).unwrap()));
    });

    group.finish();
}

fn bench_brush_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("brush_marshal");
    let marshaller = Marshaller::default();
    let schema = Brush::schema();

    for size in [4, 16, 64] {
        let record = brush(size).to_record();
        let bytes = marshaller.encode(&record, &schema).unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &record, |b, record| {
            b.iter(|| black_box(marshaller.encode(record, &schema).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
            b.iter(|| black_box(marshaller.decode(bytes, &schema).unwrap()));
        });
    }

    group.finish();
}

fn bench_envelope_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_framing");
    let marshaller = Marshaller::default();
    let max = marshaller.max_payload();
    let payload = marshaller
        .encode(&create_object().to_record(), &CreateObject::schema())
        .unwrap();
    let command = Envelope::command(50, payload.clone());
    let query = Envelope::query(32, 17, payload);

    group.bench_function("write_command", |b| {
        let mut wire = Vec::with_capacity(command.encoded_len());
        b.iter(|| {
            wire.clear();
            write_envelope(&mut wire, black_box(&command), max).unwrap();
            black_box(wire.len())
        });
    });

    let mut wire = Vec::new();
    write_envelope(&mut wire, &query, max).unwrap();
    group.bench_function("read_query", |b| {
        b.iter(|| black_box(read_envelope(&mut black_box(wire.as_slice()), max).unwrap()));
    });

    group.bench_function("to_from_bytes", |b| {
        b.iter(|| {
            let bytes = black_box(&query).to_bytes();
            black_box(Envelope::from_bytes(&bytes, max).unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_record_marshal,
    bench_brush_sizes,
    bench_envelope_framing
);
criterion_main!(benches);
