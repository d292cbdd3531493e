//! Codec benchmarks for parlor-protocol.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parlor_protocol::{codec, ChatMessage, MessageKind, ServerEvent};

fn chat_event(size: usize) -> ServerEvent {
    ServerEvent::ChatMessage(ChatMessage {
        sender_username: "alice".into(),
        sender_connection_id: "3f1c9a6e-7d1b-4c55-9d0e-3f2a1b6c7d8e".into(),
        timestamp: Utc::now(),
        kind: MessageKind::Text,
        payload: serde_json::Value::String("x".repeat(size)),
    })
}

fn bench_encode_json(c: &mut Criterion) {
    let event = chat_event(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("json_64B", |b| b.iter(|| codec::encode_json(black_box(&event))));
    group.bench_function("msgpack_64B", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_decode_msgpack(c: &mut Criterion) {
    let encoded = codec::encode(&chat_event(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::decode::<ServerEvent>(black_box(&encoded)))
    });
    group.finish();
}

fn bench_image_payload(c: &mut Criterion) {
    // Roughly a small inline thumbnail.
    let event = chat_event(256 * 1024);

    c.bench_function("json_encode_256KiB", |b| {
        b.iter(|| codec::encode_json(black_box(&event)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_encode_json,
    bench_decode_msgpack,
    bench_image_payload
);
criterion_main!(benches);
