//! Codec benchmarks for tether-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use tether_protocol::{codec, Frame, Meta, PresenceEntry, PresenceMap};

fn chat_push() -> Frame {
    Frame::push(
        7,
        "room:lobby",
        "new_msg",
        json!({"body": "x".repeat(64), "user_email": "ann@example.com"}),
    )
}

fn roster(users: usize) -> Frame {
    let state: PresenceMap = (0..users)
        .map(|i| {
            let meta = Meta::new(
                format!("ref-{i}"),
                json!({"user_id": i, "email": format!("user{i}@example.com"), "online_at": 1_700_000_000 + i}),
            );
            (i.to_string(), PresenceEntry::new(vec![meta]))
        })
        .collect();
    Frame::presence_state("room:lobby", state)
}

fn bench_encode_push(c: &mut Criterion) {
    let frame = chat_push();
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("push_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_push(c: &mut Criterion) {
    let encoded = codec::encode(&chat_push()).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("push_64B", |b| b.iter(|| codec::decode(black_box(&encoded))));
    group.finish();
}

fn bench_decode_roster(c: &mut Criterion) {
    let encoded = codec::encode(&roster(500)).unwrap();

    c.bench_function("decode_presence_state_500", |b| {
        b.iter(|| codec::decode(black_box(&encoded)).unwrap())
    });
}

criterion_group!(benches, bench_encode_push, bench_decode_push, bench_decode_roster);
criterion_main!(benches);
