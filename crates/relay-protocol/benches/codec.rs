//! Codec benchmarks for relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, Envelope, RelayMessage};

fn bench_decode_envelope(c: &mut Criterion) {
    let direct = codec::encode_envelope(&Envelope::direct("bob", "x".repeat(64))).unwrap();
    let group = codec::encode_envelope(&Envelope::group_send("rust", "x".repeat(64))).unwrap();

    let mut bench = c.benchmark_group("decode_envelope");
    bench.throughput(Throughput::Bytes(direct.len() as u64));
    bench.bench_function("direct_64B", |b| {
        b.iter(|| codec::decode_envelope(black_box(&direct)))
    });
    bench.bench_function("group_64B", |b| {
        b.iter(|| codec::decode_envelope(black_box(&group)))
    });
    bench.finish();
}

fn bench_relay_message(c: &mut Criterion) {
    let message = RelayMessage::group("alice", "rust", "x".repeat(256));
    let encoded = codec::encode_relay(&message).unwrap();

    c.bench_function("encode_relay_256B", |b| {
        b.iter(|| codec::encode_relay(black_box(&message)))
    });
    c.bench_function("decode_relay_256B", |b| {
        b.iter(|| codec::decode_relay(black_box(&encoded)))
    });
}

criterion_group!(benches, bench_decode_envelope, bench_relay_message);
criterion_main!(benches);
