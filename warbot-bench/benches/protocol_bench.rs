//! Frame codec benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use warbot_protocol::{obfuscate, Decoder, Document, Encoder, Frame, Message, RequestId};

fn create_test_message(payload_size: usize) -> Message {
    let data = Document::from(serde_json::json!({
        "aid": 31,
        "index": 2,
        "extra": {
            "data": "x".repeat(payload_size),
        }
    }));
    Message::new(RequestId::START_EXPLORE_SEA, 42, data)
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 1000, 10000] {
        let frame = Frame::new(5001, 7, Bytes::from("x".repeat(size)));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let encoded = Frame::new(5001, 7, Bytes::from("x".repeat(size)))
            .encode()
            .unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Frame::decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_obfuscate(c: &mut Criterion) {
    let mut group = c.benchmark_group("obfuscate");

    for size in [100, 1000, 10000, 100000] {
        let data = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let mut tag = 0u8;
                let mut payload = data.clone();
                obfuscate(black_box(-3), &mut tag, &mut payload);
                black_box(payload)
            });
        });
    }

    group.finish();
}

fn bench_message_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_encode");

    for size in [100, 1000, 10000] {
        let message = create_test_message(size);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &message, |b, message| {
            b.iter(|| black_box(Encoder::encode_message(message).unwrap()));
        });
    }

    group.finish();
}

fn bench_message_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_decode");

    for size in [100, 1000, 10000] {
        let encoded = Encoder::encode_message(&create_test_message(size)).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(encoded);
                black_box(decoder.decode_message().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_decode_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_stream");

    let count = 100;
    let mut stream = Vec::new();
    for _ in 0..count {
        stream.extend_from_slice(&Encoder::encode_message(&create_test_message(100)).unwrap());
    }

    group.throughput(Throughput::Elements(count as u64));
    group.bench_function("100x100", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            decoder.extend(&stream);
            let mut decoded = 0;
            while let Some(message) = decoder.decode_message().unwrap() {
                black_box(message);
                decoded += 1;
            }
            assert_eq!(decoded, count);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_obfuscate,
    bench_message_encode,
    bench_message_decode,
    bench_decode_stream,
);

criterion_main!(benches);
