use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use radio_common::cipher::SessionKey;
use radio_common::frame::{self, Transform};
use radio_common::{Coordinates, Message, RadioId};

fn data_message() -> Message {
    Message::data(
        RadioId::new("PLN", 42),
        Coordinates::new(120, -40, 9000),
        vec![0xABu8; 1024],
    )
}

fn bench_legacy_encode(c: &mut Criterion) {
    let msg = Message::hello(RadioId::new("PLN", 42), Coordinates::default(), true, true);
    let mut buf = BytesMut::with_capacity(64);

    c.bench_function("legacy_hello_encode", |b| {
        b.iter(|| {
            buf.clear();
            frame::encode_legacy(black_box(&msg), &mut buf).unwrap();
        });
    });
}

fn bench_extended_plain(c: &mut Criterion) {
    let msg = data_message();
    let mut encoded = BytesMut::new();
    frame::encode_extended(&msg, &Transform::Plain, &mut encoded).unwrap();

    c.bench_function("extended_plain_encode_1kb", |b| {
        let mut buf = BytesMut::with_capacity(2048);
        b.iter(|| {
            buf.clear();
            frame::encode_extended(black_box(&msg), &Transform::Plain, &mut buf).unwrap();
        });
    });

    c.bench_function("extended_plain_decode_1kb", |b| {
        b.iter(|| {
            let mut src = encoded.clone();
            black_box(frame::decode_extended(&mut src, &Transform::Plain).unwrap());
        });
    });
}

fn bench_extended_sealed(c: &mut Criterion) {
    let msg = data_message();
    let sealed = Transform::Sealed(SessionKey::generate());
    let mut encoded = BytesMut::new();
    frame::encode_extended(&msg, &sealed, &mut encoded).unwrap();

    c.bench_function("extended_sealed_encode_1kb", |b| {
        let mut buf = BytesMut::with_capacity(2048);
        b.iter(|| {
            buf.clear();
            frame::encode_extended(black_box(&msg), &sealed, &mut buf).unwrap();
        });
    });

    c.bench_function("extended_sealed_decode_1kb", |b| {
        b.iter(|| {
            let mut src = encoded.clone();
            black_box(frame::decode_extended(&mut src, &sealed).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_legacy_encode,
    bench_extended_plain,
    bench_extended_sealed
);
criterion_main!(benches);
