//! 분할/체크섬/프레임 인코딩 벤치마크

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pft::checksum::checksum_bytes;
use pft::{Frame, Segmenter, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

fn test_data(size: usize) -> Bytes {
    Bytes::from((0..size).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

fn bench_segment(c: &mut Criterion) {
    let data = test_data(16 * 1024 * 1024);
    let mut group = c.benchmark_group("segment");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk_size in [MIN_CHUNK_SIZE, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE] {
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let mut segmenter = Segmenter::new(data.clone());
                    let mut count = 0u32;
                    while let Some((_, payload)) = segmenter.next_chunk(chunk_size) {
                        black_box(payload);
                        count += 1;
                    }
                    count
                })
            },
        );
    }
    group.finish();
}

fn bench_checksum(c: &mut Criterion) {
    let data = test_data(16 * 1024 * 1024);
    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("sha256_16mb", |b| b.iter(|| checksum_bytes(black_box(&data))));
    group.finish();
}

fn bench_frame_codec(c: &mut Criterion) {
    let frame = Frame::chunk(1, 0, test_data(DEFAULT_CHUNK_SIZE));
    let encoded = frame.encode().unwrap();

    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode_chunk", |b| b.iter(|| black_box(&frame).encode()));
    group.bench_function("decode_chunk", |b| {
        b.iter(|| Frame::decode(black_box(&encoded)))
    });
    group.finish();
}

criterion_group!(benches, bench_segment, bench_checksum, bench_frame_codec);
criterion_main!(benches);
