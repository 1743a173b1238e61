//! # Chunker Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use comms_if::net::{Chunker, Reassembler};

fn chunker_benchmark(c: &mut Criterion) {
    // Roughly the size of an encoded 640x480 camera frame
    let payload: Vec<u8> = (0..27_500u32).map(|i| (i % 251) as u8).collect();

    let mut chunker = Chunker::new(9000, 3).unwrap();

    c.bench_function("Chunker::chunk", |b| {
        b.iter(|| chunker.chunk(black_box(&payload)).unwrap())
    });

    let mut chunker = Chunker::new(9000, 3).unwrap();
    let mut reassembler = Reassembler::new(3).unwrap();

    c.bench_function("Chunker::chunk + Reassembler::push", |b| {
        b.iter(|| {
            let mut out = None;
            for d in chunker.chunk(black_box(&payload)).unwrap() {
                if let Some(msg) = reassembler.push(&d).unwrap() {
                    out = Some(msg);
                }
            }
            out.unwrap()
        })
    });
}

criterion_group!(benches, chunker_benchmark);
criterion_main!(benches);
