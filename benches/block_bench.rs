use criterion::{black_box, criterion_group, criterion_main, Criterion};
use failsafefs::block::{DataBlock, BLOCK_SIZE, DATA_SIZE};
use failsafefs::chain;
use failsafefs::recovery::Scanner;
use std::io::Cursor;

fn bench_codec(c: &mut Criterion) {
    let mut block = DataBlock {
        header: chain::data_header(None, DATA_SIZE as i64, 0, 0, 1),
        payload: [0xABu8; DATA_SIZE],
    };
    let raw = block.seal();

    c.bench_function("seal_4k_block", |b| {
        b.iter(|| black_box(block.clone()).seal())
    });
    c.bench_function("decode_4k_block", |b| {
        b.iter(|| DataBlock::decode(black_box(&raw)).unwrap())
    });

    // 1 MiB of noise with one valid record at the end, torn off alignment.
    let mut desc = chain::description_for(&block.header, b"/bench/file", 0, 0, 0o644, 1);
    let mut image = vec![0x5Au8; 1024 * 1024 - BLOCK_SIZE - 13];
    image.extend_from_slice(&desc.seal());
    image.extend_from_slice(&[0x5Au8; 13]);
    c.bench_function("scan_1mib", |b| {
        b.iter(|| Scanner::new(Cursor::new(black_box(&image))).count())
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
