//! Property tests: arbitrary write tilings read back byte-identically, and
//! every produced container honors the chain invariants.

use std::fs;

use failsafefs::block::{DataBlock, DescriptionBlock, BLOCK_SIZE, DATA_SIZE, HASH_SIZE};
use failsafefs::FailSafeFs;
use proptest::prelude::*;
use tempfile::tempdir;

/// Structural check of a complete on-disk container against its logical
/// contents: gapless counters, hash links, constant chain identity, full
/// interior blocks, and a description recording the exact length.
fn verify_container(raw: &[u8], logical: &[u8], path: &str) {
    assert_eq!(raw.len() % BLOCK_SIZE, 0);
    let records = raw.len() / BLOCK_SIZE;
    let data_blocks = records - 1;
    assert_eq!(data_blocks, (logical.len() + DATA_SIZE - 1) / DATA_SIZE);

    let mut prev_hash = [0u8; HASH_SIZE];
    let mut identity: Option<([u8; 32], f64)> = None;

    for i in 0..data_blocks {
        let rec: &[u8; BLOCK_SIZE] = raw[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]
            .try_into()
            .unwrap();
        let block = DataBlock::decode(rec).unwrap();
        assert_eq!(block.header.block_counter, i as i64);
        assert_eq!(block.header.offset, (i * DATA_SIZE) as i64);
        assert_eq!(block.header.last_hash, prev_hash);

        let expected = &logical[i * DATA_SIZE..logical.len().min((i + 1) * DATA_SIZE)];
        if i < data_blocks - 1 {
            assert_eq!(block.header.size_in_block, DATA_SIZE as i64);
        } else {
            assert_eq!(block.header.size_in_block, expected.len() as i64);
        }
        assert_eq!(&block.payload[..expected.len()], expected);

        match identity {
            None => identity = Some((block.header.random_id, block.header.date_first)),
            Some((id, first)) => {
                assert_eq!(block.header.random_id, id);
                assert_eq!(block.header.date_first, first);
            }
        }
        prev_hash = block.header.current_hash;
    }

    let rec: &[u8; BLOCK_SIZE] = raw[data_blocks * BLOCK_SIZE..(data_blocks + 1) * BLOCK_SIZE]
        .try_into()
        .unwrap();
    let desc = DescriptionBlock::decode(rec).unwrap();
    assert_eq!(desc.header.block_counter, data_blocks as i64);
    assert_eq!(desc.header.offset, logical.len() as i64);
    assert_eq!(desc.header.last_hash, prev_hash);
    assert_eq!(desc.path, path.as_bytes());
    let (id, first) = identity.unwrap();
    assert_eq!(desc.header.random_id, id);
    assert_eq!(desc.header.date_first, first);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn writes_tiling_a_buffer_read_back_identically(
        data in proptest::collection::vec(any::<u8>(), 1..20_000),
        widths in proptest::collection::vec(1usize..5000, 0..8),
    ) {
        let dir = tempdir().unwrap();
        let fsys = FailSafeFs::new(dir.path()).unwrap();

        // Carve `data` into consecutive slices: the listed widths first,
        // then whatever remains.
        let fh = fsys.open("prop.bin", true).unwrap();
        let mut start = 0usize;
        for w in &widths {
            if start >= data.len() { break; }
            let end = data.len().min(start + w);
            prop_assert_eq!(fsys.write(fh, start as i64, &data[start..end]).unwrap(), end - start);
            start = end;
        }
        if start < data.len() {
            prop_assert_eq!(fsys.write(fh, start as i64, &data[start..]).unwrap(), data.len() - start);
        }
        fsys.release(fh).unwrap();

        // Full-range read returns the original bytes.
        let fh = fsys.open("prop.bin", false).unwrap();
        let mut buf = vec![0u8; data.len()];
        prop_assert_eq!(fsys.read(fh, 0, &mut buf).unwrap(), data.len());
        fsys.release(fh).unwrap();
        prop_assert_eq!(&buf, &data);

        let (size, _) = fsys.stat_logical_size("prop.bin").unwrap();
        prop_assert_eq!(size, data.len() as u64);

        verify_container(&fs::read(dir.path().join("prop.bin")).unwrap(), &data, "prop.bin");
    }

    #[test]
    fn interior_reads_match_the_source(
        data in proptest::collection::vec(any::<u8>(), 1..12_000),
        window in (0usize..12_000, 1usize..6000),
    ) {
        let dir = tempdir().unwrap();
        let fsys = FailSafeFs::new(dir.path()).unwrap();

        let fh = fsys.open("slice.bin", true).unwrap();
        fsys.write(fh, 0, &data).unwrap();
        fsys.release(fh).unwrap();

        let (offset, len) = window;
        let fh = fsys.open("slice.bin", false).unwrap();
        let mut buf = vec![0u8; len];
        let n = fsys.read(fh, offset as i64, &mut buf).unwrap();
        fsys.release(fh).unwrap();

        let expected: &[u8] = if offset >= data.len() {
            &[]
        } else {
            &data[offset..data.len().min(offset + len)]
        };
        prop_assert_eq!(n, expected.len());
        prop_assert_eq!(&buf[..n], expected);
    }
}
