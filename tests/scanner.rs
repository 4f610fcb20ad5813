//! Forensic scanner behavior over raw byte streams.

use std::fs;
use std::io::Cursor;

use failsafefs::block::BLOCK_SIZE;
use failsafefs::recovery::{select_canonical, RecoveredFile, Scanner};
use failsafefs::FailSafeFs;
use tempfile::tempdir;

/// Build a container in a scratch tree and return its raw bytes after each
/// write session.
fn container_generations(sessions: &[(i64, &[u8])]) -> Vec<Vec<u8>> {
    let dir = tempdir().unwrap();
    let fsys = FailSafeFs::new(dir.path()).unwrap();
    let local = dir.path().join("file.bin");
    let mut generations = Vec::new();
    for (offset, data) in sessions {
        let fh = fsys.open("file.bin", true).unwrap();
        fsys.write(fh, *offset, data).unwrap();
        fsys.release(fh).unwrap();
        generations.push(fs::read(&local).unwrap());
    }
    generations
}

fn scan_bytes(bytes: &[u8]) -> Vec<RecoveredFile> {
    Scanner::new(Cursor::new(bytes))
        .collect::<std::io::Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn empty_stream_yields_nothing() {
    assert!(scan_bytes(&[]).is_empty());
    assert!(scan_bytes(&[0x55; 10_000]).is_empty());
}

#[test]
fn container_alone_is_found() {
    let generations = container_generations(&[(0, b"hello")]);
    let records = scan_bytes(&generations[0]);
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.byte_offset, BLOCK_SIZE as u64);
    assert_eq!(rec.logical_len, 5);
    assert_eq!(rec.revision, 1);
    assert_eq!(rec.path, "file.bin");
    assert!(!rec.partial_path);
}

#[test]
fn records_found_at_any_alignment() {
    let generations = container_generations(&[(0, b"hello")]);
    let container = &generations[0];

    for prefix in [0usize, 1, 7, 511, 1234, 4095, 4096, 5000] {
        let mut device = vec![0x55u8; prefix];
        device.extend_from_slice(container);
        device.extend_from_slice(&[0xAAu8; 777]);

        let records = scan_bytes(&device);
        assert_eq!(records.len(), 1, "prefix {prefix}");
        assert_eq!(records[0].byte_offset, (prefix + BLOCK_SIZE) as u64, "prefix {prefix}");
        assert_eq!(records[0].logical_len, 5);
    }
}

#[test]
fn multi_block_file_reports_one_record() {
    let generations = container_generations(&[(3000, &[b'A'; 4000])]);
    let records = scan_bytes(&generations[0]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].byte_offset, 2 * BLOCK_SIZE as u64);
    assert_eq!(records[0].logical_len, 7000);
}

#[test]
fn older_generations_survive_on_a_device() {
    // Two write sessions of one file; a raw device holding both generations
    // shows both revisions of the same chain.
    let generations = container_generations(&[(0, b"hello"), (5, b" world")]);

    let mut device = generations[0].clone();
    device.extend_from_slice(&[0u8; 100]);
    device.extend_from_slice(&generations[1]);

    let records = scan_bytes(&device);
    assert_eq!(records.len(), 2);

    let old = &records[0];
    let new = &records[1];
    assert_eq!(old.revision, 1);
    assert_eq!(old.logical_len, 5);
    assert_eq!(new.revision, 2);
    assert_eq!(new.logical_len, 11);
    assert_eq!(old.random_id, new.random_id);
    assert_eq!(old.date_first, new.date_first);
    assert_eq!(new.byte_offset, (generations[0].len() + 100 + BLOCK_SIZE) as u64);

    let canonical = select_canonical(&records);
    assert_eq!(canonical.len(), 1);
    assert_eq!(canonical[0].revision, 2);
    assert_eq!(canonical[0].logical_len, 11);
}

#[test]
fn corrupt_description_is_skipped() {
    let generations = container_generations(&[(0, b"hello")]);
    let mut device = generations[0].clone();
    // Damage the description's hashed region.
    let desc_start = device.len() - BLOCK_SIZE;
    device[desc_start + 100] ^= 0xFF;
    assert!(scan_bytes(&device).is_empty());
}

#[test]
fn truncated_description_at_eof_is_skipped() {
    let generations = container_generations(&[(0, b"hello")]);
    let device = &generations[0][..generations[0].len() - 100];
    assert!(scan_bytes(device).is_empty());
}

#[test]
fn scan_file_matches_streaming_scan() {
    let dir = tempdir().unwrap();
    let fsys = FailSafeFs::new(dir.path()).unwrap();
    let fh = fsys.open("f.bin", true).unwrap();
    fsys.write(fh, 0, b"scan me").unwrap();
    fsys.release(fh).unwrap();

    let local = dir.path().join("f.bin");
    let from_file = failsafefs::scan_file(&local).unwrap();
    let from_stream = scan_bytes(&fs::read(&local).unwrap());
    assert_eq!(from_file.len(), 1);
    assert_eq!(from_file[0].byte_offset, from_stream[0].byte_offset);
    assert_eq!(from_file[0].path, "f.bin");
}
