//! Chain assembler — header construction for hash-linked block sequences.
//!
//! Block 0 of a chain mints the identity: a fresh 32-byte random chain id
//! and `date_first = date_current`.  Every later block copies both and links
//! back through `last_hash = predecessor.current_hash`.  The description
//! block continues the chain one slot past the last data block and records
//! the logical file length.
//!
//! `current_hash` is always left zero here; it exists only after
//! [`DataBlock::seal`]/[`DescriptionBlock::seal`] runs over the serialized
//! record.

use chrono::Utc;
use rand::RngCore;

use crate::block::{
    BlockHeader, DataBlock, DescriptionBlock, DATA_SIZE, HASH_SIZE, PATH_FIELD_SIZE,
    RANDOM_ID_SIZE,
};

/// Current time as double seconds since the epoch, millisecond resolution.
pub fn timestamp_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1e3
}

/// Build the header for the data block at `block_counter`.
///
/// With no predecessor the block starts a chain: zero `last_hash`, fresh
/// `random_id`, `date_first` pinned to now.  With one, the identity fields
/// carry over and `last_hash` links to the predecessor's sealed hash.
pub fn data_header(
    prev: Option<&BlockHeader>,
    size_in_block: i64,
    block_counter: i64,
    offset: i64,
    revision: i64,
) -> BlockHeader {
    let date_current = timestamp_now();
    let mut header = BlockHeader {
        current_hash: [0u8; HASH_SIZE],
        block_counter,
        offset,
        size_in_block,
        date_current,
        date_first: date_current,
        last_hash: [0u8; HASH_SIZE],
        revision,
        random_id: [0u8; RANDOM_ID_SIZE],
    };
    match prev {
        Some(last) => {
            header.last_hash = last.current_hash;
            header.date_first = last.date_first;
            header.random_id = last.random_id;
        }
        None => {
            rand::thread_rng().fill_bytes(&mut header.random_id);
        }
    }
    header
}

/// Re-stamp an existing block that is being rewritten in place.
///
/// Chain identity (`random_id`, `date_first`) and the back link stay as
/// loaded; the creation date moves to now, the revision becomes the
/// session's, and the stale hash is cleared until the next seal.
pub fn touch(block: &mut DataBlock, size_in_block: i64, revision: i64) {
    block.header.size_in_block = size_in_block;
    block.header.date_current = timestamp_now();
    block.header.revision = revision;
    block.header.current_hash = [0u8; HASH_SIZE];
}

/// Build the description block that terminates a chain after `last`.
///
/// The logical length is derived from the last data block's position and
/// fill.  Paths longer than the 3846 usable bytes lose their leading bytes
/// and set the partial flag, keeping the recoverable suffix.
pub fn description_for(
    last: &BlockHeader,
    path: &[u8],
    uid: i64,
    gid: i64,
    permissions: i64,
    revision: i64,
) -> DescriptionBlock {
    let (stored, partial) = if path.len() + 1 > PATH_FIELD_SIZE {
        (&path[path.len() + 1 - PATH_FIELD_SIZE..], true)
    } else {
        (path, false)
    };
    let header = BlockHeader {
        current_hash: [0u8; HASH_SIZE],
        block_counter: last.block_counter + 1,
        offset: last.block_counter * DATA_SIZE as i64 + last.size_in_block,
        size_in_block: stored.len() as i64,
        date_current: timestamp_now(),
        date_first: last.date_first,
        last_hash: last.current_hash,
        revision,
        random_id: last.random_id,
    };
    DescriptionBlock {
        header,
        uid,
        gid,
        permissions,
        partial_path: partial,
        path: stored.to_vec(),
    }
}
