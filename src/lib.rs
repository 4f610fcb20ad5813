//! # failsafefs — block-chained recoverable container format
//!
//! Format guarantees (frozen at version "    1.00"):
//! - All integer fields are little-endian i64, dates are IEEE-754 doubles
//! - Every record is exactly 4096 bytes and self-describing: signature,
//!   version, sequence number, creation dates, chain id, own hash, and the
//!   predecessor's hash
//! - The hash is SHA-1 over bytes 72..4096, so any record validates in
//!   isolation, at any alignment, without its file
//! - A file is a gapless chain of data blocks (counter 0, 1, …) terminated
//!   by exactly one description block recording path, ownership, mode, and
//!   the logical length
//! - Only the final data block may carry fewer than 3840 payload bytes
//! - Each completed write session bumps the description's revision; older
//!   generations found on a raw device are recoverable versions of the
//!   same chain id
//! - The scanner needs nothing but the stream: signature match plus the
//!   consistency check, byte-by-byte

pub mod block;
pub mod chain;
pub mod fs;
pub mod handle;
pub mod recovery;

// Flat re-exports for the most common types.
pub use block::{
    decode, Block, BlockError, BlockHeader, DataBlock, DescriptionBlock, BLOCK_SIZE,
    DATA_SIGNATURE, DATA_SIZE, DESC_SIGNATURE, FORMAT_VERSION, HASH_SIZE,
};
pub use fs::FailSafeFs;
pub use handle::{ContainerHandle, FileMeta};
pub use recovery::{scan_file, select_canonical, RecoveredFile, Scanner};
