//! Block codec — the two fixed 4096-byte on-disk records.
//!
//! # On-disk layout (4096 bytes, shared 224-byte prefix, all integers
//! little-endian, doubles IEEE-754)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   signature      "FAILSAFE" (data) / "FAILDESC" (description)
//!    8     64   current_hash   SHA-1 of bytes 72..4096, zero-padded to 64
//!   72      8   version        "    1.00"
//!   80      8   block_counter  i64; first data block of a file is 0
//!   88      8   offset         i64; data: position of the block's first
//!                              payload byte in the logical file;
//!                              description: logical file length
//!   96      8   size_in_block  i64; data: valid payload bytes (0..=3840);
//!                              description: stored path length
//!  104      8   date_current   f64 seconds since the epoch
//!  112      8   date_first     f64; copied from block 0 along the chain
//!  120     64   last_hash      predecessor's current_hash; zero at block 0
//!  184      8   revision       i64 write-session revision
//!  192     32   random_id      chain id, generated at block 0
//! ── data tail ────────────────────────────────────────────────────────────
//!  224     32   reserved       zero
//!  256   3840   payload
//! ── description tail ─────────────────────────────────────────────────────
//!  224      8   uid            i64
//!  232      8   gid            i64
//!  240      8   permissions    i64
//!  248      1   partial_path   1 = leading path bytes were discarded
//!  249   3847   last_path      NUL-terminated
//! ```
//!
//! # Hash domain
//! `current_hash` covers bytes 72..4096 — everything after the
//! signature-plus-hash prefix.  The SHA-1 digest sits left-aligned in the
//! 64-byte field with the remainder zero.  Both variants hash the same
//! window, so any block validates without knowing its position in a file or
//! which tail layout it carries.
//!
//! # Validation
//! A block passes the consistency check only when all three of signature,
//! version, and hash check out.  The checks run in that order; callers MUST
//! NOT use any field of a record that failed decoding.

use byteorder::{ByteOrder, LittleEndian};
use sha1::{Digest, Sha1};
use thiserror::Error;

// ── Constants ────────────────────────────────────────────────────────────────

/// Fixed byte size of every on-disk record.
pub const BLOCK_SIZE: usize = 4096;

/// Payload capacity of a data block.
pub const DATA_SIZE: usize = 3840;

/// Byte size of the on-disk hash fields (SHA-1 digest, zero-padded).
pub const HASH_SIZE: usize = 64;

/// Byte size of the chain identity field.
pub const RANDOM_ID_SIZE: usize = 32;

/// Signature of a data block.
pub const DATA_SIGNATURE: &[u8; 8] = b"FAILSAFE";

/// Signature of a description block.
pub const DESC_SIGNATURE: &[u8; 8] = b"FAILDESC";

/// On-disk format version literal (four leading spaces).
pub const FORMAT_VERSION: &[u8; 8] = b"    1.00";

/// First hashed byte: everything before it (signature + current_hash) is
/// outside the hash domain.
pub const HASHED_RANGE_START: usize = 8 + HASH_SIZE;

/// Capacity of the NUL-terminated path field in a description block.
pub const PATH_FIELD_SIZE: usize = 3847;

// Field offsets within the 4096-byte record.
const OFF_SIGNATURE: usize = 0;
const OFF_CURRENT_HASH: usize = 8;
const OFF_VERSION: usize = 72;
const OFF_BLOCK_COUNTER: usize = 80;
const OFF_OFFSET: usize = 88;
const OFF_SIZE_IN_BLOCK: usize = 96;
const OFF_DATE_CURRENT: usize = 104;
const OFF_DATE_FIRST: usize = 112;
const OFF_LAST_HASH: usize = 120;
const OFF_REVISION: usize = 184;
const OFF_RANDOM_ID: usize = 192;
// Data variant tail.
const OFF_RESERVED: usize = 224;
const RESERVED_SIZE: usize = 32;
const OFF_PAYLOAD: usize = 256;
// Description variant tail.
const OFF_UID: usize = 224;
const OFF_GID: usize = 232;
const OFF_PERMISSIONS: usize = 240;
const OFF_PARTIAL_PATH: usize = 248;
const OFF_LAST_PATH: usize = 249;

// Both tail layouts must land exactly on the record size; a build with a
// mis-sized layout must not exist at all.
const _: () = assert!(OFF_PAYLOAD + DATA_SIZE == BLOCK_SIZE);
const _: () = assert!(OFF_RESERVED + RESERVED_SIZE == OFF_PAYLOAD);
const _: () = assert!(OFF_LAST_PATH + PATH_FIELD_SIZE == BLOCK_SIZE);
const _: () = assert!(OFF_RANDOM_ID + RANDOM_ID_SIZE == OFF_RESERVED);
const _: () = assert!(OFF_CURRENT_HASH + HASH_SIZE == OFF_VERSION);
const _: () = assert!(OFF_LAST_HASH + HASH_SIZE == OFF_REVISION);
const _: () = assert!(HASHED_RANGE_START == OFF_VERSION);

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("unrecognized block signature")]
    BadSignature,
    #[error("unsupported format version {found:?} (this build handles \"    1.00\")")]
    BadVersion { found: String },
    #[error("block hash mismatch: stored {stored}…, computed {computed}…")]
    BadHash { stored: String, computed: String },
}

impl From<BlockError> for std::io::Error {
    fn from(e: BlockError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    }
}

// ── Shared header ────────────────────────────────────────────────────────────

/// The 224-byte prefix common to both record variants.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    /// Filled in by [`DataBlock::seal`]/[`DescriptionBlock::seal`]; zero on a
    /// freshly assembled block.
    pub current_hash: [u8; HASH_SIZE],
    pub block_counter: i64,
    pub offset: i64,
    pub size_in_block: i64,
    pub date_current: f64,
    pub date_first: f64,
    pub last_hash: [u8; HASH_SIZE],
    pub revision: i64,
    pub random_id: [u8; RANDOM_ID_SIZE],
}

impl BlockHeader {
    /// Serialize the prefix fields into `raw`.  `current_hash` is written
    /// as-is — it lies outside the hash domain, so stale bytes never poison
    /// the digest computed over the rest.
    fn encode_into(&self, signature: &[u8; 8], raw: &mut [u8; BLOCK_SIZE]) {
        raw[OFF_SIGNATURE..OFF_SIGNATURE + 8].copy_from_slice(signature);
        raw[OFF_CURRENT_HASH..OFF_CURRENT_HASH + HASH_SIZE].copy_from_slice(&self.current_hash);
        raw[OFF_VERSION..OFF_VERSION + 8].copy_from_slice(FORMAT_VERSION);
        LittleEndian::write_i64(&mut raw[OFF_BLOCK_COUNTER..OFF_BLOCK_COUNTER + 8], self.block_counter);
        LittleEndian::write_i64(&mut raw[OFF_OFFSET..OFF_OFFSET + 8], self.offset);
        LittleEndian::write_i64(&mut raw[OFF_SIZE_IN_BLOCK..OFF_SIZE_IN_BLOCK + 8], self.size_in_block);
        LittleEndian::write_f64(&mut raw[OFF_DATE_CURRENT..OFF_DATE_CURRENT + 8], self.date_current);
        LittleEndian::write_f64(&mut raw[OFF_DATE_FIRST..OFF_DATE_FIRST + 8], self.date_first);
        raw[OFF_LAST_HASH..OFF_LAST_HASH + HASH_SIZE].copy_from_slice(&self.last_hash);
        LittleEndian::write_i64(&mut raw[OFF_REVISION..OFF_REVISION + 8], self.revision);
        raw[OFF_RANDOM_ID..OFF_RANDOM_ID + RANDOM_ID_SIZE].copy_from_slice(&self.random_id);
    }

    fn decode_from(raw: &[u8; BLOCK_SIZE]) -> Self {
        let mut current_hash = [0u8; HASH_SIZE];
        current_hash.copy_from_slice(&raw[OFF_CURRENT_HASH..OFF_CURRENT_HASH + HASH_SIZE]);
        let mut last_hash = [0u8; HASH_SIZE];
        last_hash.copy_from_slice(&raw[OFF_LAST_HASH..OFF_LAST_HASH + HASH_SIZE]);
        let mut random_id = [0u8; RANDOM_ID_SIZE];
        random_id.copy_from_slice(&raw[OFF_RANDOM_ID..OFF_RANDOM_ID + RANDOM_ID_SIZE]);
        Self {
            current_hash,
            block_counter: LittleEndian::read_i64(&raw[OFF_BLOCK_COUNTER..OFF_BLOCK_COUNTER + 8]),
            offset: LittleEndian::read_i64(&raw[OFF_OFFSET..OFF_OFFSET + 8]),
            size_in_block: LittleEndian::read_i64(&raw[OFF_SIZE_IN_BLOCK..OFF_SIZE_IN_BLOCK + 8]),
            date_current: LittleEndian::read_f64(&raw[OFF_DATE_CURRENT..OFF_DATE_CURRENT + 8]),
            date_first: LittleEndian::read_f64(&raw[OFF_DATE_FIRST..OFF_DATE_FIRST + 8]),
            last_hash,
            revision: LittleEndian::read_i64(&raw[OFF_REVISION..OFF_REVISION + 8]),
            random_id,
        }
    }
}

// ── Hashing ──────────────────────────────────────────────────────────────────

/// SHA-1 of the hashed window (bytes 72..4096), left-aligned in a 64-byte
/// field.  The window excludes the stored hash itself, so the digest of an
/// encoded record is recomputable directly from its bytes.
pub fn block_digest(raw: &[u8; BLOCK_SIZE]) -> [u8; HASH_SIZE] {
    let mut out = [0u8; HASH_SIZE];
    let digest = Sha1::digest(&raw[HASHED_RANGE_START..]);
    out[..digest.len()].copy_from_slice(&digest);
    out
}

/// Validate signature, version, and hash, in that order.
fn check_consistency(raw: &[u8; BLOCK_SIZE], signature: &[u8; 8]) -> Result<(), BlockError> {
    if &raw[OFF_SIGNATURE..OFF_SIGNATURE + 8] != signature {
        return Err(BlockError::BadSignature);
    }
    if &raw[OFF_VERSION..OFF_VERSION + 8] != FORMAT_VERSION {
        return Err(BlockError::BadVersion {
            found: String::from_utf8_lossy(&raw[OFF_VERSION..OFF_VERSION + 8]).into_owned(),
        });
    }
    let computed = block_digest(raw);
    if raw[OFF_CURRENT_HASH..OFF_CURRENT_HASH + HASH_SIZE] != computed {
        return Err(BlockError::BadHash {
            stored: hex::encode(&raw[OFF_CURRENT_HASH..OFF_CURRENT_HASH + 8]),
            computed: hex::encode(&computed[..8]),
        });
    }
    Ok(())
}

/// Scanner helper: does `window[start..start + 8]` spell the description
/// signature?  Out-of-range starts are simply not candidates.
#[inline]
pub fn is_description_candidate(window: &[u8], start: usize) -> bool {
    window.len() >= start + 8 && &window[start..start + 8] == DESC_SIGNATURE
}

// ── Data block ───────────────────────────────────────────────────────────────

/// A data block: header plus up to 3840 payload bytes.  Payload bytes past
/// `size_in_block` are zero on disk.
#[derive(Clone)]
pub struct DataBlock {
    pub header: BlockHeader,
    pub payload: [u8; DATA_SIZE],
}

impl DataBlock {
    /// Serialize to a 4096-byte record, computing and storing `current_hash`.
    ///
    /// Payload bytes beyond `size_in_block` are zero-filled in the output so
    /// the digest never depends on stale cache content.
    pub fn seal(&mut self) -> [u8; BLOCK_SIZE] {
        let mut raw = [0u8; BLOCK_SIZE];
        self.header.encode_into(DATA_SIGNATURE, &mut raw);
        let valid = (self.header.size_in_block.max(0) as usize).min(DATA_SIZE);
        raw[OFF_PAYLOAD..OFF_PAYLOAD + valid].copy_from_slice(&self.payload[..valid]);
        let hash = block_digest(&raw);
        self.header.current_hash = hash;
        raw[OFF_CURRENT_HASH..OFF_CURRENT_HASH + HASH_SIZE].copy_from_slice(&hash);
        raw
    }

    /// Decode and fully validate a data-block record.
    pub fn decode(raw: &[u8; BLOCK_SIZE]) -> Result<Self, BlockError> {
        check_consistency(raw, DATA_SIGNATURE)?;
        let header = BlockHeader::decode_from(raw);
        let mut payload = [0u8; DATA_SIZE];
        payload.copy_from_slice(&raw[OFF_PAYLOAD..OFF_PAYLOAD + DATA_SIZE]);
        Ok(Self { header, payload })
    }
}

// ── Description block ────────────────────────────────────────────────────────

/// The terminating record of a chain: logical length (in `header.offset`),
/// ownership, mode, and the path for recovery.
#[derive(Debug, Clone)]
pub struct DescriptionBlock {
    pub header: BlockHeader,
    pub uid: i64,
    pub gid: i64,
    pub permissions: i64,
    /// Set when the original path exceeded the field and its leading bytes
    /// were discarded.
    pub partial_path: bool,
    /// Stored path bytes, without the terminating NUL.
    pub path: Vec<u8>,
}

impl DescriptionBlock {
    /// Serialize to a 4096-byte record, computing and storing `current_hash`.
    pub fn seal(&mut self) -> [u8; BLOCK_SIZE] {
        let mut raw = [0u8; BLOCK_SIZE];
        self.header.encode_into(DESC_SIGNATURE, &mut raw);
        LittleEndian::write_i64(&mut raw[OFF_UID..OFF_UID + 8], self.uid);
        LittleEndian::write_i64(&mut raw[OFF_GID..OFF_GID + 8], self.gid);
        LittleEndian::write_i64(&mut raw[OFF_PERMISSIONS..OFF_PERMISSIONS + 8], self.permissions);
        raw[OFF_PARTIAL_PATH] = self.partial_path as u8;
        // NUL-terminated; chain::description_for guarantees the fit.
        let len = self.path.len().min(PATH_FIELD_SIZE - 1);
        raw[OFF_LAST_PATH..OFF_LAST_PATH + len].copy_from_slice(&self.path[..len]);
        let hash = block_digest(&raw);
        self.header.current_hash = hash;
        raw[OFF_CURRENT_HASH..OFF_CURRENT_HASH + HASH_SIZE].copy_from_slice(&hash);
        raw
    }

    /// Decode and fully validate a description record.
    pub fn decode(raw: &[u8; BLOCK_SIZE]) -> Result<Self, BlockError> {
        check_consistency(raw, DESC_SIGNATURE)?;
        let header = BlockHeader::decode_from(raw);
        let field = &raw[OFF_LAST_PATH..OFF_LAST_PATH + PATH_FIELD_SIZE];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        Ok(Self {
            header,
            uid: LittleEndian::read_i64(&raw[OFF_UID..OFF_UID + 8]),
            gid: LittleEndian::read_i64(&raw[OFF_GID..OFF_GID + 8]),
            permissions: LittleEndian::read_i64(&raw[OFF_PERMISSIONS..OFF_PERMISSIONS + 8]),
            partial_path: raw[OFF_PARTIAL_PATH] != 0,
            path: field[..end].to_vec(),
        })
    }

    /// The stored path for display.
    pub fn path_lossy(&self) -> String {
        String::from_utf8_lossy(&self.path).into_owned()
    }
}

// ── Variant dispatch ─────────────────────────────────────────────────────────

/// A decoded record of either variant.
pub enum Block {
    Data(DataBlock),
    Description(DescriptionBlock),
}

/// Decode a record of unknown variant, dispatching on the signature.
pub fn decode(raw: &[u8; BLOCK_SIZE]) -> Result<Block, BlockError> {
    if &raw[OFF_SIGNATURE..OFF_SIGNATURE + 8] == DATA_SIGNATURE {
        DataBlock::decode(raw).map(Block::Data)
    } else if &raw[OFF_SIGNATURE..OFF_SIGNATURE + 8] == DESC_SIGNATURE {
        DescriptionBlock::decode(raw).map(Block::Description)
    } else {
        Err(BlockError::BadSignature)
    }
}
