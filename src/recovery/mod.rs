//! Forensic recovery — locate files in raw bytes without any directory tree.
//!
//! Every description block is self-describing: signature, version, hash,
//! logical length, ownership, path, and the chain id shared with its data
//! blocks.  [`Scanner`] sweeps any byte stream for them; no superstructure
//! is needed, and nothing short of a failed consistency check disqualifies
//! a record.  Recovery itself is an offline, human-driven process working
//! from the emitted records — there is no automatic repair.
//!
//! When a chain appears more than once (older generations of a rewritten
//! file survive in unallocated space, or several copies sit on one device),
//! the record with the highest revision is the canonical one; lower
//! revisions are older recoverable versions.  [`select_canonical`] applies
//! that rule.

mod scanner;

pub use scanner::Scanner;

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Serialize, Serializer};

use crate::block::{DescriptionBlock, RANDOM_ID_SIZE};

/// One valid description block found in the stream.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveredFile {
    /// Absolute stream offset of the description block.
    pub byte_offset: u64,
    /// Logical length of the recorded file in bytes.
    pub logical_len: i64,
    /// Write-session revision of this generation.
    pub revision: i64,
    /// Recorded path (lossy UTF-8 for display).
    pub path: String,
    /// The path lost its leading bytes to the field limit.
    pub partial_path: bool,
    pub uid: i64,
    pub gid: i64,
    pub permissions: i64,
    /// Chain id shared by every block of the file, all revisions included.
    #[serde(serialize_with = "hex_bytes")]
    pub random_id: [u8; RANDOM_ID_SIZE],
    /// Creation date of the chain's first block, double seconds.
    pub date_first: f64,
}

fn hex_bytes<S: Serializer>(b: &[u8; RANDOM_ID_SIZE], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(b))
}

impl RecoveredFile {
    pub(crate) fn from_description(byte_offset: u64, desc: &DescriptionBlock) -> Self {
        Self {
            byte_offset,
            logical_len: desc.header.offset,
            revision: desc.header.revision,
            path: desc.path_lossy(),
            partial_path: desc.partial_path,
            uid: desc.uid,
            gid: desc.gid,
            permissions: desc.permissions,
            random_id: desc.header.random_id,
            date_first: desc.header.date_first,
        }
    }

    /// Chain id as lowercase hex for display.
    pub fn random_id_hex(&self) -> String {
        hex::encode(self.random_id)
    }
}

/// Sweep a file or device and collect every recoverable record.
///
/// Invalid candidates are skipped, never fatal; only genuine I/O errors
/// propagate.
pub fn scan_file(path: &Path) -> io::Result<Vec<RecoveredFile>> {
    Scanner::new(File::open(path)?).collect()
}

/// Keep the highest-revision record per chain id, ordered by stream offset.
pub fn select_canonical(records: &[RecoveredFile]) -> Vec<&RecoveredFile> {
    let mut best: HashMap<[u8; RANDOM_ID_SIZE], &RecoveredFile> = HashMap::new();
    for rec in records {
        match best.get(&rec.random_id) {
            Some(cur) if cur.revision >= rec.revision => {}
            _ => {
                best.insert(rec.random_id, rec);
            }
        }
    }
    let mut out: Vec<&RecoveredFile> = best.into_values().collect();
    out.sort_by_key(|r| r.byte_offset);
    out
}
