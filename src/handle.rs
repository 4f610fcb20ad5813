//! Per-open container state — byte-range I/O over the block chain.
//!
//! # Caches
//! A handle keeps at most four pieces of state between calls:
//! - the trailing description (revision + logical length), loaded lazily on
//!   the first read or write,
//! - the last fully read/written block, which supplies the predecessor for
//!   hash linking and satisfies re-reads without touching disk,
//! - the last block flushed to disk, which the close-time description
//!   chains off,
//! - one incomplete tail block that has not been written yet.
//!
//! # Write-out policy
//! `store_block` finalizes the pending tail first whenever a different slot
//! is produced, then either writes the new block (full) or parks it as the
//! new tail (partial).  At most one unflushed block exists per handle.
//! `flush` seals and writes the tail and promotes it to both caches, so the
//! description written at close always links to a verifiable on-disk block.
//!
//! # Lifecycle
//! ```text
//!    Opened ──first-write──▶ Writing ──finish──▶ Closed(wrote description)
//!       │                      │
//!       └─first-read──▶ Reading ┘ finish (no disk writes)
//! ```
//! A handle that only read never produces a new description, and a
//! write-intent handle that completed no writes leaves the file untouched.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use log::{debug, warn};

use crate::block::{BlockHeader, DataBlock, DescriptionBlock, BLOCK_SIZE, DATA_SIZE};
use crate::chain;

/// Recovery metadata recorded in the description block at close.
#[derive(Debug, Clone)]
pub struct FileMeta {
    /// Path as seen through the mounted tree (not the underlying path).
    pub path: String,
    pub uid: i64,
    pub gid: i64,
    pub mode: i64,
}

/// Cached view of the trailing description.
#[derive(Debug, Clone, Copy)]
struct DescState {
    revision: i64,
    logical_len: i64,
    /// Whether a valid description was actually on disk — decides between
    /// revision 1 and `revision + 1` at close.
    existed: bool,
}

enum DescProbe {
    /// File too small to hold any record.
    Missing,
    Valid(Box<DescriptionBlock>),
    /// A trailing record exists but fails the consistency check.
    Invalid,
}

/// One open container file.
pub struct ContainerHandle {
    file: File,
    writable: bool,
    desc: Option<DescState>,
    last_block: Option<DataBlock>,
    last_written: Option<DataBlock>,
    tail: Option<DataBlock>,
}

impl ContainerHandle {
    /// Open the underlying file.  Write intent opens read-write (the format
    /// always needs to read back blocks it overlays) and creates the file if
    /// absent.
    pub fn open(path: &Path, writable: bool) -> io::Result<Self> {
        let file = if writable {
            OpenOptions::new().read(true).write(true).create(true).open(path)?
        } else {
            File::open(path)?
        };
        Ok(Self {
            file,
            writable,
            desc: None,
            last_block: None,
            last_written: None,
            tail: None,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    // ── Description probing ──────────────────────────────────────────────────

    fn probe_description(&mut self) -> io::Result<DescProbe> {
        let size = self.file.metadata()?.len();
        if size <= BLOCK_SIZE as u64 {
            return Ok(DescProbe::Missing);
        }
        let mut raw = [0u8; BLOCK_SIZE];
        self.file.read_exact_at(&mut raw, size - BLOCK_SIZE as u64)?;
        match DescriptionBlock::decode(&raw) {
            Ok(d) => Ok(DescProbe::Valid(Box::new(d))),
            Err(e) => {
                warn!("trailing description failed validation: {e}");
                Ok(DescProbe::Invalid)
            }
        }
    }

    /// Strict: reads need a trustworthy logical length.
    fn desc_for_read(&mut self) -> io::Result<DescState> {
        if let Some(d) = self.desc {
            return Ok(d);
        }
        let state = match self.probe_description()? {
            DescProbe::Valid(d) => DescState {
                revision: d.header.revision,
                logical_len: d.header.offset,
                existed: true,
            },
            DescProbe::Missing => DescState { revision: 1, logical_len: 0, existed: false },
            DescProbe::Invalid => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "container description is corrupt",
                ))
            }
        };
        self.desc = Some(state);
        Ok(state)
    }

    /// Lenient: a write session on a file with no usable description starts
    /// a fresh chain at revision 1.
    fn session_revision(&mut self) -> io::Result<i64> {
        if let Some(d) = self.desc {
            return Ok(d.revision);
        }
        let state = match self.probe_description()? {
            DescProbe::Valid(d) => DescState {
                revision: d.header.revision,
                logical_len: d.header.offset,
                existed: true,
            },
            DescProbe::Missing | DescProbe::Invalid => {
                DescState { revision: 1, logical_len: 0, existed: false }
            }
        };
        self.desc = Some(state);
        Ok(state.revision)
    }

    // ── Block-level I/O ──────────────────────────────────────────────────────

    /// Fetch the data block at `counter`: incomplete tail first, then the
    /// last-block cache, then disk with full validation.
    fn read_block(&mut self, counter: i64) -> io::Result<DataBlock> {
        if let Some(t) = &self.tail {
            if t.header.block_counter == counter {
                return Ok(t.clone());
            }
        }
        if let Some(b) = &self.last_block {
            if b.header.block_counter == counter {
                return Ok(b.clone());
            }
        }
        let mut raw = [0u8; BLOCK_SIZE];
        self.file
            .read_exact_at(&mut raw, counter as u64 * BLOCK_SIZE as u64)?;
        let block = DataBlock::decode(&raw)?;
        self.last_block = Some(block.clone());
        Ok(block)
    }

    /// Best-effort load for the write path: a slot that is absent, holds a
    /// stale description, or fails validation yields `None` and the caller
    /// starts the block fresh.  Only genuine I/O errors propagate.
    fn slot_contents(&mut self, counter: i64) -> io::Result<Option<DataBlock>> {
        if let Some(t) = &self.tail {
            if t.header.block_counter == counter {
                return Ok(Some(t.clone()));
            }
        }
        if let Some(b) = &self.last_block {
            if b.header.block_counter == counter {
                return Ok(Some(b.clone()));
            }
        }
        if let Some(b) = &self.last_written {
            if b.header.block_counter == counter {
                return Ok(Some(b.clone()));
            }
        }
        let mut raw = [0u8; BLOCK_SIZE];
        match self
            .file
            .read_exact_at(&mut raw, counter as u64 * BLOCK_SIZE as u64)
        {
            Ok(()) => match DataBlock::decode(&raw) {
                Ok(b) if b.header.block_counter == counter => Ok(Some(b)),
                Ok(_) => Ok(None),
                Err(e) => {
                    debug!("slot {counter} not reusable: {e}");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Seal a block and write it at its slot, promoting it to both caches.
    fn write_sealed(&mut self, mut block: DataBlock) -> io::Result<BlockHeader> {
        let raw = block.seal();
        self.file
            .write_all_at(&raw, block.header.block_counter as u64 * BLOCK_SIZE as u64)?;
        let header = block.header.clone();
        self.last_block = Some(block.clone());
        self.last_written = Some(block);
        Ok(header)
    }

    /// The write-out policy.  Returns the header as it now stands — sealed
    /// if the block went to disk, hash still zero if it became the tail.
    fn store_block(&mut self, block: DataBlock) -> io::Result<BlockHeader> {
        if let Some(tail) = self.tail.take() {
            if tail.header.block_counter != block.header.block_counter {
                self.write_sealed(tail)?;
            }
            // Same slot: the tail is superseded by the incoming block.
        }
        if block.header.size_in_block == DATA_SIZE as i64 {
            self.write_sealed(block)
        } else {
            let header = block.header.clone();
            self.tail = Some(block);
            Ok(header)
        }
    }

    /// Write the incomplete tail (if any) to disk.
    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(tail) = self.tail.take() {
            self.write_sealed(tail)?;
        }
        Ok(())
    }

    // ── Byte-range read ──────────────────────────────────────────────────────

    /// Read into `buf` at `offset`, clamped to the logical length recorded in
    /// the description.  The buffer is zero-filled first; the return value is
    /// the number of bytes transferred.
    pub fn read(&mut self, offset: i64, buf: &mut [u8]) -> io::Result<usize> {
        if offset < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative offset"));
        }
        let state = self.desc_for_read()?;
        buf.fill(0);
        if buf.is_empty() || offset >= state.logical_len {
            return Ok(0);
        }
        let mut remain = (buf.len() as i64).min(state.logical_len - offset);
        let mut local = offset;
        let mut copied = 0usize;

        let in_off = (local % DATA_SIZE as i64) as usize;
        if in_off != 0 {
            let block = self.read_block(local / DATA_SIZE as i64)?;
            let n = remain.min((DATA_SIZE - in_off) as i64) as usize;
            buf[..n].copy_from_slice(&block.payload[in_off..in_off + n]);
            remain -= n as i64;
            copied += n;
            local += n as i64;
        }
        while remain > 0 {
            let block = self.read_block(local / DATA_SIZE as i64)?;
            let n = remain.min(DATA_SIZE as i64) as usize;
            buf[copied..copied + n].copy_from_slice(&block.payload[..n]);
            remain -= n as i64;
            copied += n;
            local += n as i64;
        }
        Ok(copied)
    }

    // ── Byte-range write ─────────────────────────────────────────────────────

    /// Either reuse the existing block at `counter` (keeping its chain
    /// identity) or assemble a fresh one chained off `prev`.
    fn target_block(
        &mut self,
        counter: i64,
        prev: Option<&BlockHeader>,
        revision: i64,
    ) -> io::Result<DataBlock> {
        if let Some(mut existing) = self.slot_contents(counter)? {
            // A predecessor resealed earlier in this write invalidates the
            // stored back link; refresh it.
            if let Some(p) = prev {
                existing.header.last_hash = p.current_hash;
            }
            return Ok(existing);
        }
        Ok(DataBlock {
            header: chain::data_header(prev, 0, counter, counter * DATA_SIZE as i64, revision),
            payload: [0u8; DATA_SIZE],
        })
    }

    /// Overlay `chunk` at `in_off` within the block at `counter` and hand the
    /// result to the write-out policy.
    fn write_segment(
        &mut self,
        counter: i64,
        in_off: usize,
        chunk: &[u8],
        prev: Option<&BlockHeader>,
        revision: i64,
    ) -> io::Result<BlockHeader> {
        let mut block = self.target_block(counter, prev, revision)?;
        block.payload[in_off..in_off + chunk.len()].copy_from_slice(chunk);
        let size = block.header.size_in_block.max((in_off + chunk.len()) as i64);
        chain::touch(&mut block, size, revision);
        self.store_block(block)
    }

    /// Write `data` at `offset`, splitting it into block slots.  Returns the
    /// full requested size; short writes surface only as errors.
    pub fn write(&mut self, offset: i64, data: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "handle is read-only"));
        }
        if offset < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative offset"));
        }
        if data.is_empty() {
            return Ok(0);
        }
        let revision = self.session_revision()?;

        let mut local = offset;
        let mut consumed = 0usize;
        let mut remain = data.len();

        // Predecessor for hash linking of freshly assembled blocks.  At a
        // block boundary the chain contract requires it; mid-block it only
        // matters when the target slot turns out to be fresh, so a failed
        // load falls back to starting a new chain there.
        let first_counter = local / DATA_SIZE as i64;
        let mut prev: Option<BlockHeader> = None;
        if first_counter > 0 {
            // A pending tail in the predecessor slot has no hash yet; seal it
            // now so the new block links to something verifiable.
            let tail_is_prev = self
                .tail
                .as_ref()
                .map_or(false, |t| t.header.block_counter == first_counter - 1);
            if tail_is_prev {
                self.flush()?;
            }
            if local % DATA_SIZE as i64 == 0 {
                prev = Some(self.read_block(first_counter - 1)?.header);
            } else {
                prev = self.read_block(first_counter - 1).ok().map(|b| b.header);
            }
        }

        let in_off = (local % DATA_SIZE as i64) as usize;
        if in_off != 0 {
            let n = remain.min(DATA_SIZE - in_off);
            let header =
                self.write_segment(first_counter, in_off, &data[..n], prev.as_ref(), revision)?;
            prev = Some(header);
            remain -= n;
            consumed += n;
            local += n as i64;
        }
        while remain > 0 {
            let counter = local / DATA_SIZE as i64;
            let n = remain.min(DATA_SIZE);
            let header = self.write_segment(
                counter,
                0,
                &data[consumed..consumed + n],
                prev.as_ref(),
                revision,
            )?;
            prev = Some(header);
            remain -= n;
            consumed += n;
            local += n as i64;
        }
        Ok(data.len())
    }

    // ── Close-for-write ──────────────────────────────────────────────────────

    /// Flush the tail and append the description block after the last data
    /// block written this session.  A session that completed no writes
    /// leaves the file exactly as it was.
    pub fn finish(&mut self, meta: &FileMeta) -> io::Result<()> {
        if !self.writable {
            return Ok(());
        }
        self.flush()?;
        let last = match &self.last_written {
            Some(b) => b.header.clone(),
            None => return Ok(()),
        };
        let next_revision = match self.desc {
            Some(d) if d.existed => d.revision + 1,
            _ => 1,
        };
        let mut desc = chain::description_for(
            &last,
            meta.path.as_bytes(),
            meta.uid,
            meta.gid,
            meta.mode,
            next_revision,
        );
        let raw = desc.seal();
        self.file
            .write_all_at(&raw, (last.block_counter + 1) as u64 * BLOCK_SIZE as u64)?;
        debug!(
            "description written: rev {} len {} after block {}",
            next_revision, desc.header.offset, last.block_counter
        );
        Ok(())
    }
}
