//! Boundary adapter — the narrow API a mount-and-dispatch layer consumes.
//!
//! [`FailSafeFs`] owns the root of the underlying tree, the table mapping
//! handle ids to per-open state, and the process-wide mutex serializing
//! every handle-touching operation (`open`, `read`, `write`, `fsync`,
//! `release`).  Getattr-class probes ([`FailSafeFs::stat_logical_size`])
//! issue a single descriptor read and take no lock.
//!
//! The adapter stores the logical path at `open` and stats the underlying
//! file at `release`, so the dispatch layer hands over nothing but the
//! handle id.  Embedders that manage their own metadata can drive
//! [`ContainerHandle`] directly.
//!
//! Truncate is forwarded verbatim to the underlying file; the description
//! block is not rewritten at the new boundary.  This is a recorded format
//! limitation, not an oversight.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use crate::block::{DescriptionBlock, BLOCK_SIZE};
use crate::handle::{ContainerHandle, FileMeta};

struct Entry {
    handle: ContainerHandle,
    logical_path: String,
}

#[derive(Default)]
struct HandleTable {
    next_fh: u64,
    open: HashMap<u64, Entry>,
}

/// The stacking filesystem core over one source directory.
pub struct FailSafeFs {
    root: PathBuf,
    table: Mutex<HandleTable>,
}

impl FailSafeFs {
    /// Bind to the source directory.  Fails unless `root` is a directory.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("source {} is not a directory", root.display()),
            ));
        }
        Ok(Self { root, table: Mutex::new(HandleTable::default()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path to the underlying tree.
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandleTable> {
        // Lock poisoning only happens if a holder panicked; the table itself
        // is still structurally sound, so keep serving.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Guarded operations ───────────────────────────────────────────────────

    /// Open a container file, returning an opaque handle id.
    pub fn open(&self, path: &str, writable: bool) -> io::Result<u64> {
        let mut table = self.lock();
        let handle = ContainerHandle::open(&self.resolve(path), writable)?;
        let fh = table.next_fh;
        table.next_fh += 1;
        table.open.insert(fh, Entry { handle, logical_path: path.to_owned() });
        debug!("open {path} writable={writable} -> fh {fh}");
        Ok(fh)
    }

    /// Read at `offset`, clamped to the logical length.
    pub fn read(&self, fh: u64, offset: i64, buf: &mut [u8]) -> io::Result<usize> {
        let mut table = self.lock();
        let entry = table.open.get_mut(&fh).ok_or_else(stale_handle)?;
        entry.handle.read(offset, buf)
    }

    /// Write at `offset`.  Returns the full requested size on success.
    pub fn write(&self, fh: u64, offset: i64, data: &[u8]) -> io::Result<usize> {
        let mut table = self.lock();
        let entry = table.open.get_mut(&fh).ok_or_else(stale_handle)?;
        entry.handle.write(offset, data)
    }

    /// Flush the pending tail block of a write handle.
    pub fn fsync(&self, fh: u64) -> io::Result<()> {
        let mut table = self.lock();
        let entry = table.open.get_mut(&fh).ok_or_else(stale_handle)?;
        if entry.handle.is_writable() {
            entry.handle.flush()?;
        }
        Ok(())
    }

    /// Close a handle.  For write handles this flushes the tail and appends
    /// the description block recording path, ownership, mode, and logical
    /// length; read handles just drop their caches.
    pub fn release(&self, fh: u64) -> io::Result<()> {
        let mut table = self.lock();
        let mut entry = table.open.remove(&fh).ok_or_else(stale_handle)?;
        if entry.handle.is_writable() {
            let st = fs::metadata(self.resolve(&entry.logical_path))?;
            let meta = FileMeta {
                path: entry.logical_path.clone(),
                uid: st.uid() as i64,
                gid: st.gid() as i64,
                mode: st.mode() as i64,
            };
            entry.handle.finish(&meta)?;
        }
        debug!("release fh {fh} ({})", entry.logical_path);
        Ok(())
    }

    // ── Unguarded probes ─────────────────────────────────────────────────────

    /// Logical size of a container file plus the underlying metadata.
    ///
    /// Regular files report the `offset` field of the trailing description;
    /// a file no larger than one block has logical length zero.  Anything
    /// that is not a regular file passes through untouched.
    pub fn stat_logical_size(&self, path: &str) -> io::Result<(u64, fs::Metadata)> {
        let local = self.resolve(path);
        let st = fs::metadata(&local)?;
        if !st.is_file() || st.len() <= BLOCK_SIZE as u64 {
            let len = if st.is_file() { 0 } else { st.len() };
            return Ok((len, st));
        }
        let file = fs::File::open(&local)?;
        let mut raw = [0u8; BLOCK_SIZE];
        file.read_exact_at(&mut raw, st.len() - BLOCK_SIZE as u64)?;
        let desc = DescriptionBlock::decode(&raw)?;
        Ok((desc.header.offset.max(0) as u64, st))
    }

    /// Truncate pass-through.  The container format has no truncate
    /// protocol; the description left mid-file is only reachable by the
    /// scanner afterwards.
    pub fn truncate(&self, path: &str, size: u64) -> io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(self.resolve(path))?;
        file.set_len(size)
    }
}

fn stale_handle() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "unknown file handle")
}
