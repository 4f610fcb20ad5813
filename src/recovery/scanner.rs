//! The sliding-window sweep.
//!
//! # How it works
//!
//! The scanner keeps a three-slot buffer: one 4096-byte stripe of already
//! seen bytes, the stripe currently being searched, and a slot of lookahead
//! so a signature found at the very end of the stripe still has a complete
//! 4096-byte record behind it.  Each iteration slides the buffer one stripe
//! and refills from the stream.
//!
//! Within a stripe every byte position is a candidate: an 8-byte signature
//! compare, and on a match the following 4096 bytes are decoded as a
//! description and put through the full consistency check (signature,
//! version, hash).  Stripes partition the stream, so each position is
//! examined exactly once and no record is reported twice.  Alignment is
//! irrelevant by construction — blocks torn off their 4096-byte device
//! boundaries are found all the same.
//!
//! A failed check skips the candidate and the sweep continues; corruption
//! is never fatal.  Only genuine I/O errors end the iteration with an
//! error item.

use std::collections::VecDeque;
use std::io::{self, Read};

use log::debug;

use crate::block::{is_description_candidate, DescriptionBlock, BLOCK_SIZE};

use super::RecoveredFile;

const STRIPE: usize = BLOCK_SIZE;
const BUF_SIZE: usize = 3 * BLOCK_SIZE;

/// Streaming sweep over any `Read` source, yielding recovered records in
/// stream order.
pub struct Scanner<R> {
    reader: R,
    buf: Vec<u8>,
    /// Bytes of `buf` holding stream content (the first stripe counts even
    /// before any read; it starts as the zeroed no-predecessor slot).
    valid: usize,
    /// Absolute stream offset of the stripe under search.
    pos: u64,
    primed: bool,
    done: bool,
    pending: VecDeque<RecoveredFile>,
}

impl<R: Read> Scanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0u8; BUF_SIZE],
            valid: STRIPE,
            pos: 0,
            primed: false,
            done: false,
            pending: VecDeque::new(),
        }
    }

    /// Top up the buffer from the stream; a short read only means EOF is
    /// near, never failure.
    fn fill(&mut self) -> io::Result<()> {
        while self.valid < BUF_SIZE {
            let n = self.reader.read(&mut self.buf[self.valid..])?;
            if n == 0 {
                break;
            }
            self.valid += n;
        }
        Ok(())
    }

    /// Check every candidate position of the current stripe.
    fn scan_stripe(&mut self) {
        let limit = self.valid.min(2 * STRIPE);
        for r in STRIPE..limit {
            if !is_description_candidate(&self.buf[..self.valid], r) {
                continue;
            }
            let absolute = self.pos + (r - STRIPE) as u64;
            if r + BLOCK_SIZE > self.valid {
                debug!("signature at {absolute} truncated by end of stream");
                continue;
            }
            let raw: &[u8; BLOCK_SIZE] = self.buf[r..r + BLOCK_SIZE].try_into().unwrap();
            match DescriptionBlock::decode(raw) {
                Ok(desc) => {
                    self.pending
                        .push_back(RecoveredFile::from_description(absolute, &desc));
                }
                Err(e) => debug!("candidate at {absolute} rejected: {e}"),
            }
        }
    }
}

impl<R: Read> Iterator for Scanner<R> {
    type Item = io::Result<RecoveredFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(rec) = self.pending.pop_front() {
                return Some(Ok(rec));
            }
            if self.done {
                return None;
            }
            if self.primed {
                self.buf.copy_within(STRIPE..self.valid, 0);
                self.valid -= STRIPE;
                self.pos += STRIPE as u64;
            } else {
                self.primed = true;
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
            if self.valid <= STRIPE {
                self.done = true;
                continue;
            }
            self.scan_stripe();
        }
    }
}
