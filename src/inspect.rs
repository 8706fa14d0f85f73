//! Read-only views of the chunk directory, used for debugging and tests.
//!
//! Nothing in here mutates chunk metadata. A snapshot taken through
//! [`ChunkMalloc`](crate::ChunkMalloc) is consistent only for the moment its lock was held.

use core::fmt;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use std::io::{self, Write};

use crate::header::{Chunk, HEADER_SIZE};

/// A copy of one chunk header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Address of the header.
    pub addr: usize,
    pub size: usize,
    pub available: bool,
    /// Address of the next header, 0 for the tail.
    pub next: usize,
    /// Address of the previous header, 0 for the head.
    pub prev: usize,
}

impl ChunkInfo {
    /// Reads the header at `chunk`.
    ///
    /// # Safety
    /// `chunk` must point to a valid header.
    pub(crate) unsafe fn read(chunk: *const Chunk) -> Self {
        ChunkInfo {
            addr: chunk as usize,
            size: (*chunk).size(),
            available: (*chunk).is_available(),
            next: (*chunk).next as usize,
            prev: (*chunk).prev as usize,
        }
    }

    /// Address of the first payload byte.
    #[inline]
    pub fn payload(&self) -> usize {
        self.addr + HEADER_SIZE
    }

    /// Address right past the payload.
    #[inline]
    pub fn end(&self) -> usize {
        self.payload() + self.size
    }
}

impl fmt::Display for ChunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ptr: {:#x} size: {} available: {} next: {:#x} prev: {:#x}",
            self.addr, self.size, self.available as u8, self.next, self.prev
        )
    }
}

/// Iterator over the chunk directory, head to tail.
pub struct Chunks<'a> {
    next: *const Chunk,
    _directory: PhantomData<&'a Chunk>,
}

impl<'a> Chunks<'a> {
    /// # Safety
    /// `head` must be null or the head of a consistent directory that
    /// is not mutated for `'a`.
    pub(crate) unsafe fn new(head: *const Chunk) -> Self {
        Chunks {
            next: head,
            _directory: PhantomData,
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<ChunkInfo> {
        if self.next.is_null() {
            return None;
        }
        let info = unsafe { ChunkInfo::read(self.next) };
        self.next = info.next as *const Chunk;
        Some(info)
    }
}

impl FusedIterator for Chunks<'_> {}

/// Aggregate numbers about a heap.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub chunks: usize,
    pub free_chunks: usize,
    /// Payload bytes of free chunks.
    pub free_bytes: usize,
    /// Payload bytes of chunks in use.
    pub used_bytes: usize,
    pub regions: usize,
    /// Bytes formatted into chunks, excluding any rounding done by the mapper.
    pub mapped_bytes: usize,
}

impl HeapStats {
    /// Bytes spent on headers.
    #[inline]
    pub fn header_bytes(&self) -> usize {
        self.chunks * HEADER_SIZE
    }

    pub(crate) fn collect(chunks: Chunks<'_>, regions: usize, mapped_bytes: usize) -> Self {
        chunks.fold(
            HeapStats {
                regions,
                mapped_bytes,
                ..HeapStats::default()
            },
            |mut stats, info| {
                stats.chunks += 1;
                if info.available {
                    stats.free_chunks += 1;
                    stats.free_bytes += info.size;
                } else {
                    stats.used_bytes += info.size;
                }
                stats
            },
        )
    }
}

const SEPARATOR: &str = "-----------------------------------------------------";

/// Writes one block per chunk in the format of the classic `print_list` dump.
pub(crate) fn write_chunks<W: Write>(chunks: Chunks<'_>, out: &mut W) -> io::Result<()> {
    for (i, info) in chunks.enumerate() {
        writeln!(out, "[{i}] ptr: {:#x}", info.addr)?;
        writeln!(out, "[{i}] ptr->size: {}", info.size)?;
        writeln!(out, "[{i}] ptr->available: {}", info.available as u8)?;
        writeln!(out, "[{i}] ptr->next: {:#x}", info.next)?;
        writeln!(out, "[{i}] ptr->prev: {:#x}", info.prev)?;
        writeln!(out, "{SEPARATOR}")?;
    }
    Ok(())
}
