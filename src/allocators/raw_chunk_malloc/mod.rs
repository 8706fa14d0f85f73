//! A singlethreaded chunk allocator.
//!
// For a general view of the allocator's operational semantics
// see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## The directory
// Every chunk header of every mapped region is linked into one list. Inside a region
// the list follows address order, so the byte after a chunk's payload is the header of
// its `next`. Regions are appended in growth order, which need not be address order,
// hence merges check that the two chunks actually touch before fusing them.
//
// Two touching free chunks stay apart when their union would exceed `MAX_CHUNK_SIZE`.
// A region is never larger than one chunk, so this only happens across regions
// that the mapper placed back to back.
//
// ## Sizes
// Requested sizes are rounded up to `WORD_ALIGN`. Regions are a multiple of
// `HEADER_SIZE + requested`, so every header created by a split or a growth stays
// word aligned as well.

use crate::config::Config;
use crate::error::{MapError, ReleaseError};
use crate::header::{Chunk, State, HEADER_SIZE, MAX_CHUNK_SIZE, WORD_ALIGN};
use crate::inspect::{ChunkInfo, Chunks, HeapStats};
use crate::mappers::Mapper;
use crate::util::{align_word, growth_size, merged_size, raw_ptr};

use core::fmt::{self, Debug};
use core::ptr::{null_mut, NonNull};

use tracing::{debug, error, instrument, Level};

/// A single threaded chunk allocator.
///
/// Use [`ChunkMalloc`](crate::ChunkMalloc) to share a heap between threads.
pub struct RawChunkMalloc<M: Mapper> {
    head: *mut Chunk,
    /// Tail-most chunk seen by the last unsuccessful search. Only a growth hint.
    last_visited: *mut Chunk,
    mapper: M,
    config: Config,
    regions: usize,
    mapped_bytes: usize,
}

// All headers are owned by the directory and only reachable through it.
unsafe impl<M: Mapper + Send> Send for RawChunkMalloc<M> {}

impl<M: Mapper> Debug for RawChunkMalloc<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawChunkMalloc")
            .field("head", &self.head)
            .field("last_visited", &self.last_visited)
            .field("config", &self.config)
            .field("regions", &self.regions)
            .field("mapped_bytes", &self.mapped_bytes)
            .finish()
    }
}

impl<M: Mapper> RawChunkMalloc<M> {
    /// Creates an empty heap. Nothing is mapped until the first allocation.
    pub const fn with_config(mapper: M, config: Config) -> Self {
        RawChunkMalloc {
            head: null_mut(),
            last_visited: null_mut(),
            mapper,
            config,
            regions: 0,
            mapped_bytes: 0,
        }
    }

    pub const fn with_mapper(mapper: M) -> Self {
        Self::with_config(mapper, Config::new())
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Allocates at least `size` bytes and returns the payload address,
    /// or null if the heap could not grow.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        raw_ptr(self.__allocate(size).ok())
    }

    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(level = Level::ERROR))]
    fn __allocate(&mut self, size: usize) -> Result<NonNull<u8>, MapError> {
        let size = align_word(size)
            .filter(|&size| size <= MAX_CHUNK_SIZE)
            .ok_or(MapError::TooLarge { size })?;
        debug!(aligned_size = size, "Size aligned.");

        let chunk = unsafe {
            if self.head.is_null() {
                debug!("Empty directory, mapping the first region.");
                let chunk = self.increase_allocation(null_mut(), size)?;
                self.head = chunk;
                chunk
            } else {
                match self.find_chunk(self.head, size) {
                    Some(chunk) => {
                        let chunk = chunk.as_ptr();
                        debug!(?chunk, "Found free chunk to accomodate request.");
                        // A match always has room for the remainder header.
                        self.split_chunk(chunk, size);
                        chunk
                    }
                    None => {
                        debug!("No free chunk fits, requesting heap growth.");
                        self.increase_allocation(self.last_visited, size)?
                    }
                }
            }
        };

        debug_assert_eq!(Chunk::payload(chunk) as usize % WORD_ALIGN, 0);
        Ok(unsafe { NonNull::new_unchecked(Chunk::payload(chunk)) })
    }

    /// Gives the chunk holding `payload` back to the heap and merges it with free neighbours.
    ///
    /// Null pointers, pointers whose header carries no valid tag and chunks that are
    /// already free are rejected without touching the directory.
    ///
    /// # Safety
    /// `payload` must be null or point at least [`HEADER_SIZE`] bytes into readable memory.
    /// Pointers that were not returned by [`allocate`](RawChunkMalloc::allocate) on this
    /// heap can still forge a valid tag, in which case the directory gets corrupted.
    #[instrument(level = "info", skip(self), err(level = Level::ERROR))]
    pub unsafe fn release(&mut self, payload: *mut u8) -> Result<(), ReleaseError> {
        if payload.is_null() {
            return Err(ReleaseError::Null);
        }
        let addr = payload as usize;
        if addr % WORD_ALIGN != 0 || addr < HEADER_SIZE {
            return Err(ReleaseError::Corrupted { addr });
        }

        let chunk = Chunk::from_payload(payload);
        match (*chunk).state() {
            State::InUse => {}
            State::Free => return Err(ReleaseError::AlreadyReleased { addr }),
            State::Absorbed | State::Unknown => return Err(ReleaseError::Corrupted { addr }),
        }

        (*chunk).set_available(true);
        self.merge_chunk_next(chunk);
        self.merge_chunk_prev(chunk);
        Ok(())
    }

    /// Returns the first free chunk, starting from `start`, that can hold `size` bytes
    /// plus the header of a remainder chunk, or `None` if the tail is reached.
    /// Every chunk passed over is recorded as the growth hint.
    ///
    /// # Safety
    /// `start` must be null or a chunk of this directory.
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG))]
    unsafe fn find_chunk(&mut self, start: *mut Chunk, size: usize) -> Option<NonNull<Chunk>> {
        let needed = size + HEADER_SIZE;
        let mut p = start;

        while !p.is_null() {
            if (*p).is_available() && (*p).size() >= needed {
                return NonNull::new(p);
            }
            self.last_visited = p;
            p = (*p).next;
        }

        None
    }

    /// Carves `chunk` into an in-use chunk of exactly `size` bytes followed by
    /// a free remainder chunk linked right after it.
    ///
    /// # Safety
    /// `chunk` must be a chunk of this directory with `size() >= size + HEADER_SIZE`.
    /// Anything smaller leaves a remainder header overlapping the next chunk.
    #[instrument(level = "debug", skip(self))]
    unsafe fn split_chunk(&mut self, chunk: *mut Chunk, size: usize) {
        debug_assert!(
            (*chunk).size() >= size + HEADER_SIZE,
            "Splitting a chunk without room for the remainder header."
        );

        let remainder_size = (*chunk).size() - size - HEADER_SIZE;
        let remainder = Chunk::write(
            Chunk::payload(chunk).add(size),
            remainder_size,
            true,
            chunk,
            (*chunk).next,
        );
        if !(*remainder).next.is_null() {
            (*(*remainder).next).prev = remainder;
        }

        (*chunk).set_size(size);
        (*chunk).set_available(false);
        (*chunk).next = remainder;

        debug!(?chunk, ?remainder, remainder_size, "Split chunk.");
    }

    /// Maps a new region worth `multiplier * (size + HEADER_SIZE)` bytes, or the largest region
    /// a single chunk can describe if that is smaller. Formats it as one
    /// in-use chunk appended after `tail` and splits off whatever the request does not need.
    /// Returns the in-use chunk.
    ///
    /// # Safety
    /// `tail` must be null (empty directory) or the last chunk of this directory.
    #[instrument(level = "debug", skip(self), err(level = Level::ERROR))]
    unsafe fn increase_allocation(
        &mut self,
        tail: *mut Chunk,
        size: usize,
    ) -> Result<*mut Chunk, MapError> {
        debug_assert!(tail.is_null() || (*tail).next.is_null());

        let region_size = growth_size(size, self.config.multiplier())?;
        let region = self
            .mapper
            .map(region_size)
            .inspect_err(|err| error!(%err, region_size, "Growth failure, no memory."))?;
        debug!(?region, region_size, "Heap growth successful.");

        let chunk = Chunk::write(
            region.start.as_ptr(),
            region_size - HEADER_SIZE,
            false,
            tail,
            null_mut(),
        );
        if !tail.is_null() {
            (*tail).next = chunk;
        }
        self.regions += 1;
        self.mapped_bytes += region_size;

        if (*chunk).size() >= size + HEADER_SIZE {
            self.split_chunk(chunk, size);
        }
        Ok(chunk)
    }

    /// Absorbs the successor of `freed` if it is free and physically adjacent.
    ///
    /// # Safety
    /// `freed` must be a chunk of this directory.
    #[instrument(level = "debug", skip(self))]
    unsafe fn merge_chunk_next(&mut self, freed: *mut Chunk) {
        let next = (*freed).next;
        if next.is_null() || !(*next).is_available() || Chunk::end(freed) != next.cast() {
            return;
        }
        let Some(size) = merged_size((*freed).size(), (*next).size()) else {
            debug!("Merged chunk would be too large, skipping.");
            return;
        };

        (*freed).set_size(size);
        (*freed).next = (*next).next;
        if !(*next).next.is_null() {
            (*(*next).next).prev = freed;
        }
        (*next).absorb();

        debug!(?freed, ?next, merged_size = size, "Merged with next chunk.");
    }

    /// Absorbs `freed` into its predecessor if that one is free and physically adjacent.
    ///
    /// # Safety
    /// `freed` must be a chunk of this directory.
    #[instrument(level = "debug", skip(self))]
    unsafe fn merge_chunk_prev(&mut self, freed: *mut Chunk) {
        let prev = (*freed).prev;
        if prev.is_null() || !(*prev).is_available() || Chunk::end(prev) != freed.cast() {
            return;
        }
        let Some(size) = merged_size((*prev).size(), (*freed).size()) else {
            debug!("Merged chunk would be too large, skipping.");
            return;
        };

        (*prev).set_size(size);
        (*prev).next = (*freed).next;
        if !(*freed).next.is_null() {
            (*(*freed).next).prev = prev;
        }
        (*freed).absorb();

        debug!(?prev, ?freed, merged_size = size, "Merged with previous chunk.");
    }

    /// Walks the directory from head to tail.
    pub fn chunks(&self) -> Chunks<'_> {
        unsafe { Chunks::new(self.head) }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats::collect(self.chunks(), self.regions, self.mapped_bytes)
    }

    /// Returns the header of the chunk at the head of the directory, if any.
    pub fn head(&self) -> Option<ChunkInfo> {
        self.chunks().next()
    }
}

#[cfg(test)]
mod tests;
