//! A multithreaded chunk allocator.

use crate::allocators::RawChunkMalloc;
use crate::config::Config;
use crate::error::ReleaseError;
use crate::header::WORD_ALIGN;
use crate::inspect::{write_chunks, ChunkInfo, HeapStats};
use crate::mappers::{Mapper, MmapMapper};

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::null_mut;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::error;

/// A multithreaded chunk allocator.
///
/// This allocator is a `Mutex` wrapper over [`RawChunkMalloc`]. Every operation,
/// including the mapping calls made while growing, holds the lock for its whole duration.
pub struct ChunkMalloc<M: Mapper> {
    inner: Mutex<RawChunkMalloc<M>>,
}

impl ChunkMalloc<MmapMapper> {
    /// Creates an `mmap`-backed heap with the default [`Config`].
    pub const fn new() -> Self {
        ChunkMalloc::with_mapper(MmapMapper::new())
    }
}

impl Default for ChunkMalloc<MmapMapper> {
    fn default() -> Self {
        ChunkMalloc::new()
    }
}

impl<M: Mapper> ChunkMalloc<M> {
    pub const fn with_mapper(mapper: M) -> Self {
        ChunkMalloc::with_config(mapper, Config::new())
    }

    pub const fn with_config(mapper: M, config: Config) -> Self {
        ChunkMalloc {
            inner: Mutex::new(RawChunkMalloc::with_config(mapper, config)),
        }
    }

    // Nothing panics while the directory is half updated, so a poisoned
    // lock still guards a consistent heap.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, RawChunkMalloc<M>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates at least `size` bytes, word aligned. Returns null when out of memory.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.lock().allocate(size)
    }

    /// Releases a payload returned by [`allocate`](ChunkMalloc::allocate).
    /// Use [`status_code`](crate::status_code) to get the numeric `0`/`1` status.
    ///
    /// # Safety
    /// See [`RawChunkMalloc::release`].
    pub unsafe fn release(&self, ptr: *mut u8) -> Result<(), ReleaseError> {
        self.lock().release(ptr)
    }

    /// Calls `f` on every chunk, head to tail, while holding the lock.
    ///
    /// `f` must not allocate from this heap: the lock is not reentrant.
    pub fn for_each_chunk<F: FnMut(ChunkInfo)>(&self, f: F) {
        self.lock().chunks().for_each(f)
    }

    pub fn stats(&self) -> HeapStats {
        self.lock().stats()
    }

    /// Dumps the directory to `out`, one block per chunk.
    ///
    /// Like [`for_each_chunk`](ChunkMalloc::for_each_chunk) this holds the lock,
    /// so `out` must not allocate from this heap.
    pub fn print_chunks<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write_chunks(self.lock().chunks(), out)
    }

    /// Gives locked access to the underlying single threaded heap.
    pub fn with_raw<R, F: FnOnce(&mut RawChunkMalloc<M>) -> R>(&self, f: F) -> R {
        f(&mut self.lock())
    }
}

//---------------impl GlobalAlloc for ChunkMalloc---------------//

// Layouts aligned beyond WORD_ALIGN are served from an over-sized chunk: the payload
// is shifted up to the requested alignment and the original payload address is
// stored in the word right in front of it.
unsafe impl<M: Mapper> GlobalAlloc for ChunkMalloc<M> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= WORD_ALIGN {
            return self.allocate(layout.size());
        }

        let Some(padded) = layout.size().checked_add(layout.align()) else {
            return null_mut();
        };
        let base = self.allocate(padded);
        if base.is_null() {
            return base;
        }

        let shifted = base.add(size_of::<usize>());
        let aligned = shifted.add(shifted.align_offset(layout.align()));
        aligned.cast::<*mut u8>().sub(1).write(base);
        aligned
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let base = if layout.align() <= WORD_ALIGN {
            ptr
        } else {
            ptr.cast::<*mut u8>().sub(1).read()
        };
        if let Err(err) = self.release(base) {
            error!(%err, ?layout, "Rejected deallocation.");
        }
    }
}
