//! [`Mapper`] trait and structures that implement it.
//!
//! The [`Mapper`] trait is where the allocator gets its raw memory from.
//! [`ChunkMalloc`](crate::ChunkMalloc) is generic over it, so the OS-backed
//! [`MmapMapper`] can be swapped for anything that hands out fresh zeroed regions.

use core::ptr::{null_mut, NonNull};
use std::io;

use tracing::{debug, instrument, Level};

use crate::error::MapError;
use crate::header::HEADER_ALIGN;

/// A block of memory handed out by a [`Mapper`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub start: NonNull<u8>,
    /// The mapped length, which may exceed the requested size.
    pub len: usize,
}

/// A source of fresh memory regions.
///
/// # Safety
/// Implementors must return regions that are [`HEADER_ALIGN`]-aligned, zero-initialized,
/// readable and writable, at least as long as requested, disjoint from every other region
/// they returned, and valid until the process exits. Regions are never given back.
pub unsafe trait Mapper {
    /// Maps a new region of at least `size` bytes.
    ///
    /// # Safety
    /// Callers become the sole owners of the returned region.
    unsafe fn map(&mut self, size: usize) -> Result<Region, MapError>;
}

/// A mapper that reserves anonymous private pages with [`libc::mmap`].
///
/// Pages are mapped without reserving swap, so a large region only costs
/// the pages that are actually touched.
#[derive(Debug, Default)]
pub struct MmapMapper {
    _private: (),
}

impl MmapMapper {
    #[inline(always)]
    pub const fn new() -> Self {
        MmapMapper { _private: () }
    }

    /// Returns the page granularity the kernel rounds mappings up to.
    pub fn page_size() -> usize {
        match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as usize,
            _ => 4096,
        }
    }
}

unsafe impl Mapper for MmapMapper {
    #[instrument(level = "debug", ret(level = Level::DEBUG), err(level = Level::ERROR))]
    unsafe fn map(&mut self, size: usize) -> Result<Region, MapError> {
        if size == 0 {
            return Err(MapError::ZeroSize);
        }
        let len = size
            .checked_next_multiple_of(Self::page_size())
            .ok_or(MapError::TooLarge { size })?;

        let p = libc::mmap(
            null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
            -1,
            0,
        );
        if p == libc::MAP_FAILED {
            return Err(MapError::Os(io::Error::last_os_error()));
        }
        debug!(?p, len, "Mapped anonymous pages.");

        let start = NonNull::new(p.cast::<u8>())
            .ok_or_else(|| MapError::Os(io::Error::last_os_error()))?;
        debug_assert_eq!(start.as_ptr() as usize % HEADER_ALIGN, 0);
        Ok(Region { start, len })
    }
}

unsafe impl<T: Mapper + ?Sized> Mapper for &mut T {
    unsafe fn map(&mut self, size: usize) -> Result<Region, MapError> {
        (**self).map(size)
    }
}
