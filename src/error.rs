//! Error types returned by mappers and by [`release`](crate::ChunkMalloc::release).

use std::io;

use thiserror::Error;

/// Status code of a successful release.
pub const STATUS_OK: u32 = 0;
/// Status code of a rejected release.
pub const STATUS_REJECTED: u32 = 1;

/// Why a mapper could not hand out a region.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("refusing to map an empty region")]
    ZeroSize,
    #[error("a region for a {size} byte request cannot be described by a chunk header")]
    TooLarge { size: usize },
    #[error("arena exhausted: {requested} bytes requested but only {remaining} left")]
    Exhausted { requested: usize, remaining: usize },
    #[error("mmap failed: {0}")]
    Os(#[source] io::Error),
}

/// Why a pointer was not released.
///
/// None of these leave a mark on the heap: a rejected release changes nothing.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum ReleaseError {
    #[error("cannot release a null pointer")]
    Null,
    #[error("chunk at {addr:#x} was already released")]
    AlreadyReleased { addr: usize },
    #[error("no valid chunk header in front of {addr:#x}")]
    Corrupted { addr: usize },
}

impl ReleaseError {
    /// The numeric status reported for this error, always [`STATUS_REJECTED`].
    #[inline]
    pub const fn status(&self) -> u32 {
        STATUS_REJECTED
    }
}

/// Collapses a release result into its numeric status code.
#[inline]
pub fn status_code(result: Result<(), ReleaseError>) -> u32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(err) => err.status(),
    }
}
