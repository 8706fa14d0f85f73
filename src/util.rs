//! Utility functions.

use core::ptr::{null_mut, NonNull};

use crate::error::MapError;
use crate::header::{HEADER_SIZE, MAX_CHUNK_SIZE, WORD_ALIGN};

/// Rounds `size` up to the next multiple of [`WORD_ALIGN`]
/// or returns `None` if the result does not fit in a `usize`.
#[inline]
pub(crate) fn align_word(size: usize) -> Option<usize> {
    Some(size.checked_add(WORD_ALIGN - 1)? & !(WORD_ALIGN - 1))
}

/// The largest region that still fits in a single chunk.
pub(crate) const MAX_REGION_SIZE: usize = MAX_CHUNK_SIZE.saturating_add(HEADER_SIZE);

/// Returns the size of the region to map so that a request of `size` bytes
/// (already word aligned) can be served, i.e. `multiplier * (size + HEADER_SIZE)`
/// capped at [`MAX_REGION_SIZE`].
///
/// Fails only when the request itself is too large for a header to describe.
#[inline]
pub(crate) fn growth_size(size: usize, multiplier: usize) -> Result<usize, MapError> {
    let unit = size
        .checked_add(HEADER_SIZE)
        .filter(|_| size <= MAX_CHUNK_SIZE)
        .ok_or(MapError::TooLarge { size })?;
    Ok(unit.saturating_mul(multiplier.max(1)).min(MAX_REGION_SIZE))
}

/// Returns the payload size of two touching chunks fused into one, or `None`
/// if a header could not describe it.
#[inline]
pub(crate) fn merged_size(left: usize, right: usize) -> Option<usize> {
    left.checked_add(HEADER_SIZE)?
        .checked_add(right)
        .filter(|&size| size <= MAX_CHUNK_SIZE)
}

#[inline(always)]
pub(crate) fn raw_ptr<T>(p: Option<NonNull<T>>) -> *mut T {
    p.map_or(null_mut(), |p| p.as_ptr())
}
