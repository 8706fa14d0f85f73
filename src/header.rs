//! Defines the [`Chunk`] header and associated constants and functions.

use core::mem::{align_of, size_of};

use static_assertions::const_assert;

pub const HEADER_SIZE: usize = size_of::<Chunk>();
pub const HEADER_ALIGN: usize = align_of::<Chunk>();

/// Every requested size is rounded up to a multiple of this value.
pub const WORD_ALIGN: usize = 8;

/// The largest payload a single chunk can describe.
pub const MAX_CHUNK_SIZE: usize = u32::MAX as usize & !(WORD_ALIGN - 1);

// Payloads start right after their header, so word-aligned headers
// must also produce word-aligned payloads.
const_assert!(HEADER_SIZE % WORD_ALIGN == 0);
const_assert!(HEADER_ALIGN <= WORD_ALIGN);
const_assert!(WORD_ALIGN.is_power_of_two());

const TAG_FREE: u32 = 0x4652_4545;
const TAG_IN_USE: u32 = 0x5553_4544;
const TAG_ABSORBED: u32 = 0;

/// What the integrity tag of a header says about its chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Free,
    InUse,
    /// The header was merged into its previous neighbour and is now payload.
    Absorbed,
    /// The tag matches none of the known values.
    Unknown,
}

/// Metadata placed in front of every chunk payload.
///
/// # Layout
/// The availability of the chunk is kept in `tag`, which holds one of two magic
/// values instead of a plain boolean. A header whose tag is neither value was not
/// produced by the allocator (or was absorbed by a merge) and gets rejected on release.
///
/// `next` and `prev` never own anything: all headers live inside mapped regions
/// and the directory is the only thing that links them.
#[derive(Debug)]
#[repr(C)]
pub struct Chunk {
    size: u32,
    tag: u32,
    pub next: *mut Chunk,
    pub prev: *mut Chunk,
}

impl Chunk {
    /// Writes a fresh header at `at` and returns it.
    ///
    /// # Safety
    /// `at` must be [`HEADER_ALIGN`]-aligned and point to at least
    /// `HEADER_SIZE + size` writable bytes which are not part of any live chunk.
    #[inline]
    pub unsafe fn write(
        at: *mut u8,
        size: usize,
        available: bool,
        prev: *mut Chunk,
        next: *mut Chunk,
    ) -> *mut Chunk {
        debug_assert_eq!(at as usize % HEADER_ALIGN, 0, "Headers must be aligned.");
        debug_assert!(size <= MAX_CHUNK_SIZE);

        let chunk: *mut Chunk = at.cast();
        chunk.write(Chunk {
            size: size as u32,
            tag: if available { TAG_FREE } else { TAG_IN_USE },
            next,
            prev,
        });
        chunk
    }

    /// Recovers the header of the chunk whose payload starts at `payload`.
    ///
    /// This is the only place where payload addresses are turned back into headers.
    #[inline(always)]
    pub fn from_payload(payload: *mut u8) -> *mut Chunk {
        payload.wrapping_sub(HEADER_SIZE).cast()
    }

    /// Returns the first payload byte of `chunk`.
    #[inline(always)]
    pub fn payload(chunk: *mut Chunk) -> *mut u8 {
        chunk.cast::<u8>().wrapping_add(HEADER_SIZE)
    }

    /// Returns the address right after the payload of `chunk`.
    ///
    /// # Safety
    /// `chunk` must point to a valid header.
    #[inline(always)]
    pub unsafe fn end(chunk: *mut Chunk) -> *mut u8 {
        Chunk::payload(chunk).wrapping_add((*chunk).size())
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    #[inline(always)]
    pub fn set_size(&mut self, size: usize) {
        debug_assert!(size <= MAX_CHUNK_SIZE);
        self.size = size as u32;
    }

    #[inline(always)]
    pub fn is_available(&self) -> bool {
        self.tag == TAG_FREE
    }

    #[inline(always)]
    pub fn set_available(&mut self, available: bool) {
        self.tag = if available { TAG_FREE } else { TAG_IN_USE };
    }

    pub fn state(&self) -> State {
        match self.tag {
            TAG_FREE => State::Free,
            TAG_IN_USE => State::InUse,
            TAG_ABSORBED => State::Absorbed,
            _ => State::Unknown,
        }
    }

    /// Scrubs the tag of a header that stopped being a directory entry.
    #[inline(always)]
    pub fn absorb(&mut self) {
        self.tag = TAG_ABSORBED;
        self.size = 0;
    }
}
