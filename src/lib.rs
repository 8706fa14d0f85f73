//! A thread-safe, first-fit chunk allocator on top of `mmap`.
//!
//! # Usage
//! The heap is an explicit value. It can serve requests directly:
//! ```
//! use chunk_malloc::{status_code, ChunkMalloc};
//!
//! let heap = ChunkMalloc::new();
//! let p = heap.allocate(100);
//! assert!(!p.is_null());
//! assert_eq!(p as usize % 8, 0);
//! assert_eq!(status_code(unsafe { heap.release(p) }), 0);
//! assert_eq!(status_code(unsafe { heap.release(core::ptr::null_mut()) }), 1);
//! ```
//! or be installed as the global allocator:
//! ```
//! use chunk_malloc::{ChunkMalloc, MmapMapper};
//!
//! #[global_allocator]
//! static ALLOCATOR: ChunkMalloc<MmapMapper> = ChunkMalloc::new();
//!
//! fn main() {
//!     let v: Vec<u32> = vec![1, 2, 3];
//!     println!("Chunks are cool {:?}", v);
//! }
//! ```
//!
//! # Allocators
//! Two allocators are exported by this crate - [`RawChunkMalloc`] and [`ChunkMalloc`].
//! [`RawChunkMalloc`] is single threaded and takes `&mut self`,
//! [`ChunkMalloc`] puts it behind a `Mutex` so that any number of threads can share one heap.
//! All operations are serialized, including the ones that have to ask the OS for memory.
//!
//! # Mode of operation
//! ## Chunks
//! The managed memory is divided into chunks. Each chunk starts with a header holding its
//! payload size, whether it is free or in use, and links to the previous and next chunk.
//! The payload handed to callers follows the header directly, so releasing a pointer
//! finds its header by stepping back [`HEADER_SIZE`] bytes.
//!
//! ## The directory
//! All chunks form one doubly linked list which, inside a mapped region, follows address
//! order and covers the region without gaps. Allocation walks this list from the head and
//! takes the first free chunk that can hold the request *and* the header of a remainder chunk.
//! The chunk is then split: the front part becomes the allocation, the rest stays free.
//!
//! ## Growth
//! When no chunk fits, a new region of `multiplier * (size + HEADER_SIZE)` bytes is requested
//! from the heap's [`Mapper`] (10 times by default, see [`Config`]), appended after the last
//! chunk visited by the search and split like any other chunk. Over-mapping amortizes the cost
//! of system calls across many small requests. Regions are never returned to the OS.
//!
//! ## Coalescing
//! On release the chunk is marked free and merged with its next neighbour, then with its
//! previous neighbour, whenever these are free and physically touch it. Hence no two
//! adjacent chunks are ever free at the same time.
//!
//! ## Misuse
//! Headers carry a tag which tells in-use chunks, free chunks and absorbed headers apart.
//! Releasing a null pointer, a chunk that is already free or a pointer without a valid
//! header is reported as a [`ReleaseError`] and leaves the heap untouched. The check is
//! best-effort: arbitrary memory can still look like a header.
//!
//! ## Diagnostics
//! [`ChunkMalloc::print_chunks`], [`ChunkMalloc::for_each_chunk`] and [`ChunkMalloc::stats`]
//! read the directory without modifying it.
//!
//! [`RawChunkMalloc`]: allocators::RawChunkMalloc
//! [`ChunkMalloc`]: allocators::ChunkMalloc
//! [`Mapper`]: mappers::Mapper

pub use crate::allocators::{ChunkMalloc, RawChunkMalloc};
pub use crate::config::Config;
pub use crate::error::{status_code, MapError, ReleaseError, STATUS_OK, STATUS_REJECTED};
pub use crate::header::{HEADER_SIZE, WORD_ALIGN};
pub use crate::inspect::{ChunkInfo, Chunks, HeapStats};
pub use crate::mappers::{Mapper, MmapMapper, Region};

pub mod allocators;
pub mod config;
pub mod error;
mod header;
pub mod inspect;
pub mod mappers;
mod util;
