//! The [`RawChunkMalloc`] and [`ChunkMalloc`] allocators.

pub mod chunk_malloc;
pub mod raw_chunk_malloc;

pub use chunk_malloc::ChunkMalloc;
pub use raw_chunk_malloc::RawChunkMalloc;
