//! Tunables of the allocator.

/// Default number of requests worth of memory mapped per growth.
pub const DEFAULT_MULTIPLIER: usize = 10;

/// Heap configuration.
///
/// Built with `const fn`s so that it can be used in a `static` global allocator:
/// ```
/// use chunk_malloc::{ChunkMalloc, Config, MmapMapper};
///
/// static HEAP: ChunkMalloc<MmapMapper> =
///     ChunkMalloc::with_config(MmapMapper::new(), Config::new().with_multiplier(4));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    multiplier: usize,
}

impl Config {
    #[inline]
    pub const fn new() -> Self {
        Config {
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Sets how many times `requested size + header` gets mapped when the heap grows.
    /// Larger values amortize mapping calls over more future requests.
    /// A multiplier of 0 is treated as 1.
    #[inline]
    pub const fn with_multiplier(mut self, multiplier: usize) -> Self {
        self.multiplier = if multiplier == 0 { 1 } else { multiplier };
        self
    }

    #[inline]
    pub const fn multiplier(&self) -> usize {
        self.multiplier
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
