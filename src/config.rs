//! Tuning knobs for a [`Heap`](crate::Heap).

use crate::ptr_utils::{align_up_checked, DSIZE};
use crate::MIN_BLOCK_SIZE;

/// Growth and search policy.
///
/// ```rust
/// # use tagheap::Config;
/// let config = Config::new().with_chunk_size(10_000).with_fit_slack(0);
/// assert_eq!(config.chunk_size(), 10_000);
/// assert_eq!(config.fit_slack(), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Config {
    chunk_size: usize,
    fit_slack: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// How many bytes the arena grows by when no free block fits, at minimum.
    pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;
    /// How close to the requested size a free block must be to end the search early.
    pub const DEFAULT_FIT_SLACK: usize = 256;

    pub const fn new() -> Self {
        Self { chunk_size: Self::DEFAULT_CHUNK_SIZE, fit_slack: Self::DEFAULT_FIT_SLACK }
    }

    /// Set the minimum arena growth.
    ///
    /// This is rounded up to a multiple of 8, and to at least the minimum block size.
    pub const fn with_chunk_size(mut self, bytes: usize) -> Self {
        let bytes = if bytes < MIN_BLOCK_SIZE { MIN_BLOCK_SIZE } else { bytes };

        self.chunk_size = match align_up_checked(bytes, DSIZE) {
            Some(rounded) => rounded,
            None => usize::MAX & !(DSIZE - 1),
        };
        self
    }

    /// Set the fit search's early exit threshold.
    ///
    /// The search stops at the first best candidate that is less than `bytes`
    /// larger than the request. Zero scans the whole free list every time.
    pub const fn with_fit_slack(mut self, bytes: usize) -> Self {
        self.fit_slack = bytes;
        self
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub const fn fit_slack(&self) -> usize {
        self.fit_slack
    }
}
