//! Track allocation counters for a [`Heap`](crate::Heap).

use crate::source::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Counters {
    /// Number of active allocations.
    pub allocation_count: usize,
    /// Total number of allocations.
    pub total_allocation_count: u64,

    /// Sum of active allocations' block sizes, metadata included.
    pub allocated_bytes: usize,
    /// Sum of all allocations' block sizes, metadata included.
    pub total_allocated_bytes: u64,

    /// Sum of the free blocks' sizes.
    pub free_bytes: usize,
    /// Number of free blocks.
    pub fragment_count: usize,

    /// Number of bytes obtained from the source.
    pub arena_bytes: usize,
    /// Number of times the arena was grown, including initialization.
    pub extend_count: u64,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            allocation_count: 0,
            total_allocation_count: 0,
            allocated_bytes: 0,
            total_allocated_bytes: 0,
            free_bytes: 0,
            fragment_count: 0,
            arena_bytes: 0,
            extend_count: 0,
        }
    }

    /// Returns the number of arena bytes that are neither free nor allocated:
    /// the sentinel blocks, and anything abandoned by re-initialization.
    pub const fn overhead_bytes(&self) -> usize {
        self.arena_bytes - self.free_bytes - self.allocated_bytes
    }

    /// Returns the total number of allocated bytes freed.
    pub const fn total_freed_bytes(&self) -> u64 {
        self.total_allocated_bytes - self.allocated_bytes as u64
    }

    pub(crate) fn account_register_gap(&mut self, size: usize) {
        self.free_bytes += size;
        self.fragment_count += 1;
    }
    pub(crate) fn account_deregister_gap(&mut self, size: usize) {
        self.free_bytes -= size;
        self.fragment_count -= 1;
    }
    pub(crate) fn account_grow_gap(&mut self, additional: usize) {
        self.free_bytes += additional;
    }

    pub(crate) fn account_alloc(&mut self, block_size: usize) {
        self.allocation_count += 1;
        self.allocated_bytes += block_size;

        self.total_allocation_count += 1;
        self.total_allocated_bytes += block_size as u64;
    }

    pub(crate) fn account_dealloc(&mut self, block_size: usize) {
        self.allocation_count -= 1;
        self.allocated_bytes -= block_size;
    }

    pub(crate) fn account_extend(&mut self, size: usize) {
        self.arena_bytes += size;
        self.extend_count += 1;
    }

    /// Forget the live state but keep lifetime totals. Used by re-initialization.
    pub(crate) fn account_reinit(&mut self) {
        self.allocation_count = 0;
        self.allocated_bytes = 0;
        self.free_bytes = 0;
        self.fragment_count = 0;
    }
}

impl<S: Source> super::Heap<S> {
    pub fn get_counters(&self) -> &Counters {
        &self.counters
    }
}
