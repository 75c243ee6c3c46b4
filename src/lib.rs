#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), no_std)]

#[cfg(feature = "counters")]
mod counters;
#[cfg(feature = "lock_api")]
mod locked;

mod config;
mod llist;
mod ptr_utils;
mod source;
mod span;
mod tag;
mod verify;

pub use config::Config;
#[cfg(feature = "counters")]
pub use counters::Counters;
#[cfg(feature = "lock_api")]
pub use locked::LockedHeap;
pub use ptr_utils::ALIGNMENT;
pub use source::{Brk, Source};
pub use span::Span;
pub use tag::Tag;
pub use verify::Finding;

use llist::FreeList;
use ptr_utils::{align_up_checked, DSIZE, WSIZE};
use tag::Block;

use core::ptr::{null_mut, NonNull};

// Allocated block (8 bytes of overhead):
//   | HEADER: Tag | payload ............................. | FOOTER: Tag |
// Free block (16 bytes minimum):
//   | HEADER: Tag | NEXT: i32 | PREV: i32 | ??? ......... | FOOTER: Tag |
//                 ^ block pointer, 8-byte aligned
//
// The arena:
//   | pad | 8/a : 8/a | block | block | ... | block | 0/a |
//         ^ prologue                                 ^ epilogue header
//
// The header and footer of a block are always identical, which allows walking
// backwards through the arena. No two free blocks are ever adjacent.

/// Smallest block that can hold a header, two free list links, and a footer.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Bytes requested by `init` for the padding and sentinel blocks.
const SENTINELS_SIZE: usize = 4 * WSIZE;

/// Tags are 32 bits wide and free list links are signed 32 bit offsets,
/// so the arena can't grow beyond what a link can span.
pub const MAX_ARENA_SIZE: usize = i32::MAX as usize & !(DSIZE - 1);

/// Why the heap could not do what was asked of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapError {
    /// The source could not supply the sentinel blocks and first chunk.
    InitFailed,
    /// The source could not grow the arena any further.
    OutOfMemory,
}

impl core::fmt::Display for HeapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HeapError::InitFailed => f.write_str("heap initialization failed"),
            HeapError::OutOfMemory => f.write_str("out of memory"),
        }
    }
}

/// Returns the block size needed to hold a `size` byte payload,
/// or `None` if it can't be represented.
#[inline]
pub const fn required_block_size(size: usize) -> Option<usize> {
    if size <= DSIZE {
        Some(MIN_BLOCK_SIZE)
    } else {
        match size.checked_add(DSIZE) {
            Some(size) => align_up_checked(size, DSIZE),
            None => None,
        }
    }
}

/// A boundary-tag allocator over a single arena obtained from a [`Source`].
///
/// Construct with `new` or `with_config`, then call [`init`](Heap::init),
/// or let the first [`malloc`](Heap::malloc) do it.
///
/// Every instance is independent. Nothing here is synchronized; see
/// [`lock`](Heap::lock) for sharing a heap between threads.
pub struct Heap<S: Source> {
    source: S,

    config: Config,

    /// The prologue's block pointer, or null if uninitialized.
    prologue: *mut u8,

    free_list: FreeList,

    #[cfg(feature = "counters")]
    counters: counters::Counters,
}

unsafe impl<S: Source + Send> Send for Heap<S> {}

impl<S: Source + core::fmt::Debug> core::fmt::Debug for Heap<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heap")
            .field("source", &self.source)
            .field("config", &self.config)
            .field("arena", &self.arena())
            .field("prologue", &self.prologue)
            .field("free_list_head", &self.free_list.head())
            .finish()
    }
}

impl<S: Source> Heap<S> {
    pub const fn new(source: S) -> Self {
        Self::with_config(source, Config::new())
    }

    pub const fn with_config(source: S, config: Config) -> Self {
        Self {
            source,
            config,
            prologue: null_mut(),
            free_list: FreeList::new(),

            #[cfg(feature = "counters")]
            counters: counters::Counters::new(),
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The source the arena is grown from.
    ///
    /// The source can't be swapped out from safe code:
    /// ```compile_fail
    /// # use tagheap::*;
    /// let mut a = Heap::new(Brk::empty());
    /// let mut b = Heap::new(Brk::empty());
    /// core::mem::swap(&mut a.source, &mut b.source);
    /// ```
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Mutable access to the source the arena is grown from.
    ///
    /// # Safety
    /// While the heap is initialized, the source must keep its `low_bound` and
    /// `high_bound`, and must keep growing contiguously from `high_bound`.
    /// It may only be replaced or reset while the heap is uninitialized,
    /// or if [`init`](Heap::init) is called before the heap is used again.
    pub unsafe fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Whether `init` has laid down the sentinel blocks.
    pub fn is_initialized(&self) -> bool {
        !self.prologue.is_null()
    }

    /// The memory obtained from the source so far.
    pub fn arena(&self) -> Span {
        self.source.span()
    }

    /// Create the sentinel blocks and an initial free chunk.
    ///
    /// Calling this on an initialized heap starts over above the current arena;
    /// existing allocations are abandoned, not freed.
    pub fn init(&mut self) -> Result<(), HeapError> {
        let base = self.source.grow(SENTINELS_SIZE).map_err(|()| HeapError::InitFailed)?;
        debug_assert!(base as usize % ALIGNMENT == 0, "source memory {:p} is misaligned", base);

        unsafe {
            Tag::write(base, Tag::new(0, false));
            Tag::write(base.add(WSIZE), Tag::new(DSIZE, true));
            Tag::write(base.add(2 * WSIZE), Tag::new(DSIZE, true));
            Tag::write(base.add(3 * WSIZE), Tag::EPILOGUE);
        }

        self.prologue = base.wrapping_add(2 * WSIZE);
        self.free_list.clear();

        #[cfg(feature = "counters")]
        {
            self.counters.account_reinit();
            self.counters.account_extend(SENTINELS_SIZE);
        }

        log::debug!("heap initialized at {:p}", base);

        unsafe { self.extend(self.config.chunk_size() / WSIZE) }
            .map(|_| ())
            .map_err(|_| HeapError::InitFailed)
    }

    /// Grow the arena by `words` words, rounded up to an even count, and return
    /// the free block covering the new memory, coalesced with the old last block.
    ///
    /// # Safety
    /// The heap must be initialized.
    unsafe fn extend(&mut self, words: usize) -> Result<Block, HeapError> {
        debug_assert!(self.is_initialized());

        let size = words
            .checked_add(words % 2)
            .and_then(|words| words.checked_mul(WSIZE))
            .ok_or(HeapError::OutOfMemory)?;
        debug_assert!(size >= MIN_BLOCK_SIZE);

        if self.arena().size().checked_add(size).map_or(true, |total| total > MAX_ARENA_SIZE) {
            return Err(HeapError::OutOfMemory);
        }

        let high_bound = self.source.high_bound();
        let bp = self.source.grow(size).map_err(|()| HeapError::OutOfMemory)?;
        debug_assert!(bp == high_bound, "source grew discontiguously: {:p} != {:p}", bp, high_bound);

        // the new block's header overwrites the old epilogue
        let block = Block(bp);
        block.set_tags(Tag::new(size, false));
        Tag::write(block.next().header_ptr(), Tag::EPILOGUE);

        #[cfg(feature = "counters")]
        self.counters.account_extend(size);

        log::debug!("arena extended by {} bytes to {}", size, self.arena());

        Ok(self.coalesce(block))
    }

    /// Add a free block to the free list.
    #[inline]
    unsafe fn register(&mut self, block: Block) {
        debug_assert!(!block.is_allocated());
        debug_assert!(block.size() >= MIN_BLOCK_SIZE);

        self.free_list.insert(block);

        #[cfg(feature = "counters")]
        self.counters.account_register_gap(block.size());
    }

    /// Remove a free block from the free list.
    #[inline]
    unsafe fn deregister(&mut self, block: Block) {
        debug_assert!(!block.is_allocated());

        self.free_list.remove(block);

        #[cfg(feature = "counters")]
        self.counters.account_deregister_gap(block.size());
    }

    /// Merge a block that was just marked free with whichever physical neighbors are free,
    /// leaving the result in the free list. Returns the merged block.
    unsafe fn coalesce(&mut self, block: Block) -> Block {
        let is_prev_allocated = block.prev_footer().is_allocated();
        let next = block.next();
        let is_next_allocated = next.is_allocated();
        let size = block.size();

        match (is_prev_allocated, is_next_allocated) {
            (true, true) => {
                self.register(block);
                block
            }
            (true, false) => {
                let merged_size = size + next.size();
                self.deregister(next);
                block.set_tags(Tag::new(merged_size, false));
                self.register(block);

                log::trace!("coalesced {:p} with the block above", block.ptr());
                block
            }
            (false, true) => {
                // the block below keeps its place in the free list
                let prev = block.prev();
                prev.set_tags(Tag::new(prev.size() + size, false));

                #[cfg(feature = "counters")]
                self.counters.account_grow_gap(size);

                log::trace!("coalesced {:p} with the block below", block.ptr());
                prev
            }
            (false, false) => {
                let prev = block.prev();
                let next_size = next.size();
                self.deregister(next);
                prev.set_tags(Tag::new(prev.size() + size + next_size, false));

                #[cfg(feature = "counters")]
                self.counters.account_grow_gap(size + next_size);

                log::trace!("coalesced {:p} with the blocks on both sides", block.ptr());
                prev
            }
        }
    }

    /// Scan the free list for the smallest block of at least `required` bytes,
    /// stopping early at one within the configured slack.
    unsafe fn find_fit(&self, required: usize) -> Option<Block> {
        let mut best: Option<(Block, usize)> = None;

        for block in self.free_list.iter() {
            let size = block.size();

            if size >= required && best.map_or(true, |(_, best_size)| size < best_size) {
                best = Some((block, size));

                if size - required < self.config.fit_slack() {
                    break;
                }
            }
        }

        best.map(|(block, _)| block)
    }

    /// Allocate the first `required` bytes of a free block,
    /// returning the rest to the free list if it's big enough to be a block.
    unsafe fn place(&mut self, block: Block, required: usize) {
        let size = block.size();
        debug_assert!(size >= required);

        self.deregister(block);

        if size - required >= MIN_BLOCK_SIZE {
            block.set_tags(Tag::new(required, true));

            let remainder = block.next();
            remainder.set_tags(Tag::new(size - required, false));
            self.register(remainder);

            log::trace!("placed {} bytes at {:p}, split off {}", required, block.ptr(), size - required);
        } else {
            block.set_tags(Tag::new(size, true));

            log::trace!("placed {} bytes at {:p} in a {} byte block", required, block.ptr(), size);
        }

        #[cfg(feature = "counters")]
        self.counters.account_alloc(block.size());
    }

    /// Allocate at least `size` bytes, aligned to [`ALIGNMENT`].
    ///
    /// Returns `None` if `size` is zero, or if the arena can't grow to fit the allocation.
    /// Initializes the heap if that hasn't happened yet.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        if !self.is_initialized() && self.init().is_err() {
            log::warn!("out of memory: could not initialize the heap");
            return None;
        }

        let Some(required) = required_block_size(size) else {
            log::warn!("out of memory: {} bytes can't be allocated", size);
            return None;
        };

        unsafe {
            if let Some(block) = self.find_fit(required) {
                self.place(block, required);
                return Some(NonNull::new_unchecked(block.ptr()));
            }

            let extend_size = required.max(self.config.chunk_size());

            match self.extend(extend_size / WSIZE) {
                Ok(block) => {
                    self.place(block, required);
                    Some(NonNull::new_unchecked(block.ptr()))
                }
                Err(err) => {
                    log::warn!("{}: failed to grow the arena by {} bytes for {}", err, extend_size, size);
                    None
                }
            }
        }
    }

    /// Allocate `count * size` bytes, zeroed.
    ///
    /// Returns `None` if the product is zero or overflows, or if the allocation fails.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let Some(total) = count.checked_mul(size) else {
            log::warn!("out of memory: {} * {} bytes overflows", count, size);
            return None;
        };

        let ptr = self.malloc(total)?;
        unsafe { ptr.as_ptr().write_bytes(0, total) };
        Some(ptr)
    }

    /// Free an allocation. `None` is ignored.
    ///
    /// # Safety
    /// `ptr` must have been returned by this heap's `malloc`, `calloc`, or `realloc`,
    /// and must not have been freed since.
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };

        let block = Block(ptr.as_ptr());
        let size = block.size();

        debug_assert!(self.is_initialized());
        debug_assert!(block.is_allocated(), "double free of {:p}", ptr);
        debug_assert!(block.header() == block.footer(), "header and footer of {:p} disagree", ptr);

        #[cfg(feature = "counters")]
        self.counters.account_dealloc(size);

        block.set_tags(Tag::new(size, false));
        self.coalesce(block);
    }

    /// Move an allocation into a fresh block of at least `size` bytes.
    ///
    /// - `ptr == None` behaves like `malloc(size)`.
    /// - `size == 0` behaves like `free(ptr)` and returns `None`.
    /// - Otherwise a new block is always allocated, the first `min(old, size)` bytes
    ///     are copied over, and the old block is freed.
    ///
    /// If the new allocation fails, `None` is returned and `ptr` is left untouched.
    ///
    /// # Safety
    /// See [`free`](Heap::free).
    pub unsafe fn realloc(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            self.free(ptr);
            return None;
        }

        let Some(ptr) = ptr else {
            return self.malloc(size);
        };

        let new_ptr = self.malloc(size)?;

        let copy_size = self.payload_size(ptr).min(size);
        new_ptr.as_ptr().copy_from_nonoverlapping(ptr.as_ptr(), copy_size);

        self.free(Some(ptr));

        Some(new_ptr)
    }

    /// The number of bytes usable at `ptr`, which is at least what was requested.
    ///
    /// # Safety
    /// `ptr` must be a live allocation of this heap.
    pub unsafe fn payload_size(&self, ptr: NonNull<u8>) -> usize {
        Block(ptr.as_ptr()).payload_size()
    }

    /// Iterate over the free list: the block pointer and the block size of each member.
    pub fn free_blocks(&self) -> impl Iterator<Item = (*mut u8, usize)> + '_ {
        unsafe { self.free_list.iter().map(|block| (block.ptr(), block.size())) }
    }

    /// Wrap in `LockedHeap`, a mutex-locked wrapper struct using [`lock_api`].
    ///
    /// This implements the [`GlobalAlloc`](core::alloc::GlobalAlloc) trait and,
    /// with the `allocator` feature, `allocator_api2`'s `Allocator` trait.
    ///
    /// # Examples
    /// ```
    /// # use tagheap::*;
    /// # use core::alloc::{GlobalAlloc, Layout};
    /// use spin::Mutex;
    /// let locked = Heap::new(Brk::empty()).lock::<Mutex<()>>();
    ///
    /// // the break has no capacity, so even initialization fails
    /// assert!(unsafe { locked.alloc(Layout::from_size_align(32, 4).unwrap()) }.is_null());
    /// ```
    #[cfg(feature = "lock_api")]
    pub const fn lock<R: lock_api::RawMutex>(self) -> LockedHeap<R, S> {
        LockedHeap::new(self)
    }
}
