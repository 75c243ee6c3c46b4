//! Heap consistency checking.
//!
//! Nothing here is needed for the heap to work. The checks walk the arena block by
//! block, then the free list member by member, bounds checking every address before
//! it's read, and report anything that breaks the heap's invariants.

use crate::{
    llist,
    ptr_utils::{ALIGNMENT, DSIZE, WSIZE},
    tag::{Block, Tag},
    Heap, Source, MIN_BLOCK_SIZE,
};

/// An inconsistency found by [`Heap::audit`].
///
/// Blocks are identified by their block pointer, which is the payload address of allocated blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finding {
    /// The prologue block's tags were overwritten.
    BadPrologue { header: Tag, footer: Tag },
    /// A block pointer isn't aligned to [`ALIGNMENT`].
    Misaligned { block: *mut u8 },
    /// A block's size is too small to be a block.
    Undersized { block: *mut u8, tag: Tag },
    /// A block's header and footer differ.
    TagMismatch { block: *mut u8, header: Tag, footer: Tag },
    /// A free block directly follows another free block.
    ConsecutiveFree { block: *mut u8 },
    /// A block lies outside of the arena. The walk stops here.
    OutOfBounds { block: *mut u8 },
    /// The walk ended on a zero-sized block that isn't the epilogue at the end of the arena.
    BadEpilogue { block: *mut u8, tag: Tag },
    /// A free list member's backward link doesn't lead to the member before it.
    BrokenLink { block: *mut u8 },
    /// A free list member is marked allocated.
    AllocatedInFreeList { block: *mut u8 },
    /// A free list link leads outside of the arena. The walk stops here.
    FreeListOutOfBounds { block: *mut u8 },
    /// The free list has more members than could fit in the arena.
    FreeListCycle,
    /// The number of free blocks in the arena doesn't match the free list's length.
    FreeCountMismatch { in_arena: usize, in_free_list: usize },
}

impl core::fmt::Display for Finding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Finding::BadPrologue { header, footer } => {
                write!(f, "prologue is {} : {}, expected 8/a : 8/a", header, footer)
            }
            Finding::Misaligned { block } => write!(f, "block {:p} is misaligned", block),
            Finding::Undersized { block, tag } => write!(f, "block {:p} is undersized: {}", block, tag),
            Finding::TagMismatch { block, header, footer } => {
                write!(f, "block {:p} header {} and footer {} are inconsistent", block, header, footer)
            }
            Finding::ConsecutiveFree { block } => {
                write!(f, "block {:p} is free and follows a free block", block)
            }
            Finding::OutOfBounds { block } => write!(f, "block {:p} is out of the heap", block),
            Finding::BadEpilogue { block, tag } => write!(f, "bad epilogue {} at {:p}", tag, block),
            Finding::BrokenLink { block } => {
                write!(f, "free block {:p} is inconsistent with the previous free block", block)
            }
            Finding::AllocatedInFreeList { block } => {
                write!(f, "free block {:p} is marked allocated", block)
            }
            Finding::FreeListOutOfBounds { block } => {
                write!(f, "free list leads to {:p}, out of the heap", block)
            }
            Finding::FreeListCycle => f.write_str("free list is cyclic"),
            Finding::FreeCountMismatch { in_arena, in_free_list } => write!(
                f,
                "{} free blocks in the heap but {} in the free list",
                in_arena, in_free_list
            ),
        }
    }
}

impl<S: Source> Heap<S> {
    /// Check the heap's consistency, calling `report` with every finding.
    ///
    /// An uninitialized heap has nothing to check.
    pub fn audit(&self, mut report: impl FnMut(Finding)) {
        if !self.is_initialized() {
            return;
        }

        let arena = self.arena();
        let free_in_arena = unsafe { self.audit_blocks(&mut report) };

        // walk the free list
        let max_members = arena.size() / MIN_BLOCK_SIZE;
        let mut in_free_list = 0;
        let mut prev: Option<Block> = None;
        let mut cursor = self.free_list.head();

        while let Some(block) = cursor {
            let lowest = block.header_ptr();
            let highest = block.ptr().wrapping_add(DSIZE - 1);
            if !arena.contains(lowest) || !arena.contains(highest) || block.ptr() as usize % ALIGNMENT != 0 {
                report(Finding::FreeListOutOfBounds { block: block.ptr() });
                return;
            }

            in_free_list += 1;
            if in_free_list > max_members {
                report(Finding::FreeListCycle);
                return;
            }

            unsafe {
                if block.is_allocated() {
                    report(Finding::AllocatedInFreeList { block: block.ptr() });
                }

                let (next_link, prev_link) = llist::raw_links(block);
                if llist::follow(block, prev_link) != prev {
                    report(Finding::BrokenLink { block: block.ptr() });
                }

                cursor = llist::follow(block, next_link);
            }

            prev = Some(block);
        }

        if let Some(in_arena) = free_in_arena {
            if in_arena != in_free_list {
                report(Finding::FreeCountMismatch { in_arena, in_free_list });
            }
        }
    }

    /// Walk the arena from the prologue to the epilogue.
    ///
    /// Returns the number of free blocks, or `None` if the walk was cut short.
    unsafe fn audit_blocks(&self, report: &mut impl FnMut(Finding)) -> Option<usize> {
        let arena = self.arena();
        let prologue = Block(self.prologue);

        let expected = Tag::new(DSIZE, true);
        let (header, footer) = (prologue.header(), Tag::read(prologue.ptr()));
        if header != expected || footer != expected {
            report(Finding::BadPrologue { header, footer });
        }

        let mut block = Block(self.prologue.wrapping_add(DSIZE));
        let mut free_count = 0;
        let mut is_prev_free = false;

        loop {
            if !arena.contains(block.header_ptr()) {
                report(Finding::OutOfBounds { block: block.ptr() });
                return None;
            }

            let header = block.header();

            if header.size() == 0 {
                if !header.is_allocated() || block.ptr() != arena.acme() {
                    report(Finding::BadEpilogue { block: block.ptr(), tag: header });
                }
                return Some(free_count);
            }

            if block.ptr() as usize % ALIGNMENT != 0 {
                report(Finding::Misaligned { block: block.ptr() });
            }

            if header.size() < MIN_BLOCK_SIZE {
                report(Finding::Undersized { block: block.ptr(), tag: header });
            }

            // the footer and the next header must both be in the arena
            let next_header = block.ptr().wrapping_add(header.size()).wrapping_sub(WSIZE);
            if !arena.contains(next_header) || (next_header as usize) < (block.ptr() as usize) {
                report(Finding::OutOfBounds { block: block.ptr() });
                return None;
            }

            let footer = block.footer();
            if header != footer {
                report(Finding::TagMismatch { block: block.ptr(), header, footer });
            }

            if !header.is_allocated() {
                free_count += 1;
                if is_prev_free {
                    report(Finding::ConsecutiveFree { block: block.ptr() });
                }
            }
            is_prev_free = !header.is_allocated();

            block = block.next();
        }
    }

    /// Check the heap's consistency, logging every finding as an error.
    ///
    /// `context` labels the log output, conventionally with the calling line: `verify(line!())`.
    pub fn verify(&self, context: u32) {
        let mut finding_count = 0usize;

        self.audit(|finding| {
            finding_count += 1;
            log::error!("heap check {}: {}", context, finding);
        });

        if finding_count == 0 {
            log::info!("heap check {}: ok", context);
        }
    }
}
