//! The explicit free list.
//!
//! The list is:
//!  * **Intrusive**: the links live in the first two words of each free block's payload
//!  * **Unordered**: blocks are pushed at the head, regardless of size or address
//!  * **Doubly linked** to allow removal from anywhere given only the block
//!  * **Relative**: each link is the signed distance in bytes from the block
//!    storing it to its neighbor, so a link is one 32-bit word wide on any target.
//!    A distance of zero means there is no neighbor; no block is its own neighbor.
//!
//! All address<->offset conversion is done in this module. Links are always
//! recomputed from the current addresses of both endpoints, never cached.
//!
//! ### Safety:
//! A block's links are only meaningful while it is free. Allocating a block
//! hands its link words to the user, so a block must be `remove`d before it is
//! marked allocated and `insert`ed after it is marked free.
//!
//! This data structure is not thread-safe, use mutexes/locks to mutually exclude data access.

use crate::{ptr_utils::WSIZE, tag::Block};

/// Byte offset of the link to the next block, within the payload.
const NEXT_OFFSET: usize = 0;
/// Byte offset of the link to the previous block, within the payload.
const PREV_OFFSET: usize = WSIZE;

/// Encodes the distance from `from` to `to`.
#[inline]
fn encode(from: Block, to: Option<Block>) -> i32 {
    match to {
        Some(to) => {
            let distance = (to.ptr() as isize).wrapping_sub(from.ptr() as isize);
            debug_assert!(distance != 0, "a free block cannot link to itself");
            debug_assert!(i32::try_from(distance).is_ok(), "link distance {} overflows", distance);
            distance as i32
        }
        None => 0,
    }
}

/// Decodes a link stored in `from`.
#[inline]
fn decode(from: Block, link: i32) -> Option<Block> {
    if link == 0 {
        None
    } else {
        Some(Block(from.ptr().wrapping_offset(link as isize)))
    }
}

/// Returns the raw `(next, prev)` link words of `block`.
///
/// # Safety
/// `block`'s payload must be readable for two words.
#[inline]
pub unsafe fn raw_links(block: Block) -> (i32, i32) {
    (
        block.ptr().add(NEXT_OFFSET).cast::<i32>().read(),
        block.ptr().add(PREV_OFFSET).cast::<i32>().read(),
    )
}

/// Follows a raw link stored in `block`.
#[inline]
pub fn follow(block: Block, link: i32) -> Option<Block> {
    decode(block, link)
}

#[inline]
unsafe fn next_of(block: Block) -> Option<Block> {
    decode(block, block.ptr().add(NEXT_OFFSET).cast::<i32>().read())
}

#[inline]
unsafe fn prev_of(block: Block) -> Option<Block> {
    decode(block, block.ptr().add(PREV_OFFSET).cast::<i32>().read())
}

#[inline]
unsafe fn set_next(block: Block, next: Option<Block>) {
    block.ptr().add(NEXT_OFFSET).cast::<i32>().write(encode(block, next));
}

#[inline]
unsafe fn set_prev(block: Block, prev: Option<Block>) {
    block.ptr().add(PREV_OFFSET).cast::<i32>().write(encode(block, prev));
}

/// Head of the free list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeList {
    head: Option<Block>,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None }
    }

    #[inline]
    pub fn head(&self) -> Option<Block> {
        self.head
    }

    /// Forget every member without touching their link words.
    #[inline]
    pub fn clear(&mut self) {
        self.head = None;
    }

    /// Push `block` at the head of the list.
    ///
    /// # Safety
    /// `block` must be a free block of at least the minimum block size that is
    /// not already a member, and must lie within the same arena as the other members.
    pub unsafe fn insert(&mut self, block: Block) {
        set_prev(block, None);
        set_next(block, self.head);

        if let Some(head) = self.head {
            set_prev(head, Some(block));
        }

        self.head = Some(block);
    }

    /// Unlink `block` from wherever it sits in the list.
    ///
    /// # Safety
    /// `block` must be a member of this list.
    pub unsafe fn remove(&mut self, block: Block) {
        let prev = prev_of(block);
        let next = next_of(block);

        match prev {
            Some(prev) => set_next(prev, next),
            None => {
                debug_assert!(self.head == Some(block), "{:?} has no predecessor but isn't the head", block);
                self.head = next;
            }
        }

        if let Some(next) = next {
            set_prev(next, prev);
        }
    }

    /// Creates an iterator over the members, starting at the head.
    ///
    /// # Safety
    /// The list must not be modified while the iterator is in use.
    pub unsafe fn iter(&self) -> Iter {
        Iter { next: self.head }
    }
}

/// An iterator over the free list's blocks, head first.
///
/// This `struct` is created by `FreeList::iter`. See its documentation for more.
#[derive(Debug, Clone, Copy)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Iter {
    next: Option<Block>,
}

impl Iterator for Iter {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = unsafe { next_of(current) };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;

    fn blocks(storage: &mut [u64; 32]) -> [Block; 4] {
        let base = storage.as_mut_ptr().cast::<u8>();
        [0, 64, 128, 192].map(|offset| Block(base.wrapping_add(offset)))
    }

    fn collect(list: &FreeList) -> Vec<Block> {
        unsafe { list.iter().collect() }
    }

    #[test]
    fn insert_pushes_at_head() {
        let mut storage = [0u64; 32];
        let [a, b, c, _] = blocks(&mut storage);
        let mut list = FreeList::new();

        unsafe {
            list.insert(a);
            list.insert(b);
            list.insert(c);
        }

        assert_eq!(collect(&list), [c, b, a]);
        assert_eq!(list.head(), Some(c));
    }

    #[test]
    fn links_are_relative() {
        let mut storage = [0u64; 32];
        let [a, b, _, _] = blocks(&mut storage);
        let mut list = FreeList::new();

        unsafe {
            list.insert(a);
            list.insert(b);

            // b is at the head, a is 64 bytes below it
            assert_eq!(raw_links(b), (-64, 0));
            assert_eq!(raw_links(a), (0, 64));
            assert_eq!(follow(b, -64), Some(a));
            assert_eq!(follow(a, 0), None);
        }
    }

    #[test]
    fn remove_head_interior_and_tail() {
        let mut storage = [0u64; 32];
        let [a, b, c, d] = blocks(&mut storage);
        let mut list = FreeList::new();

        unsafe {
            for block in [a, b, c, d] {
                list.insert(block);
            }
            assert_eq!(collect(&list), [d, c, b, a]);

            list.remove(c);
            assert_eq!(collect(&list), [d, b, a]);
            assert_eq!(raw_links(d), (encode(d, Some(b)), 0));
            assert_eq!(raw_links(b).1, encode(b, Some(d)));

            list.remove(d);
            assert_eq!(collect(&list), [b, a]);
            assert_eq!(raw_links(b).1, 0);

            list.remove(a);
            assert_eq!(collect(&list), [b]);
            assert_eq!(raw_links(b), (0, 0));

            list.remove(b);
        }

        assert!(list.head().is_none());
        assert!(collect(&list).is_empty());
    }
}
