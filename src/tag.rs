//! A `Tag` is a block size with the allocated flag packed into its low bit.
//!
//! Every block carries an identical tag at its start (the header) and its end
//! (the footer). `Block` wraps a payload address and does all of the address
//! arithmetic needed to get from it to its tags and physical neighbors.

use crate::ptr_utils::{DSIZE, WSIZE};

/// Boundary tag word: a block size with the allocated flag in its low bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Tag(u32);

impl core::fmt::Debug for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("is_allocated", &self.is_allocated())
            .finish()
    }
}

impl core::fmt::Display for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.size(), if self.is_allocated() { 'a' } else { 'f' })
    }
}

impl Tag {
    pub const ALLOCATED_FLAG: u32 = 1 << 0;
    /// Sizes are multiples of eight, so the low three bits are free for flags.
    const SIZE_MASK: u32 = !0x7;

    /// The epilogue: allocated and zero-sized.
    pub const EPILOGUE: Tag = Tag(Self::ALLOCATED_FLAG);

    #[inline]
    pub const fn new(size: usize, is_allocated: bool) -> Self {
        debug_assert!(size % DSIZE == 0);
        debug_assert!(size <= u32::MAX as usize);

        if is_allocated {
            Self(size as u32 | Self::ALLOCATED_FLAG)
        } else {
            Self(size as u32)
        }
    }

    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & Self::SIZE_MASK) as usize
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED_FLAG != 0
    }

    #[inline]
    pub(crate) unsafe fn read(ptr: *const u8) -> Self {
        Self(ptr.cast::<u32>().read())
    }

    #[inline]
    pub(crate) unsafe fn write(ptr: *mut u8, tag: Self) {
        ptr.cast::<u32>().write(tag.0)
    }
}

/// Handle to a block, by its payload address.
///
/// None of these operations validate anything; the heap verifier does that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Block(pub(crate) *mut u8);

impl Block {
    #[inline]
    pub fn ptr(self) -> *mut u8 {
        self.0
    }

    #[inline]
    pub fn header_ptr(self) -> *mut u8 {
        self.0.wrapping_sub(WSIZE)
    }

    /// The footer sits one double word before the start of the next block's payload.
    #[inline]
    pub unsafe fn footer_ptr(self) -> *mut u8 {
        self.0.wrapping_add(self.size()).wrapping_sub(DSIZE)
    }

    #[inline]
    pub unsafe fn header(self) -> Tag {
        Tag::read(self.header_ptr())
    }

    #[inline]
    pub unsafe fn footer(self) -> Tag {
        Tag::read(self.footer_ptr())
    }

    #[inline]
    pub unsafe fn size(self) -> usize {
        self.header().size()
    }

    #[inline]
    pub unsafe fn is_allocated(self) -> bool {
        self.header().is_allocated()
    }

    /// Writes the header, then a matching footer located by the new size.
    #[inline]
    pub unsafe fn set_tags(self, tag: Tag) {
        Tag::write(self.header_ptr(), tag);
        Tag::write(self.footer_ptr(), tag);
    }

    #[inline]
    pub unsafe fn next(self) -> Block {
        Block(self.0.wrapping_add(self.size()))
    }

    /// Reads the previous block's footer, just below this block's header.
    #[inline]
    pub unsafe fn prev(self) -> Block {
        let prev_size = Tag::read(self.0.wrapping_sub(DSIZE)).size();
        Block(self.0.wrapping_sub(prev_size))
    }

    /// The tag at the end of the previous block, without moving to it.
    #[inline]
    pub unsafe fn prev_footer(self) -> Tag {
        Tag::read(self.0.wrapping_sub(DSIZE))
    }

    /// Number of bytes usable by the caller.
    #[inline]
    pub unsafe fn payload_size(self) -> usize {
        self.size() - DSIZE
    }
}
