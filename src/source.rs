//! The backing arena a [`Heap`](crate::Heap) grows into.

use crate::{ptr_utils::ALIGNMENT, Span};

/// Supplies the heap with a single contiguous region of memory that only ever grows.
///
/// # Safety
/// Implementors must uphold that:
/// - `low_bound` is aligned to 8 bytes and never changes once memory has been handed out.
/// - A successful `grow(bytes)` returns the previous `high_bound`, and the `bytes`
///     bytes from there onward are valid for reads and writes, unused by anything
///     else, for as long as the heap is in use.
/// - Memory that was handed out is never taken back or moved.
pub unsafe trait Source {
    /// Extend the region by `bytes`, returning the base of the newly available memory,
    /// or `Err(())` if the capacity of the region would be exceeded.
    fn grow(&mut self, bytes: usize) -> Result<*mut u8, ()>;

    /// The lowest address of the region.
    fn low_bound(&self) -> *mut u8;

    /// One past the highest address of the region handed out so far.
    fn high_bound(&self) -> *mut u8;

    /// The region handed out so far.
    #[inline]
    fn span(&self) -> Span {
        Span::new(self.low_bound(), self.high_bound())
    }
}

/// A break pointer over a fixed block of memory.
///
/// Growth moves the break upward until it would pass the end of the memory,
/// much like `sbrk` against a hard limit.
#[derive(Debug)]
pub struct Brk {
    memory: Span,
    brk: *mut u8,
}

unsafe impl Send for Brk {}

impl Brk {
    /// A break with no capacity. Every `grow` fails.
    pub const fn empty() -> Self {
        Self { memory: Span::empty(), brk: core::ptr::null_mut() }
    }

    /// Create a break at the bottom of `memory`.
    ///
    /// The memory is aligned inward to 8 bytes first.
    ///
    /// # Safety
    /// The memory within `memory` must be valid for reads and writes,
    /// and must not be used by anything else while this `Brk` or a heap grown from it is alive.
    pub unsafe fn new(memory: Span) -> Self {
        match memory.align_inward(ALIGNMENT).get_base_acme() {
            Some((base, acme)) => Self { memory: Span::new(base, acme), brk: base },
            None => Self::empty(),
        }
    }

    /// Total number of bytes that can be handed out.
    pub fn capacity(&self) -> usize {
        self.memory.size()
    }

    /// Number of bytes handed out so far.
    pub fn used(&self) -> usize {
        self.brk as usize - self.memory.base() as usize
    }

    /// Number of bytes that can still be handed out.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Move the break back to the bottom of the memory.
    ///
    /// # Safety
    /// Nothing may still be using memory handed out previously.
    /// In particular, a heap grown from this break must be re-initialized before further use.
    pub unsafe fn reset(&mut self) {
        self.brk = self.memory.base();
    }
}

unsafe impl Source for Brk {
    fn grow(&mut self, bytes: usize) -> Result<*mut u8, ()> {
        if bytes > self.remaining() {
            log::debug!("break exhausted: requested {} bytes, {} of {} remain", bytes, self.remaining(), self.capacity());
            return Err(());
        }

        let old_brk = self.brk;
        self.brk = self.brk.wrapping_add(bytes);
        Ok(old_brk)
    }

    #[inline]
    fn low_bound(&self) -> *mut u8 {
        self.memory.base()
    }

    #[inline]
    fn high_bound(&self) -> *mut u8 {
        self.brk
    }
}
