use core::ops::Range;

use crate::ptr_utils::{align_ptr_down, align_ptr_up};

/// Represents an interval of memory `[base, acme)`
///
/// Use `from_*` functions or `From` conversions to construct.
/// `Span`s with `base >= acme` are empty and compare equal to each other.
#[derive(Clone, Copy, Hash)]
pub struct Span {
    base: *mut u8,
    acme: *mut u8,
}

unsafe impl Send for Span {}

impl Default for Span {
    fn default() -> Self {
        Self::empty()
    }
}

impl core::fmt::Debug for Span {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{:p}..[{}]..{:p}", self.base, self.size(), self.acme))
    }
}

impl core::fmt::Display for Span {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{:p}..{:p}", self.base, self.acme))
    }
}

impl From<Range<*mut u8>> for Span {
    fn from(value: Range<*mut u8>) -> Self {
        Self { base: value.start, acme: value.end }
    }
}

impl From<*mut [u8]> for Span {
    #[inline]
    fn from(value: *mut [u8]) -> Self {
        let base = value.cast::<u8>();
        Self { base, acme: base.wrapping_add(value.len()) }
    }
}

impl From<&mut [u8]> for Span {
    #[inline]
    fn from(value: &mut [u8]) -> Self {
        Self::from(value as *mut [u8])
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        (self.is_empty() && other.is_empty()) || (self.base == other.base && self.acme == other.acme)
    }
}
impl Eq for Span {}

impl Span {
    /// Returns whether `base >= acme`.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.acme as usize <= self.base as usize
    }

    /// Returns the size of the span, or zero if empty.
    #[inline]
    pub fn size(self) -> usize {
        (self.acme as usize).saturating_sub(self.base as usize)
    }

    /// If `self` isn't empty, returns `(base, acme)`
    #[inline]
    pub fn get_base_acme(self) -> Option<(*mut u8, *mut u8)> {
        if self.is_empty() {
            None
        } else {
            Some((self.base, self.acme))
        }
    }

    /// Create an empty span.
    #[inline]
    pub const fn empty() -> Self {
        Self { base: core::ptr::null_mut(), acme: core::ptr::null_mut() }
    }

    /// Create a new span.
    #[inline]
    pub const fn new(base: *mut u8, acme: *mut u8) -> Self {
        Self { base, acme }
    }

    /// Creates a span from a base pointer and a size.
    #[inline]
    pub fn from_base_size(base: *mut u8, size: usize) -> Self {
        Self { base, acme: base.wrapping_add(size) }
    }

    #[inline]
    pub fn base(self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn acme(self) -> *mut u8 {
        self.acme
    }

    /// Returns whether `self` contains `ptr`.
    ///
    /// Empty spans contain nothing.
    #[inline]
    pub fn contains(self, ptr: *mut u8) -> bool {
        !self.is_empty() && self.base as usize <= ptr as usize && (ptr as usize) < self.acme as usize
    }

    /// Returns whether `self` contains `other`.
    ///
    /// Empty spans are contained by any span, even empty ones.
    #[inline]
    pub fn contains_span(self, other: Span) -> bool {
        other.is_empty()
            || (self.base as usize <= other.base as usize && other.acme as usize <= self.acme as usize)
    }

    /// Returns whether some of `self` overlaps with `other`.
    ///
    /// Empty spans don't overlap with anything.
    #[inline]
    pub fn overlaps(self, other: Span) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && !(other.base as usize >= self.acme as usize || self.base as usize >= other.acme as usize)
    }

    /// Aligns `base` upward and `acme` downward by `align`.
    ///
    /// If either operation would wrap around the address space, an empty span is returned.
    #[inline]
    pub fn align_inward(self, align: usize) -> Self {
        if usize::MAX - self.base as usize >= align - 1 {
            Span { base: align_ptr_up(self.base, align), acme: align_ptr_down(self.acme, align) }
        } else {
            Self::empty()
        }
    }
}
