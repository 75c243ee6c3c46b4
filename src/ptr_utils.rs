//! Sizing constants and rounding helpers.

/// Size of a boundary tag (and of a free-list link).
pub const WSIZE: usize = core::mem::size_of::<u32>();
/// Double word size. Also the per-block overhead: one header and one footer.
pub const DSIZE: usize = 2 * WSIZE;
/// Every payload address the heap hands out is aligned to this.
pub const ALIGNMENT: usize = 8;

/// Rounds `size` up to the next multiple of `align`, returning `None` on overflow.
///
/// `align` must be a power of two.
#[inline]
pub const fn align_up_checked(size: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());

    match size.checked_add(align - 1) {
        Some(bumped) => Some(bumped & !(align - 1)),
        None => None,
    }
}

/// Aligns `ptr` up to the next `align`, maintaining provenance.
#[inline]
pub fn align_ptr_up(ptr: *mut u8, align: usize) -> *mut u8 {
    debug_assert!(align.is_power_of_two());

    let mask = align - 1;
    ptr.wrapping_add(((ptr as usize).wrapping_add(mask) & !mask).wrapping_sub(ptr as usize))
}

/// Aligns `ptr` down to the previous `align`, maintaining provenance.
#[inline]
pub fn align_ptr_down(ptr: *mut u8, align: usize) -> *mut u8 {
    debug_assert!(align.is_power_of_two());
    ptr.wrapping_sub(ptr as usize & (align - 1))
}
