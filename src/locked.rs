use crate::{Heap, Source, ALIGNMENT};

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

#[cfg(feature = "allocator")]
use allocator_api2::alloc::{AllocError, Allocator};

/// Wrapper struct containing a mutex-locked [`Heap`].
///
/// Allocations are always aligned to [`ALIGNMENT`]; layouts that ask for more fail.
#[derive(Debug)]
pub struct LockedHeap<R: lock_api::RawMutex, S: Source>(pub lock_api::Mutex<R, Heap<S>>);

impl<R: lock_api::RawMutex, S: Source> LockedHeap<R, S> {
    /// Wrap `heap` in a mutex. See also [`Heap::lock`].
    pub const fn new(heap: Heap<S>) -> Self {
        Self(lock_api::Mutex::new(heap))
    }

    /// Lock the mutex and access the inner `Heap`.
    pub fn lock(&self) -> lock_api::MutexGuard<'_, R, Heap<S>> {
        self.0.lock()
    }

    /// Consume the mutex, returning the inner `Heap`.
    pub fn into_inner(self) -> Heap<S> {
        self.0.into_inner()
    }
}

unsafe impl<R: lock_api::RawMutex, S: Source> GlobalAlloc for LockedHeap<R, S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            log::warn!("unsupported alignment: {:?}", layout);
            return ptr::null_mut();
        }

        self.0.lock().malloc(layout.size()).map_or(ptr::null_mut(), |nn| nn.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0.lock().free(NonNull::new(ptr))
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            log::warn!("unsupported alignment: {:?}", layout);
            return ptr::null_mut();
        }

        self.0.lock().calloc(1, layout.size()).map_or(ptr::null_mut(), |nn| nn.as_ptr())
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        self.0.lock().realloc(NonNull::new(ptr), new_size).map_or(ptr::null_mut(), |nn| nn.as_ptr())
    }
}

#[cfg(feature = "allocator")]
unsafe impl<R: lock_api::RawMutex, S: Source> Allocator for LockedHeap<R, S> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.align() > ALIGNMENT {
            log::warn!("unsupported alignment: {:?}", layout);
            return Err(AllocError);
        }

        if layout.size() == 0 {
            let dangling = ptr::null_mut::<u8>().wrapping_add(layout.align());
            return Ok(NonNull::slice_from_raw_parts(unsafe { NonNull::new_unchecked(dangling) }, 0));
        }

        let mut heap = self.0.lock();
        let allocation = heap.malloc(layout.size()).ok_or(AllocError)?;
        let size = unsafe { heap.payload_size(allocation) };

        Ok(NonNull::slice_from_raw_parts(allocation, size))
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let allocation = self.allocate(layout)?;

        // the whole payload is handed out, not just the requested size
        unsafe { allocation.cast::<u8>().as_ptr().write_bytes(0, allocation.len()) };

        Ok(allocation)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            self.0.lock().free(Some(ptr));
        }
    }
}
