//! Fallible raw storage allocation.
//!
//! The queue allocates its backing region exactly once, at construction, and
//! frees it exactly once, at drop. Allocation failure is reported as `None`
//! rather than a panic so callers can surface it as an ordinary error.

use std::alloc::Layout;
use std::ptr::NonNull;

/// A fallible allocate/deallocate pair for raw byte regions.
///
/// Implementations must never panic: failure is signalled by returning
/// `None` from [`allocate`](RawAlloc::allocate).
pub trait RawAlloc {
    /// Allocates a region described by `layout`, or `None` on failure.
    ///
    /// `layout.size()` is always non-zero when called by this crate.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Deallocates a region previously returned by [`allocate`](RawAlloc::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from a call to `allocate` on this same allocator with
    /// this same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process-global allocator, via `std::alloc`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Global;

impl RawAlloc for Global {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}
