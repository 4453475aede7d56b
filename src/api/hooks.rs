//! Global allocation entry points.
//!
//! These free functions are the process-wide interception layer: while a
//! tracker is active (see [`crate::api::lifecycle`]) they route every
//! request to it, otherwise straight to the system allocator. Call sites
//! normally go through the `lt_alloc!`/`lt_free!` macros, which capture
//! `file!()` and `line!()` automatically.
//!
//! `#[global_allocator]` cannot carry call-site provenance, so tracking is
//! opt-in per call site through this interface. Allocations made behind
//! the crate's back are untracked and pass through [`free`] unharmed via
//! the record address check.

use std::alloc::{handle_alloc_error, Layout};

use crate::core::global;
use crate::core::record::PAYLOAD_ALIGN;

/// A file/line pair captured at an allocation call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSite {
    /// Source file, as produced by `file!()`.
    pub file: &'static str,

    /// Source line, as produced by `line!()`.
    pub line: u32,
}

impl CallSite {
    /// Create a call site.
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

/// Allocate `size` bytes with call-site provenance.
///
/// Tracked while a tracker is active, plain system allocation otherwise.
/// Aborts via [`handle_alloc_error`] when the request cannot be satisfied;
/// use [`try_alloc`] for a fallible variant.
pub fn alloc(size: usize, site: CallSite) -> *mut u8 {
    let ptr = match global::active() {
        Some(tracker) => tracker.alloc(size, Some(site)),
        None => unsafe { libc::malloc(size.max(1)).cast() },
    };
    if ptr.is_null() {
        handle_alloc_error(oom_layout(size));
    }
    ptr
}

/// Array-form allocation: `count` elements of `elem_size` bytes each.
/// Delegates to [`alloc`]; a size overflow can never be satisfied and is
/// treated as exhaustion.
pub fn alloc_array(count: usize, elem_size: usize, site: CallSite) -> *mut u8 {
    match count.checked_mul(elem_size) {
        Some(size) => alloc(size, site),
        None => handle_alloc_error(oom_layout(usize::MAX)),
    }
}

/// Plain allocation with no provenance: always passthrough, never tracked.
/// Aborts via [`handle_alloc_error`] on exhaustion.
pub fn alloc_untracked(size: usize) -> *mut u8 {
    let ptr = try_alloc(size);
    if ptr.is_null() {
        handle_alloc_error(oom_layout(size));
    }
    ptr
}

/// Non-throwing allocation variant: never aborts, returns null when the
/// request cannot be satisfied. Untracked by design, like the plain form.
pub fn try_alloc(size: usize) -> *mut u8 {
    match global::active() {
        Some(tracker) => tracker.alloc(size, None),
        None => unsafe { libc::malloc(size.max(1)).cast() },
    }
}

/// Release a pointer obtained from any allocation entry point in this
/// module. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a pointer from this module's allocation entry
/// points that has not been freed yet. Tracked pointers must be released
/// before the tracker that produced them is closed; after close the
/// passthrough path would hand an interior block address to the system
/// allocator.
pub unsafe fn free(ptr: *mut u8) {
    match global::active() {
        Some(tracker) => {
            tracker.free(ptr);
        }
        None => {
            if !ptr.is_null() {
                libc::free(ptr.cast());
            }
        }
    }
}

/// Array-form release. Identical to [`free`].
///
/// # Safety
///
/// Same contract as [`free`].
pub unsafe fn free_array(ptr: *mut u8) {
    free(ptr);
}

/// Release with call-site provenance. The site is accepted for symmetry
/// with [`alloc`] only; the record carries its own provenance.
///
/// # Safety
///
/// Same contract as [`free`].
pub unsafe fn free_sited(ptr: *mut u8, _site: CallSite) {
    free(ptr);
}

/// Array-form release with call-site provenance.
///
/// # Safety
///
/// Same contract as [`free`].
pub unsafe fn free_array_sited(ptr: *mut u8, _site: CallSite) {
    free(ptr);
}

fn oom_layout(size: usize) -> Layout {
    Layout::from_size_align(size, PAYLOAD_ALIGN).unwrap_or_else(|_| Layout::new::<u8>())
}

/// Allocate with the caller's file/line captured as provenance.
///
/// Expands to [`crate::api::hooks::alloc`].
#[macro_export]
macro_rules! lt_alloc {
    ($size:expr) => {
        $crate::api::hooks::alloc($size, $crate::CallSite::new(file!(), line!()))
    };
}

/// Array-form allocation with the caller's file/line captured.
///
/// Expands to [`crate::api::hooks::alloc_array`].
#[macro_export]
macro_rules! lt_alloc_array {
    ($count:expr, $elem_size:expr) => {
        $crate::api::hooks::alloc_array($count, $elem_size, $crate::CallSite::new(file!(), line!()))
    };
}

/// Non-throwing allocation: returns null instead of aborting on
/// exhaustion. Untracked.
#[macro_export]
macro_rules! lt_try_alloc {
    ($size:expr) => {
        $crate::api::hooks::try_alloc($size)
    };
}

/// Release a pointer obtained from the allocation macros. Unsafe; the
/// caller supplies the enclosing `unsafe` block.
#[macro_export]
macro_rules! lt_free {
    ($ptr:expr) => {
        $crate::api::hooks::free($ptr)
    };
}
