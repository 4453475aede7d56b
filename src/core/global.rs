//! The process-wide active tracker handle.
//!
//! Allocation call sites cannot thread a tracker reference through every
//! call, so a single explicit handle is published here at init and cleared
//! at shutdown. The hook entry points clone the handle under its mutex,
//! which rules out a torn read against a concurrent close.

use std::sync::{Arc, Once};

use crate::core::tracker::LeakTracker;
use crate::sync::mutex::Mutex;

static ACTIVE: Mutex<Option<Arc<LeakTracker>>> = Mutex::new(None);
static EXIT_HOOK: Once = Once::new();

/// Publish `tracker` as the active handle.
///
/// Returns false (and drops the candidate) if a tracker is already active.
pub(crate) fn set_active(tracker: Arc<LeakTracker>) -> bool {
    let mut active = ACTIVE.lock();
    if active.is_some() {
        return false;
    }
    *active = Some(tracker);
    true
}

/// Take the active handle, leaving the hooks in passthrough mode.
pub(crate) fn take_active() -> Option<Arc<LeakTracker>> {
    ACTIVE.lock().take()
}

/// Clone the active handle, if any.
pub(crate) fn active() -> Option<Arc<LeakTracker>> {
    ACTIVE.lock().clone()
}

/// Register the process-exit fallback. Registration happens at most once
/// per process no matter how many init/close cycles run.
pub(crate) fn register_exit_hook() {
    EXIT_HOOK.call_once(|| unsafe {
        libc::atexit(report_at_exit);
    });
}

/// Exit fallback: if the tracker was never explicitly closed, take the
/// handle and report once. After a regular close the handle is already
/// gone and this does nothing.
extern "C" fn report_at_exit() {
    if let Some(tracker) = take_active() {
        tracker.print_memory_leaks();
    }
}
