//! Tracker lifecycle: explicit init/close plus the process-exit fallback.
//!
//! States run `Uninitialized -> Active -> Closed`; a fresh `init` after
//! `close` starts a new cycle. Both transitions are idempotent.

use std::sync::Arc;

use crate::api::config::TrackerConfig;
use crate::core::global;
use crate::core::guard::GuardViolation;
use crate::core::tracker::LeakTracker;

/// Activate process-wide tracking.
///
/// Must be called before any allocation the caller wants tracked. Repeat
/// calls while a tracker is active are ignored. The process-exit fallback
/// is registered on the first call and never again.
///
/// Returns whether this call activated tracking.
pub fn init(config: TrackerConfig) -> bool {
    global::register_exit_hook();
    global::set_active(Arc::new(LeakTracker::new(&config)))
}

/// Deactivate tracking and flush one leak report.
///
/// The handle is cleared before the report is emitted, so allocations made
/// while reporting go straight to the system allocator instead of
/// re-entering the tracker. A second call is a no-op.
pub fn close() {
    if let Some(tracker) = global::take_active() {
        tracker.print_memory_leaks();
    }
}

/// Whether a tracker is currently receiving allocation traffic.
pub fn is_active() -> bool {
    global::active().is_some()
}

/// Handle to the active tracker, for stats and snapshot queries.
pub fn tracker() -> Option<Arc<LeakTracker>> {
    global::active()
}

/// Scan the guard regions of every live allocation of the active tracker.
///
/// Empty when no tracker is active or corruption checking is off.
pub fn check_heap_corruption() -> Vec<GuardViolation> {
    match global::active() {
        Some(tracker) => tracker.check_heap_corruption(),
        None => Vec::new(),
    }
}
