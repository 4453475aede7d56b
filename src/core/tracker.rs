//! The leak tracker: tracked allocation, freeing, leak reporting, and
//! corruption scans.
//!
//! Bookkeeping is colocated with each allocation: an [`AllocationRecord`]
//! is embedded at the head of every tracked block and spliced into an
//! intrusive doubly linked list of live allocations. One mutex guards the
//! list and its counters; guard scanning and report formatting stay out of
//! the critical section wherever possible.

use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::api::config::TrackerConfig;
use crate::api::hooks::CallSite;
use crate::api::snapshot::{LeakRecord, LeakSnapshot};
use crate::api::stats::TrackerStats;
use crate::core::guard::{self, GuardViolation};
use crate::core::poison;
use crate::core::record::{AllocationRecord, BlockLayout};
use crate::sync::mutex::Mutex;
use crate::util::size::format_bytes;

/// Result of presenting a pointer to [`LeakTracker::free`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeOutcome {
    /// Tracked allocation: unlinked and released.
    Released,

    /// Null pointer, nothing to do.
    NullPointer,

    /// The pointer was never tracked; it was released through the system
    /// allocator as-is.
    Passthrough,

    /// The record's size exceeds every tracked allocation. The record is
    /// corrupt; the free was refused and the memory kept.
    RejectedSize,

    /// The record's line exceeds every tracked call site. The record is
    /// corrupt; the free was refused and the memory kept.
    RejectedLine,
}

impl FreeOutcome {
    /// Whether the pointer's memory was actually handed back to the
    /// system allocator.
    pub fn released(&self) -> bool {
        matches!(self, FreeOutcome::Released | FreeOutcome::Passthrough)
    }
}

/// List head and counters. Guarded by the tracker's mutex.
struct TrackerState {
    /// Head of the intrusive live list; insertion always happens here.
    head: *mut AllocationRecord,

    /// Number of records reachable from `head`.
    live_count: usize,

    /// Sum of payload sizes of live records.
    live_bytes: usize,

    /// Largest payload size ever tracked. Plausibility bound for records
    /// presented at free time, not a proof of integrity.
    max_size: usize,

    /// Largest call-site line ever tracked. Same role as `max_size`.
    max_line: u32,
}

/// Process-lifetime heap leak and corruption tracker.
///
/// Construct one per [`TrackerConfig`], either explicitly for an embedded
/// scope or through [`crate::api::lifecycle::init`] for process-wide
/// tracking. All methods are callable from arbitrary threads.
pub struct LeakTracker {
    layout: BlockLayout,
    corruption_check: bool,
    poison_on_free: bool,
    state: Mutex<TrackerState>,
    total_allocations: AtomicU64,
    total_frees: AtomicU64,
    peak_live_bytes: AtomicUsize,
}

// Safety: the raw list pointers are only touched under the state mutex,
// and the records they point at are owned by the tracker.
unsafe impl Send for LeakTracker {}
unsafe impl Sync for LeakTracker {}

impl LeakTracker {
    /// Create a tracker for the given configuration.
    pub fn new(config: &TrackerConfig) -> Self {
        let layout = if config.corruption_check {
            BlockLayout::with_guard(config.guard_region_size)
        } else {
            BlockLayout::plain()
        };

        Self {
            layout,
            corruption_check: config.corruption_check,
            poison_on_free: config.poison_on_free,
            state: Mutex::new(TrackerState {
                head: ptr::null_mut(),
                live_count: 0,
                live_bytes: 0,
                max_size: 0,
                max_line: 0,
            }),
            total_allocations: AtomicU64::new(0),
            total_frees: AtomicU64::new(0),
            peak_live_bytes: AtomicUsize::new(0),
        }
    }

    /// Block layout used by this tracker.
    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    /// Allocate `size` bytes of payload.
    ///
    /// With a call site the allocation is recorded on the live list and
    /// the returned pointer must eventually come back through
    /// [`Self::free`]. Without one (`None`) the request is an explicit
    /// opt-out and goes straight to the system allocator, unrecorded.
    ///
    /// Returns null when the system allocator cannot satisfy the request.
    pub fn alloc(&self, size: usize, site: Option<CallSite>) -> *mut u8 {
        let Some(site) = site else {
            // Opt-out path. malloc(0) may legally return null, so keep the
            // request non-empty.
            return unsafe { libc::malloc(size.max(1)).cast() };
        };

        let total = self.layout.total_size(size);
        // Guard bytes must start zeroed; calloc does that in one step.
        let block = if self.corruption_check {
            unsafe { libc::calloc(total, 1).cast::<u8>() }
        } else {
            unsafe { libc::malloc(total).cast::<u8>() }
        };
        if block.is_null() {
            return ptr::null_mut();
        }

        unsafe {
            let rec = self.layout.record_from_block(block);
            let payload = self.layout.payload_from_block(block);

            let mut state = self.state.lock();
            ptr::write(
                rec,
                AllocationRecord {
                    payload,
                    size,
                    file: site.file,
                    line: site.line,
                    next: state.head,
                    prev: ptr::null_mut(),
                },
            );
            if !state.head.is_null() {
                (*state.head).prev = rec;
            }
            state.head = rec;
            state.live_count += 1;
            state.live_bytes += size;
            if state.max_size < size {
                state.max_size = size;
            }
            if state.max_line < site.line {
                state.max_line = site.line;
            }
            let live_bytes = state.live_bytes;
            drop(state);

            self.total_allocations.fetch_add(1, Ordering::Relaxed);
            self.update_peak(live_bytes);
            payload
        }
    }

    /// Release a payload pointer.
    ///
    /// Pointers that fail the record's address check are treated as
    /// untracked and passed straight to the system allocator. Records
    /// failing the size/line plausibility bounds are reported as corrupt
    /// and the free is refused: the memory stays mapped rather than risk
    /// compounding the damage.
    ///
    /// # Safety
    ///
    /// `payload` must be null, or a pointer obtained from this tracker's
    /// [`Self::alloc`] that has not been freed yet. Tracked pointers must
    /// be released while the tracker that produced them is still alive.
    /// Identifying an untracked pointer reads the header-sized span before
    /// it, which the system allocator is assumed to keep mapped.
    pub unsafe fn free(&self, payload: *mut u8) -> FreeOutcome {
        if payload.is_null() {
            return FreeOutcome::NullPointer;
        }

        let rec = self.layout.record_from_payload(payload);

        // Untracked allocations (opt-out or foreign) carry no record, so
        // the address field cannot match. Not corruption.
        if (*rec).payload != payload {
            libc::free(payload.cast());
            return FreeOutcome::Passthrough;
        }

        let (max_size, max_line) = {
            let state = self.state.lock();
            (state.max_size, state.max_line)
        };
        if (*rec).size > max_size {
            log::warn!(
                "[memory] corruption: refusing to free address {:p}, allocation record has invalid size {}",
                payload,
                (*rec).size,
            );
            return FreeOutcome::RejectedSize;
        }
        if (*rec).line > max_line {
            log::warn!(
                "[memory] corruption: refusing to free address {:p}, allocation record has invalid line {}",
                payload,
                (*rec).line,
            );
            return FreeOutcome::RejectedLine;
        }

        if self.corruption_check {
            // Reads only resolved record fields; runs outside the lock.
            // Violations are reported but do not abort the free: the guard
            // contents are suspect, the bookkeeping is not.
            guard::scan_record(self.layout, rec);
        }

        {
            let mut state = self.state.lock();
            if state.head == rec {
                state.head = (*rec).next;
            }
            if !(*rec).prev.is_null() {
                (*(*rec).prev).next = (*rec).next;
            }
            if !(*rec).next.is_null() {
                (*(*rec).next).prev = (*rec).prev;
            }
            state.live_count -= 1;
            state.live_bytes -= (*rec).size;
        }
        self.total_frees.fetch_add(1, Ordering::Relaxed);

        if self.poison_on_free {
            poison::poison_freed(payload, (*rec).size);
        }
        libc::free(self.layout.block_from_payload(payload).cast());
        FreeOutcome::Released
    }

    /// Emit the leak report through the log facade.
    ///
    /// One info line when everything was cleaned up; otherwise a warning
    /// summary followed by one warning line per live record. Holds the
    /// list lock for the whole walk so the report is a consistent
    /// snapshot. Does not mutate.
    ///
    /// A logger that routes its own allocations through the tracking
    /// macros would re-enter the tracker here; prefer reporting through
    /// [`crate::api::lifecycle::close`], which detaches the hooks first.
    pub fn print_memory_leaks(&self) {
        let state = self.state.lock();
        if state.live_count == 0 {
            log::info!("[memory] all heap allocations cleaned up (no leaks detected)");
            return;
        }

        log::warn!(
            "[memory] {} heap allocation(s) still live ({})",
            state.live_count,
            format_bytes(state.live_bytes),
        );
        let mut rec = state.head;
        while !rec.is_null() {
            unsafe {
                // A record with an empty file never finished tracking;
                // skip it rather than report garbage.
                if !(&(*rec).file).is_empty() {
                    log::warn!(
                        "[memory] leak: address {:p}, size {}, {}:{}",
                        (*rec).payload,
                        (*rec).size,
                        (*rec).file,
                        (*rec).line,
                    );
                }
                rec = (*rec).next;
            }
        }
    }

    /// The same walk as [`Self::print_memory_leaks`], returned as data.
    pub fn leak_snapshot(&self) -> LeakSnapshot {
        let state = self.state.lock();
        let mut records = Vec::with_capacity(state.live_count);
        let mut rec = state.head;
        while !rec.is_null() {
            unsafe {
                if !(&(*rec).file).is_empty() {
                    records.push(LeakRecord {
                        address: (*rec).payload as usize,
                        size: (*rec).size,
                        file: (*rec).file,
                        line: (*rec).line,
                    });
                }
                rec = (*rec).next;
            }
        }
        LeakSnapshot {
            records,
            live_count: state.live_count,
            live_bytes: state.live_bytes,
        }
    }

    /// Scan the guard regions of a single live allocation.
    ///
    /// Returns at most one violation per region (first clobbered byte),
    /// each also logged as a warning. Empty in plain mode, where the guard
    /// width is zero.
    ///
    /// # Safety
    ///
    /// `payload` must be a live pointer obtained from this tracker's
    /// [`Self::alloc`] with a call site.
    pub unsafe fn check_corruption_at(&self, payload: *mut u8) -> Vec<GuardViolation> {
        let rec = self.layout.record_from_payload(payload);
        guard::scan_record(self.layout, rec)
    }

    /// Scan the guard regions of every live allocation.
    ///
    /// Holds the list lock for the whole walk. Returns every violation
    /// found; empty when corruption checking is disabled.
    pub fn check_heap_corruption(&self) -> Vec<GuardViolation> {
        if !self.corruption_check {
            return Vec::new();
        }

        let state = self.state.lock();
        let mut violations = Vec::new();
        let mut rec = state.head;
        while !rec.is_null() {
            unsafe {
                violations.extend(guard::scan_record(self.layout, rec));
                rec = (*rec).next;
            }
        }
        violations
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> TrackerStats {
        let state = self.state.lock();
        TrackerStats {
            live_count: state.live_count,
            live_bytes: state.live_bytes,
            peak_live_bytes: self.peak_live_bytes.load(Ordering::Relaxed),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            total_frees: self.total_frees.load(Ordering::Relaxed),
            max_observed_size: state.max_size,
            max_observed_line: state.max_line,
        }
    }

    /// Walk the live list and verify its structural invariants: the head
    /// has no predecessor, neighbor links agree, and exactly `live_count`
    /// nodes are reachable.
    pub fn check_list_integrity(&self) -> bool {
        let state = self.state.lock();
        let mut visited = 0usize;
        let mut prev: *mut AllocationRecord = ptr::null_mut();
        let mut rec = state.head;
        while !rec.is_null() {
            unsafe {
                if (*rec).prev != prev {
                    return false;
                }
                prev = rec;
                rec = (*rec).next;
            }
            visited += 1;
            if visited > state.live_count {
                return false;
            }
        }
        visited == state.live_count
    }

    fn update_peak(&self, live_bytes: usize) {
        let mut peak = self.peak_live_bytes.load(Ordering::Relaxed);
        while live_bytes > peak {
            match self.peak_live_bytes.compare_exchange_weak(
                peak,
                live_bytes,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }
}
