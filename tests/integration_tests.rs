//! Integration tests for leaktrack.
//!
//! Most tests drive an explicit `LeakTracker` instance so they can run in
//! parallel; the process-wide lifecycle is exercised by a single
//! self-contained test at the bottom.

use std::sync::Arc;
use std::thread;

use leaktrack::{
    lt_alloc, lt_free, CallSite, FreeOutcome, GuardRegion, LeakTracker, TrackerConfig,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn plain_tracker() -> LeakTracker {
    LeakTracker::new(&TrackerConfig::default())
}

fn guarded_tracker(guard: usize) -> LeakTracker {
    LeakTracker::new(
        &TrackerConfig::default()
            .with_corruption_check(true)
            .with_guard_region_size(guard),
    )
}

#[test]
fn test_round_trip_leaves_list_unchanged() {
    init_logging();
    let tracker = plain_tracker();

    let before_a = tracker.alloc(16, Some(CallSite::new("a.c", 1)));
    let before_b = tracker.alloc(32, Some(CallSite::new("a.c", 2)));
    let baseline = tracker.leak_snapshot();

    let ptr = tracker.alloc(64, Some(CallSite::new("a.c", 3)));
    assert!(!ptr.is_null());
    unsafe {
        assert_eq!(tracker.free(ptr), FreeOutcome::Released);
    }

    // Same nodes, same order as before the alloc.
    let after = tracker.leak_snapshot();
    assert_eq!(after.live_count, baseline.live_count);
    assert_eq!(after.records, baseline.records);
    assert!(tracker.check_list_integrity());

    unsafe {
        tracker.free(before_a);
        tracker.free(before_b);
    }
}

#[test]
fn test_leak_report_enumerates_every_record() {
    init_logging();
    let tracker = plain_tracker();

    let count = 5;
    let mut ptrs = Vec::new();
    for i in 0..count {
        ptrs.push(tracker.alloc(10 * (i + 1), Some(CallSite::new("scene.rs", 100 + i as u32))));
    }

    let snapshot = tracker.leak_snapshot();
    assert_eq!(snapshot.live_count, count);
    assert_eq!(snapshot.records.len(), count);
    // Head insertion: most recent first.
    for (slot, i) in snapshot.records.iter().zip((0..count).rev()) {
        assert_eq!(slot.size, 10 * (i + 1));
        assert_eq!(slot.file, "scene.rs");
        assert_eq!(slot.line, 100 + i as u32);
    }

    // The printed report walks the same list; exercise it for coverage.
    tracker.print_memory_leaks();

    for ptr in ptrs {
        unsafe {
            tracker.free(ptr);
        }
    }
    assert!(tracker.leak_snapshot().is_clean());
}

#[test]
fn test_interleaved_alloc_free_keeps_list_consistent() {
    init_logging();
    let tracker = plain_tracker();
    let mut live = Vec::new();

    for round in 0..50u32 {
        let ptr = tracker.alloc(8 + (round as usize % 7) * 16, Some(CallSite::new("mix.rs", round)));
        live.push(ptr);
        // Free from the middle every third round to hit head, middle and
        // tail unlink paths.
        if round % 3 == 0 && live.len() > 1 {
            let victim = live.remove(live.len() / 2);
            unsafe {
                assert_eq!(tracker.free(victim), FreeOutcome::Released);
            }
        }
        assert!(tracker.check_list_integrity());
    }

    assert_eq!(tracker.stats().live_count, live.len());
    for ptr in live {
        unsafe {
            tracker.free(ptr);
        }
    }
    assert!(tracker.check_list_integrity());
    assert_eq!(tracker.stats().live_count, 0);
}

#[test]
fn test_passthrough_allocation_is_never_tracked() {
    init_logging();
    let tracker = plain_tracker();

    let a = tracker.alloc(128, None);
    let b = tracker.alloc(256, None);
    assert!(!a.is_null() && !b.is_null());
    assert!(tracker.leak_snapshot().is_clean());

    unsafe {
        assert_eq!(tracker.free(a), FreeOutcome::Passthrough);
        // Never freeing `b` must still not show up anywhere.
    }
    assert!(tracker.leak_snapshot().is_clean());
    assert_eq!(tracker.stats().total_allocations, 0);

    unsafe {
        tracker.free(b);
    }
}

#[test]
fn test_guard_detects_write_before_payload() {
    init_logging();
    let tracker = guarded_tracker(64);
    let ptr = tracker.alloc(48, Some(CallSite::new("mesh.rs", 7)));

    unsafe {
        // Clobber the last byte of the leading guard.
        *ptr.sub(1) = 0xFF;

        let violations = tracker.check_corruption_at(ptr);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].region, GuardRegion::Before);
        assert_eq!(violations[0].address, ptr as usize);
        assert_eq!(violations[0].size, 48);
        assert_eq!(violations[0].file, "mesh.rs");
        assert_eq!(violations[0].line, 7);
        assert_eq!(violations[0].offset, 63);

        // The free still releases the memory; only the guard is suspect.
        assert_eq!(tracker.free(ptr), FreeOutcome::Released);
    }
}

#[test]
fn test_guard_detects_write_after_payload() {
    init_logging();
    let tracker = guarded_tracker(64);
    let size = 48;
    let ptr = tracker.alloc(size, Some(CallSite::new("mesh.rs", 9)));

    unsafe {
        // Clobber the first byte past the payload.
        *ptr.add(size) = 0xAA;

        let violations = tracker.check_corruption_at(ptr);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].region, GuardRegion::After);
        assert_eq!(violations[0].offset, 0);

        assert_eq!(tracker.free(ptr), FreeOutcome::Released);
    }
}

#[test]
fn test_clean_allocation_has_no_violations() {
    init_logging();
    let tracker = guarded_tracker(64);
    let ptr = tracker.alloc(48, Some(CallSite::new("mesh.rs", 11)));

    unsafe {
        // Writing the entire payload must not trip either guard.
        ptr.write_bytes(0xEE, 48);
        assert!(tracker.check_corruption_at(ptr).is_empty());
        assert!(tracker.check_heap_corruption().is_empty());
        tracker.free(ptr);
    }
}

#[test]
fn test_whole_heap_scan_finds_each_corrupted_record() {
    init_logging();
    let tracker = guarded_tracker(32);
    let clean = tracker.alloc(16, Some(CallSite::new("audio.rs", 1)));
    let dirty_a = tracker.alloc(16, Some(CallSite::new("audio.rs", 2)));
    let dirty_b = tracker.alloc(16, Some(CallSite::new("audio.rs", 3)));

    unsafe {
        *dirty_a.sub(1) = 1;
        *dirty_b.add(16) = 1;

        let violations = tracker.check_heap_corruption();
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.line == 2 && v.region == GuardRegion::Before));
        assert!(violations.iter().any(|v| v.line == 3 && v.region == GuardRegion::After));

        tracker.free(clean);
        tracker.free(dirty_a);
        tracker.free(dirty_b);
    }
}

#[test]
fn test_concrete_leak_scenario() {
    init_logging();
    // Plain tracking, two allocations, one freed: the report must show
    // exactly the unfreed one.
    let tracker = LeakTracker::new(&TrackerConfig::default().with_corruption_check(false));

    let ptr_a = tracker.alloc(64, Some(CallSite::new("a.c", 10)));
    let ptr_b = tracker.alloc(128, Some(CallSite::new("a.c", 20)));
    assert!(!ptr_a.is_null() && !ptr_b.is_null());

    unsafe {
        assert_eq!(tracker.free(ptr_a), FreeOutcome::Released);
    }

    let snapshot = tracker.leak_snapshot();
    assert_eq!(snapshot.live_count, 1);
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].size, 128);
    assert_eq!(snapshot.records[0].file, "a.c");
    assert_eq!(snapshot.records[0].line, 20);
    tracker.print_memory_leaks();

    unsafe {
        tracker.free(ptr_b);
    }
}

#[test]
fn test_guarded_payload_is_fully_usable() {
    init_logging();
    let tracker = guarded_tracker(128);
    let size = 1024;
    let ptr = tracker.alloc(size, Some(CallSite::new("buf.rs", 5)));

    unsafe {
        for i in 0..size {
            *ptr.add(i) = (i % 251) as u8;
        }
        for i in 0..size {
            assert_eq!(*ptr.add(i), (i % 251) as u8);
        }
        assert!(tracker.check_corruption_at(ptr).is_empty());
        tracker.free(ptr);
    }
}

// ============ GLOBAL LIFECYCLE ============

// Everything touching the process-wide handle lives in this one test so
// parallel test threads never observe each other's tracker.
#[test]
fn test_global_lifecycle() {
    init_logging();

    assert!(!leaktrack::is_active());
    assert!(leaktrack::init(TrackerConfig::default()));
    assert!(leaktrack::is_active());

    // Repeat init is ignored.
    assert!(!leaktrack::init(TrackerConfig::paranoid()));

    let ptr_a = lt_alloc!(64);
    let ptr_b = lt_alloc!(128);
    let array = lt_alloc_array_helper();
    let untracked = leaktrack::try_alloc(32);
    assert!(!untracked.is_null());

    let tracker = leaktrack::tracker().expect("tracker is active");
    assert_eq!(tracker.stats().live_count, 3);
    // Plain mode: the whole-heap scan has nothing to check.
    assert!(leaktrack::check_heap_corruption().is_empty());

    unsafe {
        lt_free!(ptr_a);
        lt_free!(array);
        leaktrack::free(untracked);
    }
    assert_eq!(tracker.stats().live_count, 1);

    let snapshot = tracker.leak_snapshot();
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].size, 128);
    assert!(snapshot.records[0].file.ends_with("integration_tests.rs"));

    // Close deactivates before reporting; a second close is a no-op.
    leaktrack::close();
    assert!(!leaktrack::is_active());
    leaktrack::close();

    // ptr_b is the intentional leak the report enumerated. It cannot be
    // released once its tracker is gone, so it stays allocated for the
    // remainder of the test process.
    let _ = ptr_b;

    // With no tracker the hooks are pure passthrough.
    let raw = lt_alloc!(16);
    assert!(!raw.is_null());
    unsafe {
        lt_free!(raw);
    }

    // A fresh init after close starts a new cycle.
    assert!(leaktrack::init(TrackerConfig::default()));
    let ptr_c = lt_alloc!(8);
    unsafe {
        lt_free!(ptr_c);
    }
    leaktrack::close();
    assert!(!leaktrack::is_active());
}

fn lt_alloc_array_helper() -> *mut u8 {
    leaktrack::lt_alloc_array!(16, 4)
}

// ============ MULTI-THREADED TESTS ============

#[test]
fn test_multithread_alloc_free_storm() {
    init_logging();
    let tracker = Arc::new(plain_tracker());
    let num_threads = 4;
    let rounds = 200;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                let mut live = Vec::new();
                for round in 0..rounds {
                    let size = 1 + (thread_id * 31 + round * 7) % 512;
                    let ptr = tracker.alloc(size, Some(CallSite::new("storm.rs", round as u32)));
                    assert!(!ptr.is_null());
                    live.push(ptr);
                    if round % 2 == 0 {
                        let victim = live.swap_remove(live.len() / 2);
                        unsafe {
                            assert_eq!(tracker.free(victim), FreeOutcome::Released);
                        }
                    }
                }
                for ptr in live {
                    unsafe {
                        assert_eq!(tracker.free(ptr), FreeOutcome::Released);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(tracker.check_list_integrity());
    let stats = tracker.stats();
    assert_eq!(stats.live_count, 0);
    assert_eq!(stats.total_allocations, (num_threads * rounds) as u64);
    assert_eq!(stats.total_frees, stats.total_allocations);
}

#[test]
fn test_multithread_guarded_traffic() {
    init_logging();
    let tracker = Arc::new(guarded_tracker(32));
    let num_threads = 4;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                for round in 0..100u32 {
                    let size = 16 + (round as usize % 64);
                    let ptr =
                        tracker.alloc(size, Some(CallSite::new("worker.rs", thread_id * 1000 + round)));
                    unsafe {
                        ptr.write_bytes(0x5A, size);
                        assert!(tracker.check_corruption_at(ptr).is_empty());
                        assert_eq!(tracker.free(ptr), FreeOutcome::Released);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(tracker.leak_snapshot().is_clean());
    assert!(tracker.check_heap_corruption().is_empty());
}
