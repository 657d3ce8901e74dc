//! Integration tests for the statistics decorator over the system-backed
//! allocator.

use std::sync::Arc;

use metered_alloc::{RawAllocator, StatsAllocator, StatsExt, SystemAllocator};

#[test]
fn test_mixed_success_and_failure_scenario() {
    // 10 bytes and 1000 bytes succeed, 5000 bytes fails on a capacity of
    // 2048 (headers included).
    let alloc = SystemAllocator::with_capacity(2048).with_stats();

    unsafe {
        let small = alloc.allocate(10, 8).expect("10 bytes fits");
        let large = alloc.allocate(1000, 8).expect("1000 bytes fits");
        assert!(alloc.allocate(5000, 8).is_err());

        alloc.free(Some(small));
        alloc.free(Some(large));
    }

    let stats = alloc.snapshot();
    assert_eq!(stats.total_allocs, 3);
    assert_eq!(stats.total_alloc_fails, 1);
    assert_eq!(stats.largest_alloc_failed, 5000);
    assert_eq!(stats.smallest_alloc, 10);
    assert_eq!(stats.largest_alloc, 1000);
    assert_eq!(stats.total_alloc_bytes, 1010);
}

#[test]
fn test_extremal_bounds_hold_at_every_point() {
    let alloc = SystemAllocator::new().with_stats();
    let sizes = [512usize, 33, 4096, 64, 7, 1024];
    let mut handles = Vec::new();

    let mut seen_min = usize::MAX;
    let mut seen_max = 0usize;
    for size in sizes {
        handles.push(unsafe { alloc.allocate(size, 8).unwrap() });
        seen_min = seen_min.min(size);
        seen_max = seen_max.max(size);

        let stats = alloc.snapshot();
        assert!(stats.smallest_alloc <= seen_min);
        assert!(stats.largest_alloc >= seen_max);
    }

    for handle in handles {
        unsafe { alloc.free(Some(handle)) };
    }
}

#[test]
fn test_smallest_reports_zero_before_first_success() {
    let alloc = SystemAllocator::with_capacity(64).with_stats();

    assert_eq!(alloc.smallest_alloc(), 0);

    // A failure alone does not populate the extremals.
    assert!(unsafe { alloc.allocate(4096, 8) }.is_err());
    assert_eq!(alloc.smallest_alloc(), 0);
    assert_eq!(alloc.largest_alloc(), 0);

    let ptr = unsafe { alloc.allocate(16, 8) }.unwrap();
    assert_eq!(alloc.smallest_alloc(), 16);
    unsafe { alloc.free(Some(ptr)) };
}

#[test]
fn test_call_count_is_successes_plus_failures() {
    let alloc = SystemAllocator::with_capacity(1024).with_stats();
    let mut successes = 0u64;
    let mut failures = 0u64;

    for size in [100, 2000, 300, 5000, 50] {
        match unsafe { alloc.allocate(size, 8) } {
            Ok(ptr) => {
                successes += 1;
                unsafe { alloc.free(Some(ptr)) };
            }
            Err(_) => failures += 1,
        }
    }

    let stats = alloc.snapshot();
    assert_eq!(stats.total_allocs, successes + failures);
    assert_eq!(stats.total_alloc_fails, failures);
    assert_eq!(failures, 2);
}

#[test]
fn test_resize_growth_and_shrink_are_exact_and_exclusive() {
    let alloc = SystemAllocator::new().with_stats();

    unsafe {
        let ptr = alloc.allocate(100, 8).unwrap();

        let ptr = alloc.resize(ptr, 350, 8).unwrap();
        let after_growth = alloc.snapshot();
        assert_eq!(after_growth.total_realloc_growth, 250);
        assert_eq!(after_growth.total_realloc_shrink, 0);

        let ptr = alloc.resize(ptr, 90, 8).unwrap();
        let after_shrink = alloc.snapshot();
        assert_eq!(after_shrink.total_realloc_growth, 250);
        assert_eq!(after_shrink.total_realloc_shrink, 260);

        // Same-size resize records neither.
        let ptr = alloc.resize(ptr, 90, 8).unwrap();
        let after_same = alloc.snapshot();
        assert_eq!(after_same.total_realloc_growth, 250);
        assert_eq!(after_same.total_realloc_shrink, 260);
        assert_eq!(after_same.total_reallocs, 3);

        alloc.free(Some(ptr));
    }
}

#[test]
fn test_relocating_resize_counts_moves() {
    let alloc = SystemAllocator::new().with_stats();

    unsafe {
        let ptr = alloc.allocate(64, 8).unwrap();
        // Changing the alignment class forces a relocation.
        let moved = alloc.resize(ptr, 64, 512).unwrap();
        assert_ne!(moved, ptr);

        let stats = alloc.snapshot();
        assert_eq!(stats.total_realloc_moves, 1);
        assert_eq!(stats.total_realloc_moved, 64);

        alloc.free(Some(moved));
    }
}

#[test]
fn test_reset_counters_does_not_free_memory() {
    let alloc = SystemAllocator::new().with_stats();

    let ptr = unsafe { alloc.allocate(128, 8) }.unwrap();
    unsafe { ptr.as_ptr().write_bytes(0xC3, 128) };

    alloc.reset_counters();

    let stats = alloc.snapshot();
    assert!(stats.is_empty());
    assert_eq!(stats.smallest_alloc, 0);
    assert_eq!(stats.largest_alloc, 0);
    assert_eq!(stats.highest_used, 0);

    // The live allocation is untouched by the counter reset.
    assert!(alloc.used_bytes() >= 128);
    unsafe {
        assert_eq!(*ptr.as_ptr(), 0xC3);
        assert_eq!(alloc.usable_size(ptr), 128);
        alloc.free(Some(ptr));
    }
}

#[test]
fn test_reset_forwards_after_zeroing_counters() {
    let alloc = SystemAllocator::new().with_stats();

    unsafe {
        let _ = alloc.allocate(64, 8).unwrap();
        let _ = alloc.allocate(32, 8).unwrap();
        alloc.reset();
    }

    assert!(alloc.snapshot().is_empty());
    assert_eq!(alloc.used_bytes(), 0);
    assert_eq!(alloc.inner().live_blocks(), 0);
}

#[test]
fn test_watermark_tracks_peak_usage() {
    let alloc = SystemAllocator::new().with_stats();

    unsafe {
        let a = alloc.allocate(1000, 8).unwrap();
        let peak_used = alloc.used_bytes();
        alloc.free(Some(a));

        let b = alloc.allocate(10, 8).unwrap();
        let stats = alloc.snapshot();
        assert!(stats.highest_used >= peak_used);
        alloc.free(Some(b));
    }
}

#[test]
fn test_forwarding_returns_backing_values() {
    let backing = SystemAllocator::with_capacity(8192);
    let alloc = StatsAllocator::new(backing);

    assert_eq!(alloc.total_bytes(), 8192);
    assert_eq!(alloc.free_bytes(), 8192);

    unsafe {
        let ptr = alloc.allocate(64, 8).unwrap();
        assert_eq!(alloc.used_bytes(), alloc.inner().used_bytes());
        assert_eq!(alloc.usable_size(ptr), 64);
        alloc.free(Some(ptr));
    }
}

#[test]
fn test_concurrent_counters_are_coherent() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 200;

    let alloc = Arc::new(SystemAllocator::new().with_stats());
    let mut workers = Vec::new();

    for thread in 0..THREADS {
        let alloc = Arc::clone(&alloc);
        workers.push(std::thread::spawn(move || {
            for i in 0..PER_THREAD {
                let size = 8 + thread * 1000 + i;
                unsafe {
                    let ptr = alloc.allocate(size, 8).unwrap();
                    alloc.free(Some(ptr));
                }
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = alloc.snapshot();
    assert_eq!(stats.total_allocs, (THREADS * PER_THREAD) as u64);
    assert_eq!(stats.total_alloc_fails, 0);
    assert_eq!(stats.smallest_alloc, 8);
    assert_eq!(stats.largest_alloc, 8 + (THREADS - 1) * 1000 + PER_THREAD - 1);

    let expected_bytes: u64 = (0..THREADS)
        .flat_map(|t| (0..PER_THREAD).map(move |i| (8 + t * 1000 + i) as u64))
        .sum();
    assert_eq!(stats.total_alloc_bytes, expected_bytes);
}

#[test]
fn test_decorator_chaining() {
    // The decorator implements the contract itself, so it can be wrapped
    // again; both layers observe the same traffic.
    let alloc = SystemAllocator::new().with_stats().with_stats();

    unsafe {
        let ptr = alloc.allocate(64, 8).unwrap();
        alloc.free(Some(ptr));
    }

    assert_eq!(alloc.total_allocs(), 1);
    assert_eq!(alloc.inner().total_allocs(), 1);
}
