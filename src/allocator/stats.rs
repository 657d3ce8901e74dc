//! Allocator statistics.
//!
//! [`AtomicAllocatorStats`] is the lock-free register set maintained by the
//! statistics decorator; [`AllocatorStats`] is the plain snapshot handed to
//! callers. Every register is independently atomic: a reader may observe a
//! torn view *across* counters during a concurrent write, but no single
//! counter is ever torn.

use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::utils::{atomic_max, atomic_min};

/// Sentinel for "no successful allocation observed yet".
const NO_ALLOC: usize = usize::MAX;

/// Point-in-time snapshot of allocator statistics.
///
/// All byte figures count *requested* sizes except
/// [`highest_used`](Self::highest_used), which records the backing
/// allocator's own used-bytes reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct AllocatorStats {
    /// Smallest successful allocation size observed; 0 until the first
    /// success.
    pub smallest_alloc: usize,
    /// Largest successful allocation size observed.
    pub largest_alloc: usize,
    /// Highest used-bytes reading observed after a successful allocation or
    /// resize.
    pub highest_used: usize,
    /// Size of the largest failed request.
    pub largest_alloc_failed: usize,
    /// Allocation calls, successful and failed.
    pub total_allocs: u64,
    /// Allocation calls that failed.
    pub total_alloc_fails: u64,
    /// Cumulative bytes obtained by successful allocations and resizes.
    pub total_alloc_bytes: u64,
    /// Resize calls, successful and failed.
    pub total_reallocs: u64,
    /// Resize calls that failed.
    pub total_realloc_fails: u64,
    /// Cumulative bytes by which resizes grew allocations.
    pub total_realloc_growth: u64,
    /// Cumulative bytes by which resizes shrank allocations.
    pub total_realloc_shrink: u64,
    /// Resizes that relocated the block.
    pub total_realloc_moves: u64,
    /// Cumulative bytes relocated by moving resizes.
    pub total_realloc_moved: u64,
    /// Offer calls.
    pub total_offers: u64,
    /// Cumulative usable bytes passed to offer.
    pub total_offer_bytes: u64,
    /// Reclaim calls, hits and misses.
    pub total_reclaims: u64,
    /// Reclaim calls that missed (block evicted meanwhile).
    pub total_reclaim_fails: u64,
    /// Cumulative usable bytes successfully reclaimed.
    pub total_reclaim_bytes: u64,
}

impl AllocatorStats {
    /// Creates an empty snapshot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            smallest_alloc: 0,
            largest_alloc: 0,
            highest_used: 0,
            largest_alloc_failed: 0,
            total_allocs: 0,
            total_alloc_fails: 0,
            total_alloc_bytes: 0,
            total_reallocs: 0,
            total_realloc_fails: 0,
            total_realloc_growth: 0,
            total_realloc_shrink: 0,
            total_realloc_moves: 0,
            total_realloc_moved: 0,
            total_offers: 0,
            total_offer_bytes: 0,
            total_reclaims: 0,
            total_reclaim_fails: 0,
            total_reclaim_bytes: 0,
        }
    }

    /// Fraction of allocation and resize calls that failed, 0.0 to 1.0.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let calls = self.total_allocs + self.total_reallocs;
        if calls == 0 {
            return 0.0;
        }
        let fails = self.total_alloc_fails + self.total_realloc_fails;
        fails as f64 / calls as f64
    }

    /// Whether any operation has been recorded since the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_allocs == 0
            && self.total_reallocs == 0
            && self.total_offers == 0
            && self.total_reclaims == 0
    }
}

impl Default for AllocatorStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Allocator statistics:")?;
        writeln!(
            f,
            "  allocations: {} ({} failed, largest failed request {} bytes)",
            self.total_allocs, self.total_alloc_fails, self.largest_alloc_failed
        )?;
        writeln!(
            f,
            "  sizes: smallest {} / largest {} bytes, {} bytes total",
            self.smallest_alloc, self.largest_alloc, self.total_alloc_bytes
        )?;
        writeln!(f, "  highest usage: {} bytes", self.highest_used)?;
        writeln!(
            f,
            "  resizes: {} ({} failed, {} moved / {} bytes relocated)",
            self.total_reallocs,
            self.total_realloc_fails,
            self.total_realloc_moves,
            self.total_realloc_moved
        )?;
        writeln!(
            f,
            "  resize growth: {} bytes, shrink: {} bytes",
            self.total_realloc_growth, self.total_realloc_shrink
        )?;
        writeln!(
            f,
            "  offers: {} ({} bytes), reclaims: {} ({} missed, {} bytes back)",
            self.total_offers,
            self.total_offer_bytes,
            self.total_reclaims,
            self.total_reclaim_fails,
            self.total_reclaim_bytes
        )
    }
}

/// Lock-free statistics registers.
///
/// Plain counters use relaxed atomic adds; extremal values use the
/// compare-and-retry helpers from [`crate::utils`]. Resetting is a plain
/// store per register and carries no cross-counter atomicity: a reset
/// racing an in-flight operation may observe or miss that operation's
/// contribution.
pub struct AtomicAllocatorStats {
    smallest_alloc: AtomicUsize,
    largest_alloc: AtomicUsize,
    highest_used: AtomicUsize,
    largest_alloc_failed: AtomicUsize,
    total_allocs: AtomicU64,
    total_alloc_fails: AtomicU64,
    total_alloc_bytes: AtomicU64,
    total_reallocs: AtomicU64,
    total_realloc_fails: AtomicU64,
    total_realloc_growth: AtomicU64,
    total_realloc_shrink: AtomicU64,
    total_realloc_moves: AtomicU64,
    total_realloc_moved: AtomicU64,
    total_offers: AtomicU64,
    total_offer_bytes: AtomicU64,
    total_reclaims: AtomicU64,
    total_reclaim_fails: AtomicU64,
    total_reclaim_bytes: AtomicU64,
}

impl AtomicAllocatorStats {
    /// Creates an empty register set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            smallest_alloc: AtomicUsize::new(NO_ALLOC),
            largest_alloc: AtomicUsize::new(0),
            highest_used: AtomicUsize::new(0),
            largest_alloc_failed: AtomicUsize::new(0),
            total_allocs: AtomicU64::new(0),
            total_alloc_fails: AtomicU64::new(0),
            total_alloc_bytes: AtomicU64::new(0),
            total_reallocs: AtomicU64::new(0),
            total_realloc_fails: AtomicU64::new(0),
            total_realloc_growth: AtomicU64::new(0),
            total_realloc_shrink: AtomicU64::new(0),
            total_realloc_moves: AtomicU64::new(0),
            total_realloc_moved: AtomicU64::new(0),
            total_offers: AtomicU64::new(0),
            total_offer_bytes: AtomicU64::new(0),
            total_reclaims: AtomicU64::new(0),
            total_reclaim_fails: AtomicU64::new(0),
            total_reclaim_bytes: AtomicU64::new(0),
        }
    }

    /// Resets every register to its initial state.
    ///
    /// The smallest-allocation register returns to its no-data sentinel and
    /// reports 0 again until the next success.
    pub fn reset(&self) {
        self.smallest_alloc.store(NO_ALLOC, Ordering::Relaxed);
        self.largest_alloc.store(0, Ordering::Relaxed);
        self.highest_used.store(0, Ordering::Relaxed);
        self.largest_alloc_failed.store(0, Ordering::Relaxed);
        self.total_allocs.store(0, Ordering::Relaxed);
        self.total_alloc_fails.store(0, Ordering::Relaxed);
        self.total_alloc_bytes.store(0, Ordering::Relaxed);
        self.total_reallocs.store(0, Ordering::Relaxed);
        self.total_realloc_fails.store(0, Ordering::Relaxed);
        self.total_realloc_growth.store(0, Ordering::Relaxed);
        self.total_realloc_shrink.store(0, Ordering::Relaxed);
        self.total_realloc_moves.store(0, Ordering::Relaxed);
        self.total_realloc_moved.store(0, Ordering::Relaxed);
        self.total_offers.store(0, Ordering::Relaxed);
        self.total_offer_bytes.store(0, Ordering::Relaxed);
        self.total_reclaims.store(0, Ordering::Relaxed);
        self.total_reclaim_fails.store(0, Ordering::Relaxed);
        self.total_reclaim_bytes.store(0, Ordering::Relaxed);
    }

    /// Records an allocation call. Failed calls count too, so this runs
    /// before the outcome is known.
    #[inline]
    pub fn record_alloc_call(&self) {
        self.total_allocs.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a resize call, successful or not.
    #[inline]
    pub fn record_realloc_call(&self) {
        self.total_reallocs.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful allocation of `bytes`, with the backing
    /// allocator's used-bytes reading taken after the call.
    pub fn record_alloc_success(&self, bytes: usize, used_now: usize) {
        self.total_alloc_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
        atomic_max(&self.largest_alloc, bytes);
        atomic_min(&self.smallest_alloc, bytes);
        atomic_max(&self.highest_used, used_now);
    }

    /// Records a failed allocation of `bytes`.
    pub fn record_alloc_failure(&self, bytes: usize) {
        self.total_alloc_fails.fetch_add(1, Ordering::Relaxed);
        atomic_max(&self.largest_alloc_failed, bytes);
    }

    /// Records a successful resize to `bytes`.
    ///
    /// `prior_usable` is the block's usable size before the call, `moved`
    /// whether the block was relocated, `used_now` the backing allocator's
    /// used-bytes reading after the call.
    pub fn record_realloc_success(
        &self,
        bytes: usize,
        prior_usable: usize,
        moved: bool,
        used_now: usize,
    ) {
        self.total_alloc_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
        atomic_max(&self.largest_alloc, bytes);
        atomic_min(&self.smallest_alloc, bytes);
        atomic_max(&self.highest_used, used_now);

        if moved {
            self.total_realloc_moves.fetch_add(1, Ordering::Relaxed);
            self.total_realloc_moved
                .fetch_add(bytes as u64, Ordering::Relaxed);
        }

        if prior_usable < bytes {
            self.total_realloc_growth
                .fetch_add((bytes - prior_usable) as u64, Ordering::Relaxed);
        } else if prior_usable > bytes {
            self.total_realloc_shrink
                .fetch_add((prior_usable - bytes) as u64, Ordering::Relaxed);
        }
    }

    /// Records a failed resize to `bytes`.
    pub fn record_realloc_failure(&self, bytes: usize) {
        self.total_realloc_fails.fetch_add(1, Ordering::Relaxed);
        atomic_max(&self.largest_alloc_failed, bytes);
    }

    /// Records an offer of a block whose usable size is `bytes`.
    #[inline]
    pub fn record_offer(&self, bytes: usize) {
        self.total_offers.fetch_add(1, Ordering::Relaxed);
        self.total_offer_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records a reclaim call before its outcome is known.
    #[inline]
    pub fn record_reclaim_call(&self) {
        self.total_reclaims.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a reclaim that returned the block, of usable size `bytes`.
    #[inline]
    pub fn record_reclaim_hit(&self, bytes: usize) {
        self.total_reclaim_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records a reclaim that missed because the block was evicted.
    #[inline]
    pub fn record_reclaim_miss(&self) {
        self.total_reclaim_fails.fetch_add(1, Ordering::Relaxed);
    }

    /// Smallest successful allocation, 0 until the first success.
    #[must_use]
    pub fn smallest_alloc(&self) -> usize {
        match self.smallest_alloc.load(Ordering::Relaxed) {
            NO_ALLOC => 0,
            observed => observed,
        }
    }

    /// Largest successful allocation.
    #[must_use]
    pub fn largest_alloc(&self) -> usize {
        self.largest_alloc.load(Ordering::Relaxed)
    }

    /// Highest used-bytes reading observed.
    #[must_use]
    pub fn highest_used(&self) -> usize {
        self.highest_used.load(Ordering::Relaxed)
    }

    /// Allocation call count.
    #[must_use]
    pub fn total_allocs(&self) -> u64 {
        self.total_allocs.load(Ordering::Relaxed)
    }

    /// Failed allocation count.
    #[must_use]
    pub fn total_alloc_fails(&self) -> u64 {
        self.total_alloc_fails.load(Ordering::Relaxed)
    }

    /// Takes a snapshot of every register.
    ///
    /// Each field is individually consistent; the set as a whole is not
    /// guaranteed consistent against concurrent writers.
    #[must_use]
    pub fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            smallest_alloc: self.smallest_alloc(),
            largest_alloc: self.largest_alloc.load(Ordering::Relaxed),
            highest_used: self.highest_used.load(Ordering::Relaxed),
            largest_alloc_failed: self.largest_alloc_failed.load(Ordering::Relaxed),
            total_allocs: self.total_allocs.load(Ordering::Relaxed),
            total_alloc_fails: self.total_alloc_fails.load(Ordering::Relaxed),
            total_alloc_bytes: self.total_alloc_bytes.load(Ordering::Relaxed),
            total_reallocs: self.total_reallocs.load(Ordering::Relaxed),
            total_realloc_fails: self.total_realloc_fails.load(Ordering::Relaxed),
            total_realloc_growth: self.total_realloc_growth.load(Ordering::Relaxed),
            total_realloc_shrink: self.total_realloc_shrink.load(Ordering::Relaxed),
            total_realloc_moves: self.total_realloc_moves.load(Ordering::Relaxed),
            total_realloc_moved: self.total_realloc_moved.load(Ordering::Relaxed),
            total_offers: self.total_offers.load(Ordering::Relaxed),
            total_offer_bytes: self.total_offer_bytes.load(Ordering::Relaxed),
            total_reclaims: self.total_reclaims.load(Ordering::Relaxed),
            total_reclaim_fails: self.total_reclaim_fails.load(Ordering::Relaxed),
            total_reclaim_bytes: self.total_reclaim_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for AtomicAllocatorStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AtomicAllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicAllocatorStats")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Trait for allocators that expose collected statistics.
pub trait StatisticsProvider {
    /// Current statistics snapshot.
    fn statistics(&self) -> AllocatorStats;

    /// Resets every counter to its initial state.
    fn reset_statistics(&self);
}
