//! Object-capable heap allocator.
//!
//! [`Heap`] layers per-allocation finalizers and the offer/reclaim/purge
//! protocol over the system heap. Blocks live in a registry keyed by
//! address; offered blocks move to an eviction queue ordered by insertion,
//! so purging evicts FIFO within a priority class. Offer tickets are boxed
//! tokens: a ticket that is never consumed leaks its token box, and purging
//! never touches outstanding tickets.
//!
//! Finalizers run outside the registry lock, but must still not call back
//! into the allocator that is invalidating their block.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

#[cfg(feature = "logging")]
use tracing::debug;

use super::system::SystemAllocator;
use super::traits::{Finalizer, ObjectAllocator, OfferTicket, RawAllocator, ThreadSafeAllocator};
use crate::error::AllocResult;

/// Configuration for a [`Heap`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapConfig {
    /// Maximum bytes the heap may provision, overhead included.
    /// `None` means unbounded.
    pub capacity: Option<usize>,
    /// Ceiling on bytes held in the offered state. An offer that would
    /// exceed it evicts the block immediately instead of parking it.
    /// `None` means offers always park.
    pub pending_limit: Option<usize>,
}

/// Metadata for a block in the live state.
#[derive(Debug)]
struct LiveBlock {
    size: usize,
    finalizer: Option<Finalizer>,
}

/// Metadata for a block parked in the offered state.
#[derive(Debug)]
struct OfferedBlock {
    addr: usize,
    size: usize,
    priority: u32,
    finalizer: Option<Finalizer>,
}

impl OfferedBlock {
    fn ptr(&self) -> NonNull<u8> {
        // SAFETY: addr was taken from a NonNull handle when the block was
        // offered.
        unsafe { NonNull::new_unchecked(self.addr as *mut u8) }
    }
}

/// Token box behind a live [`OfferTicket`].
struct OfferNode {
    token: u64,
}

#[derive(Debug)]
struct HeapState {
    live: HashMap<usize, LiveBlock>,
    /// Keyed by issue order, so in-order iteration is FIFO.
    offered: BTreeMap<u64, OfferedBlock>,
    next_token: u64,
}

/// Object-capable allocator over the system heap.
///
/// Thread-safe; a single instance may be shared freely. Finalizers must not
/// panic and must not re-enter the heap.
///
/// # Examples
///
/// ```
/// use metered_alloc::{Heap, ObjectAllocator, RawAllocator};
///
/// let heap = Heap::new();
/// unsafe {
///     let block = heap.allocate_with(256, None, 16)?;
///     let ticket = heap.offer(block, 1);
///     // Nothing evicted it, so the block comes back intact.
///     let restored = heap.reclaim(ticket).expect("still parked");
///     heap.free(Some(restored));
/// }
/// # Ok::<(), metered_alloc::AllocError>(())
/// ```
#[derive(Debug)]
pub struct Heap {
    system: SystemAllocator,
    pending_limit: Option<usize>,
    pending: AtomicUsize,
    state: Mutex<HeapState>,
}

impl Heap {
    /// Creates an unbounded heap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Creates a heap with the given configuration.
    #[must_use]
    pub fn with_config(config: HeapConfig) -> Self {
        let system = match config.capacity {
            Some(capacity) => SystemAllocator::with_capacity(capacity),
            None => SystemAllocator::new(),
        };
        Self {
            system,
            pending_limit: config.pending_limit,
            pending: AtomicUsize::new(0),
            state: Mutex::new(HeapState {
                live: HashMap::new(),
                offered: BTreeMap::new(),
                next_token: 0,
            }),
        }
    }

    /// Number of blocks currently in the live state.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of blocks currently parked in the offered state.
    #[must_use]
    pub fn offered_blocks(&self) -> usize {
        self.state.lock().offered.len()
    }

    /// Shared allocate path for both trait tiers.
    unsafe fn alloc_impl(
        &self,
        size: usize,
        finalizer: Option<Finalizer>,
        align: usize,
    ) -> AllocResult<NonNull<u8>> {
        // SAFETY: same contract as the caller's.
        let ptr = unsafe { self.system.allocate(size, align) }?;
        self.state
            .lock()
            .live
            .insert(ptr.as_ptr() as usize, LiveBlock { size, finalizer });
        Ok(ptr)
    }

    /// Shared resize path. `finalizer_update` of `None` keeps the block's
    /// registered finalizer.
    unsafe fn resize_impl(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        align: usize,
        finalizer_update: Option<Option<Finalizer>>,
    ) -> AllocResult<NonNull<u8>> {
        // SAFETY: same contract as the caller's; on failure the block and
        // its registration are untouched.
        let new_ptr = unsafe { self.system.resize(ptr, new_size, align) }?;

        let mut state = self.state.lock();
        let prior = state.live.remove(&(ptr.as_ptr() as usize));
        debug_assert!(prior.is_some(), "resized pointer is not a live block");
        let finalizer = match finalizer_update {
            Some(replacement) => replacement,
            None => prior.and_then(|block| block.finalizer),
        };
        state.live.insert(
            new_ptr.as_ptr() as usize,
            LiveBlock {
                size: new_size,
                finalizer,
            },
        );
        Ok(new_ptr)
    }

    /// Runs a block's finalizer and releases its memory.
    unsafe fn invalidate(&self, ptr: NonNull<u8>, finalizer: Option<Finalizer>) {
        if let Some(finalizer) = finalizer {
            finalizer(ptr);
        }
        // SAFETY: the block is live in the backing system allocator.
        unsafe { self.system.free(Some(ptr)) };
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: block memory and its validity rules come from the backing system
// allocator; the registry only adds metadata and never hands out aliases.
unsafe impl RawAllocator for Heap {
    unsafe fn allocate(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.alloc_impl(size, None, align) }
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };

        let block = self.state.lock().live.remove(&(ptr.as_ptr() as usize));
        debug_assert!(block.is_some(), "freed pointer is not a live block");
        let finalizer = block.and_then(|block| block.finalizer);
        // SAFETY: ptr is live (caller contract) and now unregistered.
        unsafe { self.invalidate(ptr, finalizer) };
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        align: usize,
    ) -> AllocResult<NonNull<u8>> {
        // Keeps the registered finalizer.
        // SAFETY: forwarded caller contract.
        unsafe { self.resize_impl(ptr, new_size, align, None) }
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        // SAFETY: forwarded caller contract.
        unsafe { self.system.usable_size(ptr) }
    }

    unsafe fn reset(&self) {
        // No finalizers on reset; clear() is the graceful variant.
        let mut state = self.state.lock();
        state.live.clear();
        state.offered.clear();
        self.pending.store(0, Ordering::Relaxed);
        drop(state);
        // SAFETY: every handle is invalidated with the registry.
        unsafe { self.system.reset() };
    }

    fn free_bytes(&self) -> usize {
        self.system.free_bytes()
    }

    fn used_bytes(&self) -> usize {
        self.system.used_bytes()
    }

    fn total_bytes(&self) -> usize {
        self.system.total_bytes()
    }
}

// SAFETY: finalizers are invoked exactly once per block on every
// invalidation path: free, immediate eviction at offer, purge, and clear.
unsafe impl ObjectAllocator for Heap {
    unsafe fn allocate_with(
        &self,
        size: usize,
        finalizer: Option<Finalizer>,
        align: usize,
    ) -> AllocResult<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.alloc_impl(size, finalizer, align) }
    }

    unsafe fn resize_with(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        finalizer: Option<Finalizer>,
        align: usize,
    ) -> AllocResult<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.resize_impl(ptr, new_size, align, Some(finalizer)) }
    }

    unsafe fn offer(&self, ptr: NonNull<u8>, priority: u32) -> OfferTicket {
        let addr = ptr.as_ptr() as usize;
        let mut state = self.state.lock();
        let block = state.live.remove(&addr);
        debug_assert!(block.is_some(), "offered pointer is not a live block");
        let Some(block) = block else {
            return OfferTicket::evicted();
        };

        if let Some(limit) = self.pending_limit {
            if self.pending.load(Ordering::Relaxed) + block.size > limit {
                drop(state);
                #[cfg(feature = "logging")]
                debug!(bytes = block.size, priority, "offer evicted immediately");
                // SAFETY: ptr is live (caller contract) and now unregistered.
                unsafe { self.invalidate(ptr, block.finalizer) };
                return OfferTicket::evicted();
            }
        }

        let token = state.next_token;
        state.next_token += 1;
        state.offered.insert(
            token,
            OfferedBlock {
                addr,
                size: block.size,
                priority,
                finalizer: block.finalizer,
            },
        );
        self.pending.fetch_add(block.size, Ordering::Relaxed);
        drop(state);

        let node = Box::into_raw(Box::new(OfferNode { token }));
        // SAFETY: Box::into_raw never returns null.
        OfferTicket::new(unsafe { NonNull::new_unchecked(node.cast::<u8>()) })
    }

    unsafe fn reclaim(&self, ticket: OfferTicket) -> Option<NonNull<u8>> {
        let node_ptr = ticket.into_token()?;
        // SAFETY: a live ticket from this heap wraps a boxed OfferNode
        // (caller contract); consuming the ticket consumes the box.
        let token = unsafe { Box::from_raw(node_ptr.cast::<OfferNode>().as_ptr()) }.token;

        let mut state = self.state.lock();
        let block = state.offered.remove(&token)?;
        self.pending.fetch_sub(block.size, Ordering::Relaxed);
        let ptr = block.ptr();
        state.live.insert(
            block.addr,
            LiveBlock {
                size: block.size,
                finalizer: block.finalizer,
            },
        );
        Some(ptr)
    }

    unsafe fn purge(&self, priority_ceiling: u32) {
        let mut state = self.state.lock();
        let victims: Vec<u64> = state
            .offered
            .iter()
            .filter(|(_, block)| block.priority <= priority_ceiling)
            .map(|(token, _)| *token)
            .collect();

        // Tokens ascend in offer order, so eviction is FIFO within (and
        // across) priority classes.
        let mut evicted = Vec::with_capacity(victims.len());
        for token in victims {
            if let Some(block) = state.offered.remove(&token) {
                self.pending.fetch_sub(block.size, Ordering::Relaxed);
                evicted.push(block);
            }
        }
        drop(state);

        #[cfg(feature = "logging")]
        debug!(
            blocks = evicted.len(),
            priority_ceiling, "purged offered blocks"
        );

        for block in evicted {
            // SAFETY: offered blocks are unreachable to callers until
            // reclaimed; their tickets will now report a miss.
            unsafe { self.invalidate(block.ptr(), block.finalizer) };
        }
    }

    unsafe fn clear(&self) {
        let mut state = self.state.lock();
        let live: Vec<(usize, LiveBlock)> = state.live.drain().collect();
        let offered = core::mem::take(&mut state.offered);
        self.pending.store(0, Ordering::Relaxed);
        drop(state);

        #[cfg(feature = "logging")]
        debug!(
            live = live.len(),
            offered = offered.len(),
            "cleared all blocks"
        );

        for (addr, block) in live {
            // SAFETY: every registered live block is valid until this
            // invalidation.
            unsafe {
                self.invalidate(
                    NonNull::new_unchecked(addr as *mut u8),
                    block.finalizer,
                );
            }
        }
        for (_, block) in offered {
            // SAFETY: as above; outstanding tickets will report a miss.
            unsafe { self.invalidate(block.ptr(), block.finalizer) };
        }
    }

    fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

// SAFETY: registry behind a mutex, pending counter atomic, backing system
// allocator thread-safe.
unsafe impl ThreadSafeAllocator for Heap {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn test_finalizer_runs_on_free() {
        static RUNS: StdAtomicUsize = StdAtomicUsize::new(0);
        fn count(_ptr: NonNull<u8>) {
            RUNS.fetch_add(1, Ordering::Relaxed);
        }

        let heap = Heap::new();
        unsafe {
            let ptr = heap.allocate_with(32, Some(count), 8).unwrap();
            assert_eq!(RUNS.load(Ordering::Relaxed), 0);
            heap.free(Some(ptr));
        }
        assert_eq!(RUNS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_offer_reclaim_preserves_data() {
        let heap = Heap::new();
        unsafe {
            let ptr = heap.allocate_with(64, None, 8).unwrap();
            ptr.as_ptr().write_bytes(0xAB, 64);

            let ticket = heap.offer(ptr, 3);
            assert!(!ticket.is_evicted());
            assert_eq!(heap.pending_bytes(), 64);

            let restored = heap.reclaim(ticket).expect("nothing evicted it");
            assert_eq!(restored, ptr);
            assert_eq!(*restored.as_ptr(), 0xAB);
            assert_eq!(heap.pending_bytes(), 0);

            heap.free(Some(restored));
        }
    }

    #[test]
    fn test_purge_respects_priority_ceiling() {
        static RUNS: StdAtomicUsize = StdAtomicUsize::new(0);
        fn count(_ptr: NonNull<u8>) {
            RUNS.fetch_add(1, Ordering::Relaxed);
        }

        let heap = Heap::new();
        unsafe {
            let low = heap.allocate_with(32, Some(count), 8).unwrap();
            let high = heap.allocate_with(32, Some(count), 8).unwrap();

            let low_ticket = heap.offer(low, 0);
            let high_ticket = heap.offer(high, 5);

            heap.purge(2);
            assert_eq!(RUNS.load(Ordering::Relaxed), 1);
            assert_eq!(heap.pending_bytes(), 32);

            // The evicted block's ticket stays valid and reports a miss.
            assert!(heap.reclaim(low_ticket).is_none());

            // The higher-priority block survived.
            let survivor = heap.reclaim(high_ticket).expect("above the ceiling");
            heap.free(Some(survivor));
        }
        assert_eq!(RUNS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_purge_everything() {
        let heap = Heap::new();
        unsafe {
            let a = heap.allocate_with(16, None, 8).unwrap();
            let b = heap.allocate_with(16, None, 8).unwrap();
            let ta = heap.offer(a, 0);
            let tb = heap.offer(b, u32::MAX);

            heap.purge(u32::MAX);
            assert_eq!(heap.pending_bytes(), 0);
            assert_eq!(heap.offered_blocks(), 0);
            assert!(heap.reclaim(ta).is_none());
            assert!(heap.reclaim(tb).is_none());
        }
    }

    #[test]
    fn test_clear_finalizes_live_and_offered() {
        static RUNS: StdAtomicUsize = StdAtomicUsize::new(0);
        fn count(_ptr: NonNull<u8>) {
            RUNS.fetch_add(1, Ordering::Relaxed);
        }

        let heap = Heap::new();
        unsafe {
            let live = heap.allocate_with(16, Some(count), 8).unwrap();
            let parked = heap.allocate_with(16, Some(count), 8).unwrap();
            let ticket = heap.offer(parked, 1);
            let _ = live;

            heap.clear();
            assert_eq!(RUNS.load(Ordering::Relaxed), 2);
            assert_eq!(heap.used_bytes(), 0);
            assert_eq!(heap.pending_bytes(), 0);

            // Tickets outstanding across a clear report a miss.
            assert!(heap.reclaim(ticket).is_none());
        }
    }

    #[test]
    fn test_pending_limit_evicts_immediately() {
        static RUNS: StdAtomicUsize = StdAtomicUsize::new(0);
        fn count(_ptr: NonNull<u8>) {
            RUNS.fetch_add(1, Ordering::Relaxed);
        }

        let heap = Heap::with_config(HeapConfig {
            capacity: None,
            pending_limit: Some(100),
        });

        unsafe {
            let ptr = heap.allocate_with(256, Some(count), 8).unwrap();
            let ticket = heap.offer(ptr, 0);
            assert!(ticket.is_evicted());
            assert_eq!(RUNS.load(Ordering::Relaxed), 1);
            assert_eq!(heap.pending_bytes(), 0);

            // The evicted ticket still completes the bookkeeping.
            assert!(heap.reclaim(ticket).is_none());
        }
    }

    #[test]
    fn test_resize_keeps_finalizer_and_resize_with_replaces() {
        static KEPT: StdAtomicUsize = StdAtomicUsize::new(0);
        static REPLACED: StdAtomicUsize = StdAtomicUsize::new(0);
        fn kept(_ptr: NonNull<u8>) {
            KEPT.fetch_add(1, Ordering::Relaxed);
        }
        fn replaced(_ptr: NonNull<u8>) {
            REPLACED.fetch_add(1, Ordering::Relaxed);
        }

        let heap = Heap::new();
        unsafe {
            let a = heap.allocate_with(32, Some(kept), 8).unwrap();
            let a = heap.resize(a, 64, 8).unwrap();
            heap.free(Some(a));
            assert_eq!(KEPT.load(Ordering::Relaxed), 1);

            let b = heap.allocate_with(32, Some(kept), 8).unwrap();
            let b = heap.resize_with(b, 64, Some(replaced), 8).unwrap();
            heap.free(Some(b));
            assert_eq!(KEPT.load(Ordering::Relaxed), 1);
            assert_eq!(REPLACED.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn test_reset_skips_finalizers() {
        static RUNS: StdAtomicUsize = StdAtomicUsize::new(0);
        fn count(_ptr: NonNull<u8>) {
            RUNS.fetch_add(1, Ordering::Relaxed);
        }

        let heap = Heap::new();
        unsafe {
            let _ = heap.allocate_with(16, Some(count), 8).unwrap();
            heap.reset();
        }
        assert_eq!(RUNS.load(Ordering::Relaxed), 0);
        assert_eq!(heap.used_bytes(), 0);
    }
}
