//! Allocator contracts.
//!
//! Two capability tiers are defined here:
//!
//! - [`RawAllocator`] is minimal malloc-style allocation: allocate, free,
//!   resize, block size query, memory accounting, reset. Unlike
//!   [`core::alloc::GlobalAlloc`], the allocator remembers each block's size
//!   and alignment itself, so freeing and resizing need no layout from the
//!   caller.
//! - [`ObjectAllocator`] extends the raw tier with per-allocation
//!   finalizer callbacks and an offer/reclaim/purge protocol for memory
//!   that is valuable but evictable under pressure.
//!
//! Implementations should keep their behavior consistent with the operation
//! documentation below. Thread safety is the implementation's business;
//! consult its documentation. The [`ThreadSafeAllocator`] marker names the
//! implementations that are safe to share.

use core::ptr::NonNull;

use crate::error::AllocResult;

/// Alignment used by convenience callers that have no specific requirement.
///
/// Matches the strictest fundamental alignment of the platform, the same
/// guarantee `malloc` gives.
pub const DEFAULT_ALIGN: usize = core::mem::align_of::<u128>();

/// Per-allocation finalizer callback.
///
/// Invoked exactly once, immediately before the block's backing memory is
/// invalidated, whether by an explicit [`free`](ObjectAllocator), by internal
/// eviction while the block is offered, or by [`clear`](ObjectAllocator::clear).
/// A finalizer receives the block handle and must not panic and must not
/// call back into the allocator that is running it.
pub type Finalizer = fn(NonNull<u8>);

/// Finalizer that runs `T`'s destructor in place.
///
/// Convenience for blocks that hold a single initialized `T`:
///
/// ```
/// use metered_alloc::{drop_finalizer, Finalizer};
///
/// let finalizer: Finalizer = drop_finalizer::<String>;
/// ```
///
/// Registering this for a block that does not hold a live `T` at
/// invalidation time is undefined behavior.
pub fn drop_finalizer<T>(ptr: NonNull<u8>) {
    // SAFETY: registration contract: the block holds a live T.
    unsafe { core::ptr::drop_in_place(ptr.cast::<T>().as_ptr()) }
}

/// Opaque handle standing in for an evictable block between
/// [`offer`](ObjectAllocator::offer) and its consumption.
///
/// A ticket must be consumed exactly once, by passing it to
/// [`reclaim`](ObjectAllocator::reclaim). This holds even for the
/// already-evicted ticket returned when the allocator deallocates the block
/// at offer time: reclaiming it reports a miss and completes the
/// bookkeeping. A ticket that is never consumed leaks the allocator's
/// internal offer record.
///
/// To permanently deallocate an offered block, reclaim it and free the
/// returned handle (a miss means the allocator already did).
#[derive(Debug)]
pub struct OfferTicket(Option<NonNull<u8>>);

impl OfferTicket {
    /// Wraps an implementation-defined token address.
    ///
    /// Only allocator implementations construct tickets; callers treat them
    /// as opaque.
    #[inline]
    #[must_use]
    pub fn new(token: NonNull<u8>) -> Self {
        Self(Some(token))
    }

    /// The ticket for a block that was evicted at offer time.
    #[inline]
    #[must_use]
    pub const fn evicted() -> Self {
        Self(None)
    }

    /// Whether this ticket was issued already evicted.
    #[inline]
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.0.is_none()
    }

    /// Consumes the ticket, yielding the implementation token.
    #[inline]
    #[must_use]
    pub fn into_token(self) -> Option<NonNull<u8>> {
        self.0
    }
}

// SAFETY: the token is an opaque address that is never dereferenced outside
// the allocator that issued it; moving or sharing the ticket across threads
// is no different from moving an integer.
unsafe impl Send for OfferTicket {}
// SAFETY: as above; the ticket exposes no interior mutability.
unsafe impl Sync for OfferTicket {}

/// Minimal allocation capability.
///
/// # Safety
///
/// Implementors must ensure that:
/// - a successful [`allocate`](Self::allocate) returns a pointer valid for
///   reads and writes of at least the requested size, aligned to the
///   requested alignment, and exclusive until freed, resized away, or the
///   allocator is reset;
/// - a failed [`resize`](Self::resize) leaves the original allocation
///   untouched and its handle valid;
/// - accounting queries never touch caller memory.
///
/// Callers must uphold the per-operation contracts: alignments are powers of
/// two, handles are live and were produced by this allocator instance
/// (handles from another instance are undefined behavior unless the
/// implementation documents cross-compatibility).
pub unsafe trait RawAllocator {
    /// Allocates an aligned memory block of at least `size` bytes.
    ///
    /// The content of the returned block is uninitialized. `size` may be
    /// zero; whether that yields a usable handle of zero capacity is
    /// implementation-defined (both allocators in this crate return one).
    ///
    /// # Safety
    /// `align` must be a power of two; violating this is undefined
    /// behavior, not a reported error.
    ///
    /// # Errors
    /// Returns an error when the request cannot be satisfied. The original
    /// state of the allocator is unchanged in that case.
    unsafe fn allocate(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>>;

    /// Frees a previously allocated block. `None` is a no-op.
    ///
    /// The content and accessibility of the freed block are undefined
    /// afterwards.
    ///
    /// # Safety
    /// A non-`None` handle must be live and produced by this allocator.
    unsafe fn free(&self, ptr: Option<NonNull<u8>>);

    /// Resizes an allocation, preserving data up to
    /// `min(old_usable_size, new_size)`.
    ///
    /// The implementation may relocate the block; a returned pointer that
    /// differs from `ptr` means the old handle is now invalid. On error the
    /// original allocation remains valid and unchanged.
    ///
    /// # Safety
    /// `ptr` must be live and produced by this allocator; `align` must be a
    /// power of two.
    ///
    /// # Errors
    /// Returns an error when the new size cannot be provisioned.
    unsafe fn resize(&self, ptr: NonNull<u8>, new_size: usize, align: usize)
        -> AllocResult<NonNull<u8>>;

    /// Usable capacity of the block at `ptr`.
    ///
    /// The whole reported range is safe to access; the value may exceed the
    /// size originally requested.
    ///
    /// # Safety
    /// `ptr` must be live and produced by this allocator.
    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize;

    /// Returns the allocator to its initial state, invalidating every live
    /// allocation.
    ///
    /// # Safety
    /// No outstanding handle may be used afterwards.
    unsafe fn reset(&self);

    /// Free memory remaining for this allocator to provision.
    ///
    /// Not the largest single allocation that can succeed, and not a
    /// system-wide figure.
    fn free_bytes(&self) -> usize;

    /// Memory used by allocations inside this allocator.
    ///
    /// May exceed the sum of requested sizes due to per-block overhead.
    fn used_bytes(&self) -> usize;

    /// Total memory this allocator manages, allocated and free together.
    fn total_bytes(&self) -> usize;
}

/// Allocation capability with finalizers and evictable offers.
///
/// # Safety
///
/// As [`RawAllocator`], and additionally: registered finalizers are invoked
/// exactly once, immediately before the block's memory is invalidated, on
/// every invalidation path (free, internal eviction, clear).
pub unsafe trait ObjectAllocator: RawAllocator {
    /// As [`RawAllocator::allocate`], additionally registering `finalizer`
    /// to run when the block is invalidated.
    ///
    /// # Safety
    /// As [`RawAllocator::allocate`]. The finalizer must not panic and must
    /// not re-enter the allocator.
    ///
    /// # Errors
    /// As [`RawAllocator::allocate`].
    unsafe fn allocate_with(
        &self,
        size: usize,
        finalizer: Option<Finalizer>,
        align: usize,
    ) -> AllocResult<NonNull<u8>>;

    /// As [`RawAllocator::resize`], additionally replacing the block's
    /// registered finalizer with `finalizer`.
    ///
    /// # Safety
    /// As [`RawAllocator::resize`].
    ///
    /// # Errors
    /// As [`RawAllocator::resize`]. On error the original finalizer
    /// registration is also unchanged.
    unsafe fn resize_with(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        finalizer: Option<Finalizer>,
        align: usize,
    ) -> AllocResult<NonNull<u8>>;

    /// Offers a block for internal reuse, marking it evictable.
    ///
    /// Between the offer and the ticket's consumption the original handle
    /// is not valid to access. The allocator may deallocate the block
    /// immediately (running its finalizer) and return the evicted ticket,
    /// which must still be consumed via [`reclaim`](Self::reclaim) like any
    /// other.
    ///
    /// `priority` is a hint ranking eviction order, 0 being the least
    /// valuable and first in line. It never guarantees protection.
    ///
    /// # Safety
    /// `ptr` must be live, produced by this allocator, and not currently
    /// offered.
    unsafe fn offer(&self, ptr: NonNull<u8>, priority: u32) -> OfferTicket;

    /// Reclaims an offered block.
    ///
    /// Returns the original handle with its data intact if the block
    /// survived, or `None` if it was evicted meanwhile. The ticket is
    /// consumed either way.
    ///
    /// # Safety
    /// The ticket must have been issued by this allocator.
    unsafe fn reclaim(&self, ticket: OfferTicket) -> Option<NonNull<u8>>;

    /// Evicts every offered block at or below `priority_ceiling`, invoking
    /// each evicted block's finalizer.
    ///
    /// Blocks above the ceiling may also be evicted at the implementation's
    /// discretion. Outstanding tickets for evicted blocks remain
    /// individually valid to pass to [`reclaim`](Self::reclaim) (which will
    /// then report a miss); purging never consumes tickets.
    ///
    /// Eviction order within a priority class is implementation-defined.
    ///
    /// # Safety
    /// Evicted blocks' handles must not be used afterwards.
    unsafe fn purge(&self, priority_ceiling: u32);

    /// Like [`RawAllocator::reset`], but invokes every live and offered
    /// block's finalizer first, then invalidates everything including
    /// outstanding offer tickets.
    ///
    /// # Safety
    /// As [`RawAllocator::reset`].
    unsafe fn clear(&self);

    /// Total bytes currently held in the offered-but-not-yet-evicted state.
    fn pending_bytes(&self) -> usize;
}

/// Marker for allocators that are safe to share between threads.
///
/// # Safety
/// Implementors must ensure every trait operation is safe under concurrent
/// calls from multiple threads.
pub unsafe trait ThreadSafeAllocator: RawAllocator + Send + Sync {}

// SAFETY: forwards every call to the underlying allocator, preserving its
// contracts unchanged.
unsafe impl<A: RawAllocator + ?Sized> RawAllocator for &A {
    #[inline]
    unsafe fn allocate(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).allocate(size, align) }
    }

    #[inline]
    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).free(ptr) }
    }

    #[inline]
    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        align: usize,
    ) -> AllocResult<NonNull<u8>> {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).resize(ptr, new_size, align) }
    }

    #[inline]
    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).usable_size(ptr) }
    }

    #[inline]
    unsafe fn reset(&self) {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).reset() }
    }

    #[inline]
    fn free_bytes(&self) -> usize {
        (**self).free_bytes()
    }

    #[inline]
    fn used_bytes(&self) -> usize {
        (**self).used_bytes()
    }

    #[inline]
    fn total_bytes(&self) -> usize {
        (**self).total_bytes()
    }
}

// SAFETY: forwards every call to the underlying allocator, preserving its
// contracts unchanged.
unsafe impl<A: ObjectAllocator + ?Sized> ObjectAllocator for &A {
    #[inline]
    unsafe fn allocate_with(
        &self,
        size: usize,
        finalizer: Option<Finalizer>,
        align: usize,
    ) -> AllocResult<NonNull<u8>> {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).allocate_with(size, finalizer, align) }
    }

    #[inline]
    unsafe fn resize_with(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        finalizer: Option<Finalizer>,
        align: usize,
    ) -> AllocResult<NonNull<u8>> {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).resize_with(ptr, new_size, finalizer, align) }
    }

    #[inline]
    unsafe fn offer(&self, ptr: NonNull<u8>, priority: u32) -> OfferTicket {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).offer(ptr, priority) }
    }

    #[inline]
    unsafe fn reclaim(&self, ticket: OfferTicket) -> Option<NonNull<u8>> {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).reclaim(ticket) }
    }

    #[inline]
    unsafe fn purge(&self, priority_ceiling: u32) {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).purge(priority_ceiling) }
    }

    #[inline]
    unsafe fn clear(&self) {
        // SAFETY: same contract as the underlying allocator.
        unsafe { (**self).clear() }
    }

    #[inline]
    fn pending_bytes(&self) -> usize {
        (**self).pending_bytes()
    }
}
