//! Pluggable low-level allocator contracts with a lock-free
//! statistics-collecting decorator.
//!
//! This crate provides:
//!
//! - [`RawAllocator`], a minimal malloc-style allocation contract:
//!   allocate, free, resize, block size query, memory accounting, reset.
//! - [`ObjectAllocator`], the raw contract extended with per-allocation
//!   finalizer callbacks and an offer/reclaim/purge protocol for memory
//!   that is valuable but evictable under pressure.
//! - [`StatsAllocator`], a decorator implementing both contracts over any
//!   backing allocator, forwarding every call unchanged while maintaining
//!   lock-free running statistics (extremal sizes, usage watermark, call
//!   and failure counts, resize growth/shrink/relocation, offer and
//!   reclaim traffic).
//! - [`SystemAllocator`] and [`Heap`], reference implementations over the
//!   operating system heap.
//!
//! # Example
//!
//! ```
//! use metered_alloc::{ObjectAllocator, RawAllocator, Heap, StatsAllocator};
//!
//! let alloc = StatsAllocator::new(Heap::new());
//!
//! unsafe {
//!     let block = alloc.allocate(1024, 16)?;
//!     let ticket = alloc.offer(block, 0);
//!     match alloc.reclaim(ticket) {
//!         Some(block) => alloc.free(Some(block)),
//!         None => { /* evicted meanwhile; reload into a fresh block */ }
//!     }
//! }
//!
//! let stats = alloc.snapshot();
//! assert_eq!(stats.total_allocs, 1);
//! assert_eq!(stats.total_offers, 1);
//! println!("{stats}");
//! # Ok::<(), metered_alloc::AllocError>(())
//! ```
//!
//! # Concurrency
//!
//! The decorator keeps every counter in an independent atomic register:
//! plain counters use relaxed adds, extremal values use compare-and-retry.
//! No lock is held across a forwarded call, so a decorator over a
//! thread-safe backing is itself thread-safe, and over a single-threaded
//! backing it is exactly as unsafe to share as the backing.
//!
//! # Features
//!
//! - `logging` (default): structured `tracing` events for allocation
//!   failures and heap sweeps.

#![warn(missing_docs)]

pub mod allocator;
pub mod error;
pub mod utils;

pub use allocator::{
    drop_finalizer, AllocatorStats, AtomicAllocatorStats, Finalizer, Heap, HeapConfig,
    ObjectAllocator, OfferTicket, RawAllocator, StatisticsProvider, StatsAllocator, StatsExt,
    SystemAllocator, ThreadSafeAllocator, DEFAULT_ALIGN,
};
pub use error::{AllocError, AllocResult};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
