//! Error types for allocation operations.
//!
//! Allocation failure is the normal failure path of the contracts in this
//! crate and is always signaled by returning an error value, never by
//! panicking. Usage violations (invalid handles, ticket reuse, handles from
//! a foreign allocator, non-power-of-two alignments) are undefined behavior
//! and are documented on the individual operations instead of being modeled
//! here.

use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::error;

/// Errors reported by allocator operations.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The backing store could not satisfy the request.
    #[error("allocation failed: {size} bytes with {align} byte alignment")]
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// The requested size and alignment do not form a valid layout.
    #[error("invalid layout: {reason}")]
    InvalidLayout {
        /// What made the layout invalid.
        reason: &'static str,
    },

    /// An intermediate size computation overflowed.
    #[error("size overflow during {operation}")]
    SizeOverflow {
        /// The operation whose arithmetic overflowed.
        operation: &'static str,
    },

    /// The allocator has a fixed capacity and the request does not fit.
    #[error("capacity exceeded: requested {requested} bytes, {available} available")]
    ExceedsCapacity {
        /// Requested size in bytes.
        requested: usize,
        /// Bytes the allocator could still provision.
        available: usize,
    },
}

impl AllocError {
    /// Stable error code for categorization.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllocationFailed { .. } => "ALLOC:FAILED",
            Self::InvalidLayout { .. } => "ALLOC:LAYOUT",
            Self::SizeOverflow { .. } => "ALLOC:OVERFLOW",
            Self::ExceedsCapacity { .. } => "ALLOC:CAPACITY",
        }
    }

    /// Create an allocation failed error.
    pub fn allocation_failed(size: usize, align: usize) -> Self {
        #[cfg(feature = "logging")]
        error!(size, align, "memory allocation failed");

        Self::AllocationFailed { size, align }
    }

    /// Create an invalid layout error.
    #[must_use]
    pub fn invalid_layout(reason: &'static str) -> Self {
        Self::InvalidLayout { reason }
    }

    /// Create a size overflow error.
    #[must_use]
    pub fn size_overflow(operation: &'static str) -> Self {
        Self::SizeOverflow { operation }
    }

    /// Create a capacity exceeded error.
    #[must_use]
    pub fn exceeds_capacity(requested: usize, available: usize) -> Self {
        Self::ExceedsCapacity {
            requested,
            available,
        }
    }

    /// Check if this is an out-of-memory class failure (as opposed to a
    /// malformed request).
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailed { .. } | Self::ExceedsCapacity { .. }
        )
    }
}

/// Result type for allocation operations.
pub type AllocResult<T> = core::result::Result<T, AllocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AllocError::allocation_failed(1024, 8);
        assert!(err.to_string().contains("1024"));
        assert!(err.to_string().contains('8'));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AllocError::allocation_failed(1, 1).code(), "ALLOC:FAILED");
        assert_eq!(AllocError::size_overflow("resize").code(), "ALLOC:OVERFLOW");
        assert_eq!(AllocError::exceeds_capacity(10, 5).code(), "ALLOC:CAPACITY");
    }

    #[test]
    fn test_out_of_memory_classification() {
        assert!(AllocError::allocation_failed(1, 1).is_out_of_memory());
        assert!(AllocError::exceeds_capacity(10, 5).is_out_of_memory());
        assert!(!AllocError::invalid_layout("bad").is_out_of_memory());
    }
}
