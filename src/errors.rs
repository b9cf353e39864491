//! Error Types
//!
//! Resource-creation failures coming back from the external device
//! collaborators are recoverable: they are logged once at the provider
//! boundary and surfaced as [`FramePoolError`] values for the caller to
//! handle or escalate. Usage-contract violations (bad alignment, teardown
//! with work still in flight) are programmer errors and panic instead —
//! they are meant to be caught in development, not handled at runtime.

use thiserror::Error;

use crate::device::DeviceError;

/// The error type for fallible framepool operations.
#[derive(Error, Debug)]
pub enum FramePoolError {
    /// The device collaborator could not create a dynamic memory page.
    #[error("failed to create a {size}-byte dynamic page: {source}")]
    PageCreation {
        /// Requested page size in bytes.
        size: u64,
        /// Underlying device failure.
        source: DeviceError,
    },

    /// The device collaborator could not create a descriptor pool.
    #[error("failed to create a descriptor pool: {0}")]
    PoolCreation(#[source] DeviceError),

    /// Descriptor set allocation failed, including the one pool-cycle retry.
    #[error("failed to allocate a descriptor set: {0}")]
    SetAllocation(#[source] DeviceError),
}

/// Alias for `Result<T, FramePoolError>`.
pub type Result<T> = std::result::Result<T, FramePoolError>;
