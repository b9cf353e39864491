//! External device collaborators
//!
//! The allocator core never talks to a GPU API directly. Everything it needs
//! from the device is expressed through two narrow traits:
//!
//! - [`BufferDevice`]: create/destroy a GPU-visible, persistently CPU-mapped
//!   buffer.
//! - [`DescriptorDevice`]: create/destroy/reset descriptor pools and
//!   allocate/free individual sets from them.
//!
//! Completion tracking stays outside as well: callers feed monotonically
//! increasing [`CompletionToken`]s into the providers and later report the
//! queue's "last completed" value back through the release entry points.
//!
//! [`headless::HeadlessDevice`] implements both traits over host memory and
//! is the reference collaborator used by the test suites.

use std::ptr::NonNull;

use thiserror::Error;

pub mod headless;

/// Opaque, monotonically increasing value representing a point in a GPU
/// command-queue's execution. Resources tagged with token `T` are safe to
/// reuse once the queue has executed past `T`.
pub type CompletionToken = u64;

// ============================================================================
// Handles
// ============================================================================

/// Native buffer handle. `0` is never handed out by a conforming device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BufferHandle(u64);

/// Native descriptor-pool handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DescriptorPoolHandle(u64);

/// Native descriptor-set handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DescriptorSetHandle(u64);

/// Native descriptor-set-layout handle. Layout creation is a device concern;
/// the allocators only pass layouts through to [`DescriptorDevice`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SetLayoutHandle(u64);

macro_rules! impl_handle {
    ($($ty:ident),+) => {$(
        impl $ty {
            /// Wrap a raw device identifier.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw device identifier.
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    )+};
}

impl_handle!(BufferHandle, DescriptorPoolHandle, DescriptorSetHandle, SetLayoutHandle);

// ============================================================================
// Queue masks
// ============================================================================

/// Bitmask of GPU command queues (bit `i` = queue `i`) that may still
/// reference a resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QueueMask(u64);

impl QueueMask {
    /// No queues.
    pub const NONE: Self = Self(0);
    /// Every queue.
    pub const ALL: Self = Self(u64::MAX);

    /// Mask with only the given queue index set.
    ///
    /// # Panics
    /// Panics if `queue >= 64`.
    #[must_use]
    pub const fn from_index(queue: u32) -> Self {
        assert!(queue < 64, "queue index out of range");
        Self(1 << queue)
    }

    /// Raw bits of the mask.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether the given queue index is part of the mask.
    #[must_use]
    pub const fn contains(self, queue: u32) -> bool {
        queue < 64 && self.0 & (1 << queue) != 0
    }

    /// Whether no queue is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for QueueMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for QueueMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Debug for QueueMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QueueMask({:#b})", self.0)
    }
}

// ============================================================================
// Buffer creation
// ============================================================================

/// A freshly created GPU buffer: native handle, GPU-side virtual address and
/// a persistently mapped CPU write pointer valid for the buffer's entire
/// lifetime.
#[derive(Debug)]
pub struct RawBuffer {
    /// Native buffer handle.
    pub handle: BufferHandle,
    /// GPU-side virtual address of byte 0.
    pub gpu_address: u64,
    /// CPU-side mapped address of byte 0.
    pub cpu_ptr: NonNull<u8>,
}

// ============================================================================
// Descriptor pool configuration
// ============================================================================

/// Descriptor binding-table entry kinds, mirroring the native API's
/// descriptor types.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
}

/// Capacity for one descriptor type inside a pool.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorPoolSize {
    pub ty: DescriptorType,
    pub count: u32,
}

/// Fixed configuration every pool created by one manager shares.
#[derive(Clone, Debug)]
pub struct DescriptorPoolConfig {
    /// Per-descriptor-type capacities.
    pub pool_sizes: Vec<DescriptorPoolSize>,
    /// Maximum number of sets one pool can hold.
    pub max_sets: u32,
    /// Whether individual sets may be freed back to the pool. When `false`,
    /// a set's memory is only reclaimed when its whole pool is reset.
    pub allow_individual_free: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Failures reported by a device collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device could not satisfy an allocation of `requested` bytes.
    #[error("device out of memory ({requested} bytes requested)")]
    OutOfMemory { requested: u64 },

    /// The descriptor pool has no free sets left.
    #[error("descriptor pool has no free sets left")]
    PoolExhausted,

    /// A handle did not name a live device resource.
    #[error("unknown resource handle {0:#x}")]
    UnknownHandle(u64),

    /// `free_set` was called on a pool created without individual freeing.
    #[error("descriptor pool does not support freeing individual sets")]
    IndividualFreeUnsupported,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// GPU memory allocation collaborator.
///
/// A returned buffer must be immediately CPU-writable and GPU-readable for
/// the lifetime of the handle.
pub trait BufferDevice: Send + Sync {
    /// Create a buffer of exactly `size` bytes, mapped for CPU access.
    fn create_buffer(&self, size: u64) -> Result<RawBuffer, DeviceError>;

    /// Destroy a buffer previously returned by [`Self::create_buffer`].
    ///
    /// The caller guarantees no GPU work still references the buffer.
    fn destroy_buffer(&self, handle: BufferHandle);
}

/// GPU descriptor-pool allocation collaborator.
pub trait DescriptorDevice: Send + Sync {
    /// Create a descriptor pool with the given fixed configuration.
    fn create_pool(&self, config: &DescriptorPoolConfig)
    -> Result<DescriptorPoolHandle, DeviceError>;

    /// Destroy a pool and every set still allocated from it.
    fn destroy_pool(&self, pool: DescriptorPoolHandle);

    /// Allocate one set of the given layout from `pool`.
    ///
    /// Signals [`DeviceError::PoolExhausted`] when the pool is out of space;
    /// the allocators use that to cycle to a fresh pool.
    fn allocate_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: SetLayoutHandle,
    ) -> Result<DescriptorSetHandle, DeviceError>;

    /// Return one set to its pool. Only valid on pools created with
    /// `allow_individual_free`.
    fn free_set(
        &self,
        pool: DescriptorPoolHandle,
        set: DescriptorSetHandle,
    ) -> Result<(), DeviceError>;

    /// Bulk-invalidate every set in the pool, restoring its full capacity.
    fn reset_pool(&self, pool: DescriptorPoolHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_mask_bit_ops() {
        let m = QueueMask::from_index(0) | QueueMask::from_index(3);
        assert!(m.contains(0));
        assert!(!m.contains(1));
        assert!(m.contains(3));
        assert_eq!(m.bits(), 0b1001);
        assert!(QueueMask::NONE.is_empty());
        assert!(QueueMask::ALL.contains(63));
    }

    #[test]
    fn queue_mask_or_assign() {
        let mut m = QueueMask::NONE;
        m |= QueueMask::from_index(5);
        assert!(m.contains(5));
    }

    #[test]
    #[should_panic(expected = "queue index out of range")]
    fn queue_mask_rejects_out_of_range_index() {
        let _ = QueueMask::from_index(64);
    }
}
