//! Page and allocation objects.

use std::ptr::NonNull;

use crate::device::{BufferHandle, RawBuffer};

/// A single GPU-allocated, persistently CPU-mapped memory region used as the
/// backing store for many per-draw allocations.
///
/// Move-only: at any instant a page is owned by exactly one of the
/// [`PageProvider`](super::PageProvider) available index, a
/// [`LinearHeap`](super::LinearHeap) active list, or the provider's stale
/// queue. Ownership transfer between those sets is by move, never by
/// sharing.
#[derive(Debug)]
pub struct DynamicPage {
    buffer: RawBuffer,
    size: u64,
}

// One owner at a time and the mapped range is exclusively that owner's, so
// moving a page across threads is sound even though it carries a raw mapped
// pointer.
unsafe impl Send for DynamicPage {}

impl DynamicPage {
    pub(crate) fn new(buffer: RawBuffer, size: u64) -> Self {
        Self { buffer, size }
    }

    /// Native buffer handle backing this page.
    #[must_use]
    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle
    }

    /// Page capacity in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// GPU virtual address of the given byte offset.
    #[must_use]
    pub fn gpu_address(&self, offset: u64) -> u64 {
        debug_assert!(offset <= self.size);
        self.buffer.gpu_address + offset
    }

    /// Mapped CPU address of the given byte offset.
    #[must_use]
    pub fn cpu_address(&self, offset: u64) -> NonNull<u8> {
        debug_assert!(offset <= self.size);
        // In bounds of the mapped range per the assert above.
        unsafe { NonNull::new_unchecked(self.buffer.cpu_ptr.as_ptr().add(offset as usize)) }
    }
}

/// A sub-region of a [`DynamicPage`]: the result of one
/// [`LinearHeap::allocate`](super::LinearHeap::allocate) call.
///
/// The allocation borrows the page — it stays valid only until the heap's
/// `finish_frame` hands the page back, and must not be retained past the end
/// of the frame that produced it.
#[derive(Debug)]
pub struct DynamicAllocation {
    pub(crate) buffer: BufferHandle,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) cpu_ptr: NonNull<u8>,
    pub(crate) gpu_address: u64,
    #[cfg(debug_assertions)]
    pub(crate) frame_index: u64,
}

// Sound for the same reason as `DynamicPage`: the sub-region is exclusively
// the holder's until the page is reclaimed.
unsafe impl Send for DynamicAllocation {}

impl DynamicAllocation {
    /// Handle of the page's backing buffer (borrowed, not owned).
    #[must_use]
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Aligned byte offset inside the backing buffer.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Requested size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Resolved CPU write pointer for byte 0 of the sub-region.
    #[must_use]
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.cpu_ptr
    }

    /// Resolved GPU virtual address for byte 0 of the sub-region.
    #[must_use]
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// The sub-region as a writable byte slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Exclusive while `&mut self` is held; the region belongs to this
        // allocation until its page is reclaimed.
        unsafe { std::slice::from_raw_parts_mut(self.cpu_ptr.as_ptr(), self.size as usize) }
    }

    /// Index of the frame that produced this allocation (debug builds only).
    #[cfg(debug_assertions)]
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}
