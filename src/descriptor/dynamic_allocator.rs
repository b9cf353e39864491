//! Per-context allocator for per-frame transient descriptor sets.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::device::{
    CompletionToken, DescriptorSetHandle, DeviceError, QueueMask, SetLayoutHandle,
};
use crate::errors::{FramePoolError, Result};

use super::pool_manager::{DescriptorPool, DescriptorPoolManager};

/// Coarser-grained analog of [`LinearHeap`](crate::buffer::LinearHeap) for
/// descriptor sets: allocates from the most recently obtained pool, appends
/// a fresh pool on exhaustion, and recycles the whole batch at frame end via
/// [`Self::release_pools`].
///
/// Not thread-safe by design — one rendering context, one thread. The
/// returned set handles are per-frame transients with no individual release;
/// they die when their pool cycles through the manager's pending queue.
pub struct DynamicDescriptorSetAllocator {
    manager: Arc<DescriptorPoolManager>,
    name: String,
    pools: SmallVec<[DescriptorPool; 2]>,
    peak_pool_count: usize,
}

impl DynamicDescriptorSetAllocator {
    #[must_use]
    pub fn new(manager: Arc<DescriptorPoolManager>, name: &str) -> Self {
        Self {
            manager,
            name: name.to_string(),
            pools: SmallVec::new(),
            peak_pool_count: 0,
        }
    }

    /// Allocate one transient set of the given layout.
    pub fn allocate(&mut self, layout: SetLayoutHandle) -> Result<DescriptorSetHandle> {
        if let Some(pool) = self.pools.last() {
            match self.manager.device().allocate_set(pool.handle(), layout) {
                Ok(set) => return Ok(set),
                Err(DeviceError::PoolExhausted) => {
                    log::trace!("{}: descriptor pool exhausted, appending a fresh one", self.name);
                }
                Err(source) => {
                    log::error!("{}: descriptor set allocation failed: {source}", self.name);
                    return Err(FramePoolError::SetAllocation(source));
                }
            }
        }

        let fresh = self.manager.get_pool()?;
        let handle = fresh.handle();
        self.pools.push(fresh);
        self.peak_pool_count = self.peak_pool_count.max(self.pools.len());

        self.manager.device().allocate_set(handle, layout).map_err(|source| {
            log::error!(
                "{}: descriptor set allocation failed on a fresh pool: {source}",
                self.name
            );
            FramePoolError::SetAllocation(source)
        })
    }

    /// Hand every pool accumulated this frame back to the manager's
    /// pending-release queue, tagged with the GPU queues that must retire
    /// before the pools can be reused and the frame's completion token.
    ///
    /// Must be called once per frame per context, and before the allocator
    /// is dropped.
    pub fn release_pools(&mut self, queue_mask: QueueMask, token: CompletionToken) {
        let pools = std::mem::take(&mut self.pools);
        if !pools.is_empty() {
            log::trace!(
                "{}: releasing {} pools (queues {queue_mask:?}, token {token})",
                self.name,
                pools.len()
            );
            self.manager.discard_pools(pools, queue_mask, token);
        }
    }

    /// Pools currently held for this frame.
    #[must_use]
    pub fn allocated_pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Most pools ever held concurrently.
    #[must_use]
    pub fn peak_pool_count(&self) -> usize {
        self.peak_pool_count
    }
}

impl Drop for DynamicDescriptorSetAllocator {
    fn drop(&mut self) {
        if !self.pools.is_empty() {
            if std::thread::panicking() {
                log::error!(
                    "{}: dropped with {} pools still held; release_pools() was not called",
                    self.name,
                    self.pools.len()
                );
                return;
            }
            panic!(
                "{}: dropped with pools still held; release_pools() was not called",
                self.name
            );
        }
        log::debug!(
            "{} usage stats: peak of {} pools held concurrently",
            self.name,
            self.peak_pool_count
        );
    }
}
