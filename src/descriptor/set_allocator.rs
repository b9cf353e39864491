//! Allocator for long-lived descriptor sets.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::device::{
    CompletionToken, DescriptorDevice, DescriptorPoolConfig, DescriptorPoolHandle,
    DescriptorSetHandle, DeviceError, QueueMask, SetLayoutHandle,
};
use crate::errors::{FramePoolError, Result};

use super::pool_manager::{DescriptorPool, DescriptorPoolManager};

struct SetAllocatorShared {
    pools: DescriptorPoolManager,
    /// The pool sets are currently drawn from. Exhausted pools cycle back
    /// through the manager.
    current: Mutex<Option<DescriptorPool>>,
}

impl SetAllocatorShared {
    fn free_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        pool: DescriptorPoolHandle,
        queue_mask: QueueMask,
    ) {
        if self.pools.config().allow_individual_free {
            log::trace!("releasing descriptor set {set:?} (queues {queue_mask:?})");
            if let Err(err) = self.pools.device().free_set(pool, set) {
                log::error!("failed to free descriptor set {set:?}: {err}");
            }
        }
        // Without individual freeing the set's memory comes back only when
        // its whole pool is reset.
    }

    /// Dispose of a pool that reported exhaustion. With individual freeing
    /// its capacity comes back as outstanding sets are released, so the
    /// pool rejoins the free deque; without it the pool stays full for as
    /// long as its sets live, so it is retired until teardown.
    fn park_exhausted(&self, pool: DescriptorPool) {
        if self.pools.config().allow_individual_free {
            self.pools.free_pool(pool);
        } else {
            self.pools.retire_pool(pool);
        }
    }
}

/// Thread-safe allocator for descriptor sets with an explicit release path.
///
/// Owns an internal [`DescriptorPoolManager`] and retains one current pool;
/// when the device reports pool exhaustion, a fresh pool is fetched, the
/// exhausted pool is handed back to the manager (retired outright when its
/// sets cannot be individually freed) and the allocation is retried exactly
/// once.
pub struct DescriptorSetAllocator {
    shared: Arc<SetAllocatorShared>,
}

impl DescriptorSetAllocator {
    #[must_use]
    pub fn new(device: Arc<dyn DescriptorDevice>, name: &str, config: DescriptorPoolConfig) -> Self {
        Self {
            shared: Arc::new(SetAllocatorShared {
                pools: DescriptorPoolManager::new(device, name, config),
                current: Mutex::new(None),
            }),
        }
    }

    /// Allocate one set of the given layout.
    ///
    /// `queue_mask` records which GPU queues may read the set; it travels
    /// with the allocation and is reported back on release.
    pub fn allocate(
        &self,
        queue_mask: QueueMask,
        layout: SetLayoutHandle,
    ) -> Result<DescriptorSetAllocation> {
        let shared = &self.shared;
        let mut current = shared.current.lock();

        if current.is_none() {
            *current = Some(shared.pools.get_pool()?);
        }
        let pool_handle = match current.as_ref() {
            Some(pool) => pool.handle(),
            None => unreachable!("current pool was just ensured"),
        };

        match shared.pools.device().allocate_set(pool_handle, layout) {
            Ok(set) => Ok(self.wrap(set, pool_handle, queue_mask)),
            Err(DeviceError::PoolExhausted) => {
                // Fetch the replacement before letting go of the exhausted
                // pool, so the retry cannot land on the pool that just
                // filled up.
                let fresh = shared.pools.get_pool()?;
                let fresh_handle = fresh.handle();
                if let Some(exhausted) = current.replace(fresh) {
                    shared.park_exhausted(exhausted);
                }
                match shared.pools.device().allocate_set(fresh_handle, layout) {
                    Ok(set) => Ok(self.wrap(set, fresh_handle, queue_mask)),
                    Err(source) => {
                        log::error!("descriptor set allocation failed after pool cycle: {source}");
                        Err(FramePoolError::SetAllocation(source))
                    }
                }
            }
            Err(source) => {
                log::error!("descriptor set allocation failed: {source}");
                Err(FramePoolError::SetAllocation(source))
            }
        }
    }

    /// Tear the allocator down, destroying every pool through the device.
    ///
    /// The caller must have released (or forfeited) all outstanding
    /// allocations and idled the device first.
    pub fn destroy(&self, last_completed: CompletionToken) {
        if let Some(pool) = self.shared.current.lock().take() {
            self.shared.pools.free_pool(pool);
        }
        self.shared.pools.destroy(last_completed);
    }

    /// Pools created over the allocator's lifetime.
    #[must_use]
    pub fn created_pool_count(&self) -> u64 {
        self.shared.pools.created_pool_count()
    }

    fn wrap(
        &self,
        set: DescriptorSetHandle,
        pool: DescriptorPoolHandle,
        queue_mask: QueueMask,
    ) -> DescriptorSetAllocation {
        DescriptorSetAllocation {
            set,
            pool,
            queue_mask,
            allocator: Arc::downgrade(&self.shared),
        }
    }
}

/// A descriptor set checked out of a [`DescriptorSetAllocator`].
///
/// Dropping (or explicitly [`release`](Self::release)-ing) the allocation
/// notifies the allocator through a weak back-reference: if the pool
/// supports individual freeing the set returns to it immediately, otherwise
/// the memory comes back when the pool cycles. If the allocator itself has
/// already been destroyed the release is a no-op — the set died with its
/// pool.
#[derive(Debug)]
pub struct DescriptorSetAllocation {
    set: DescriptorSetHandle,
    pool: DescriptorPoolHandle,
    queue_mask: QueueMask,
    allocator: Weak<SetAllocatorShared>,
}

impl DescriptorSetAllocation {
    /// Native set handle.
    #[must_use]
    pub fn set(&self) -> DescriptorSetHandle {
        self.set
    }

    /// Handle of the pool the set came from.
    #[must_use]
    pub fn pool(&self) -> DescriptorPoolHandle {
        self.pool
    }

    /// GPU queues that may still reference the set.
    #[must_use]
    pub fn queue_mask(&self) -> QueueMask {
        self.queue_mask
    }

    /// Release the set back to its allocator (equivalent to dropping).
    pub fn release(self) {}
}

impl Drop for DescriptorSetAllocation {
    fn drop(&mut self) {
        if let Some(shared) = self.allocator.upgrade() {
            shared.free_descriptor_set(self.set, self.pool, self.queue_mask);
        }
    }
}
