//! Thread-safe pool of descriptor pools.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::device::{
    CompletionToken, DescriptorDevice, DescriptorPoolConfig, DescriptorPoolHandle, QueueMask,
};
use crate::errors::{FramePoolError, Result};

/// A descriptor pool owned by exactly one of: the manager's free deque, a
/// per-context allocator's active list, or the manager's pending-release
/// queue. Move-only, like [`DynamicPage`](crate::buffer::DynamicPage).
#[derive(Debug)]
pub struct DescriptorPool {
    handle: DescriptorPoolHandle,
}

impl DescriptorPool {
    /// Native pool handle.
    #[must_use]
    pub fn handle(&self) -> DescriptorPoolHandle {
        self.handle
    }
}

/// A pool discarded at frame end, awaiting retirement of the queues that may
/// still read its sets.
struct StalePoolInfo {
    pool: DescriptorPool,
    queue_mask: QueueMask,
    token: CompletionToken,
}

#[derive(Default)]
struct PoolQueues {
    /// Insertion-ordered: pools are fungible, all sharing one configuration.
    free: VecDeque<DescriptorPool>,
    /// Append-ordered, tokens non-decreasing front to back.
    stale: VecDeque<StalePoolInfo>,
    /// Exhausted pools whose retained sets rule out a reset. Held until
    /// teardown, never handed out again.
    retired: Vec<DescriptorPool>,
}

/// Thread-safe manager of identically configured descriptor pools.
///
/// Pools come back to the manager on three paths:
/// - [`Self::free_pool`] returns a pool immediately (retained-set path: sets
///   may still live in it, so it is *not* reset);
/// - [`Self::discard_pools`] parks whole per-frame pools in a pending queue
///   until [`Self::release_stale_pools`] confirms GPU completion, at which
///   point each pool is reset and re-enters the free deque;
/// - [`Self::retire_pool`] permanently shelves an exhausted pool whose
///   retained sets rule out a reset; it is destroyed at teardown.
pub struct DescriptorPoolManager {
    device: Arc<dyn DescriptorDevice>,
    name: String,
    config: DescriptorPoolConfig,
    queues: Mutex<PoolQueues>,
    created_count: AtomicU64,
}

impl DescriptorPoolManager {
    #[must_use]
    pub fn new(device: Arc<dyn DescriptorDevice>, name: &str, config: DescriptorPoolConfig) -> Self {
        Self {
            device,
            name: name.to_string(),
            config,
            queues: Mutex::new(PoolQueues::default()),
            created_count: AtomicU64::new(0),
        }
    }

    /// Pop a free pool, or create a new one with the manager's fixed
    /// configuration. Ownership transfers to the caller.
    pub fn get_pool(&self) -> Result<DescriptorPool> {
        if let Some(pool) = self.queues.lock().free.pop_front() {
            return Ok(pool);
        }
        match self.device.create_pool(&self.config) {
            Ok(handle) => {
                let n = self.created_count.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("{}: created descriptor pool #{n}", self.name);
                Ok(DescriptorPool { handle })
            }
            Err(source) => {
                log::error!("{}: failed to create a descriptor pool: {source}", self.name);
                Err(FramePoolError::PoolCreation(source))
            }
        }
    }

    /// Return a pool straight to the free deque without resetting it.
    pub fn free_pool(&self, pool: DescriptorPool) {
        self.queues.lock().free.push_back(pool);
    }

    /// Shelve an exhausted pool whose retained sets cannot be individually
    /// freed. The pool is never handed out again; it is destroyed at
    /// teardown along with its sets.
    pub fn retire_pool(&self, pool: DescriptorPool) {
        self.queues.lock().retired.push(pool);
    }

    /// Park a batch of per-frame pools in the pending-release queue, tagged
    /// with the queues that may still read their sets and the frame's
    /// completion token. Tokens must be non-decreasing across calls.
    pub fn discard_pools(
        &self,
        pools: impl IntoIterator<Item = DescriptorPool>,
        queue_mask: QueueMask,
        token: CompletionToken,
    ) {
        let mut queues = self.queues.lock();
        debug_assert!(
            queues.stale.back().is_none_or(|back| back.token <= token),
            "completion tokens must be non-decreasing"
        );
        for pool in pools {
            queues.stale.push_back(StalePoolInfo {
                pool,
                queue_mask,
                token,
            });
        }
    }

    /// Recycle every pending pool whose token is `<= last_completed`:
    /// reset it (its sets were per-frame transients) and return it to the
    /// free deque. Stops at the first still-pending entry.
    pub fn release_stale_pools(&self, last_completed: CompletionToken) {
        let released = {
            let mut queues = self.queues.lock();
            let mut released = Vec::new();
            loop {
                let ready = queues
                    .stale
                    .front()
                    .is_some_and(|front| front.token <= last_completed);
                if !ready {
                    break;
                }
                if let Some(info) = queues.stale.pop_front() {
                    released.push(info);
                }
            }
            released
        };
        if released.is_empty() {
            return;
        }

        // Reset outside the lock; only the deque mutation is critical.
        for info in &released {
            log::trace!(
                "{}: recycling pool for queues {:?} (token {})",
                self.name,
                info.queue_mask,
                info.token
            );
            self.device.reset_pool(info.pool.handle());
        }
        let mut queues = self.queues.lock();
        queues.free.extend(released.into_iter().map(|info| info.pool));
    }

    /// Tear the manager down, destroying every pool through the device.
    ///
    /// `last_completed` must cover every token ever passed to
    /// [`Self::discard_pools`] — the device must be idled first.
    ///
    /// # Panics
    /// Panics if pools are still awaiting queue retirement.
    pub fn destroy(&self, last_completed: CompletionToken) {
        self.release_stale_pools(last_completed);
        let (free, retired) = {
            let mut queues = self.queues.lock();
            assert!(
                queues.stale.is_empty(),
                "{}: descriptor pools are still in use; the device must be idled before destroy()",
                self.name
            );
            (std::mem::take(&mut queues.free), std::mem::take(&mut queues.retired))
        };
        for pool in free.into_iter().chain(retired) {
            self.device.destroy_pool(pool.handle());
        }
        log::info!(
            "{} usage stats: {} descriptor pools created",
            self.name,
            self.created_count.load(Ordering::Relaxed)
        );
    }

    /// Pools sitting in the free deque.
    #[must_use]
    pub fn free_pool_count(&self) -> usize {
        self.queues.lock().free.len()
    }

    /// Pools awaiting queue retirement.
    #[must_use]
    pub fn pending_pool_count(&self) -> usize {
        self.queues.lock().stale.len()
    }

    /// Exhausted pools shelved until teardown.
    #[must_use]
    pub fn retired_pool_count(&self) -> usize {
        self.queues.lock().retired.len()
    }

    /// Pools created over the manager's lifetime.
    #[must_use]
    pub fn created_pool_count(&self) -> u64 {
        self.created_count.load(Ordering::Relaxed)
    }

    pub(crate) fn device(&self) -> &Arc<dyn DescriptorDevice> {
        &self.device
    }

    pub(crate) fn config(&self) -> &DescriptorPoolConfig {
        &self.config
    }
}

impl Drop for DescriptorPoolManager {
    fn drop(&mut self) {
        let queues = self.queues.get_mut();
        if !queues.stale.is_empty() {
            if std::thread::panicking() {
                log::error!(
                    "{}: dropped with {} pools still pending release",
                    self.name,
                    queues.stale.len()
                );
            } else {
                panic!(
                    "{}: dropped with pools still pending release; \
                     call destroy() after idling the device",
                    self.name
                );
            }
        }
        let free = std::mem::take(&mut queues.free);
        let retired = std::mem::take(&mut queues.retired);
        for pool in free.into_iter().chain(retired) {
            self.device.destroy_pool(pool.handle());
        }
    }
}
