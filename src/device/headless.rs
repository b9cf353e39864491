//! Host-memory device backend
//!
//! [`HeadlessDevice`] implements [`BufferDevice`] and [`DescriptorDevice`]
//! entirely in host memory: buffers are boxed byte blocks whose stable heap
//! address doubles as the fabricated GPU virtual address, and descriptor
//! pools are capacity counters. It backs the test suites and lets the
//! allocator stack run in headless tools without a GPU.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{
    BufferDevice, BufferHandle, DescriptorDevice, DescriptorPoolConfig, DescriptorPoolHandle,
    DescriptorSetHandle, DeviceError, RawBuffer, SetLayoutHandle,
};

struct HostBuffer {
    /// Owning storage. Never touched through this field after creation; the
    /// caller writes through the mapped pointer handed out in [`RawBuffer`].
    #[allow(dead_code)]
    storage: Box<[u8]>,
    size: u64,
}

struct BufferTable {
    buffers: FxHashMap<u64, HostBuffer>,
    resident_bytes: u64,
    budget: Option<u64>,
}

struct HostPool {
    max_sets: u32,
    allocated_sets: u32,
    allow_individual_free: bool,
}

/// In-process implementation of the device collaborator traits.
pub struct HeadlessDevice {
    next_id: AtomicU64,
    buffer_table: Mutex<BufferTable>,
    pools: Mutex<FxHashMap<u64, HostPool>>,
}

impl HeadlessDevice {
    /// Device with no memory budget.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffer_table: Mutex::new(BufferTable {
                buffers: FxHashMap::default(),
                resident_bytes: 0,
                budget: None,
            }),
            pools: Mutex::new(FxHashMap::default()),
        }
    }

    /// Device that fails buffer creation once `budget` resident bytes would
    /// be exceeded, for exercising out-of-memory paths.
    #[must_use]
    pub fn with_buffer_budget(budget: u64) -> Self {
        let device = Self::new();
        device.buffer_table.lock().budget = Some(budget);
        device
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of buffers currently alive on the device.
    #[must_use]
    pub fn live_buffer_count(&self) -> usize {
        self.buffer_table.lock().buffers.len()
    }

    /// Number of descriptor pools currently alive on the device.
    #[must_use]
    pub fn live_pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Total bytes of buffer storage currently resident.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        self.buffer_table.lock().resident_bytes
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferDevice for HeadlessDevice {
    fn create_buffer(&self, size: u64) -> Result<RawBuffer, DeviceError> {
        let mut table = self.buffer_table.lock();
        if let Some(budget) = table.budget {
            if table.resident_bytes.saturating_add(size) > budget {
                return Err(DeviceError::OutOfMemory { requested: size });
            }
        }

        let mut storage = vec![0u8; size as usize].into_boxed_slice();
        // The boxed slice's heap block never moves, so the pointer stays
        // valid while the entry lives in the table. Empty buffers get the
        // usual dangling-but-aligned pointer.
        let cpu_ptr = NonNull::new(storage.as_mut_ptr()).unwrap_or(NonNull::dangling());
        let gpu_address = cpu_ptr.as_ptr() as u64;

        let id = self.next_id();
        table.buffers.insert(id, HostBuffer { storage, size });
        table.resident_bytes += size;

        Ok(RawBuffer {
            handle: BufferHandle::new(id),
            gpu_address,
            cpu_ptr,
        })
    }

    fn destroy_buffer(&self, handle: BufferHandle) {
        let mut table = self.buffer_table.lock();
        if let Some(buffer) = table.buffers.remove(&handle.raw()) {
            table.resident_bytes -= buffer.size;
        } else {
            log::warn!("destroy_buffer: unknown handle {:#x}", handle.raw());
        }
    }
}

impl DescriptorDevice for HeadlessDevice {
    fn create_pool(
        &self,
        config: &DescriptorPoolConfig,
    ) -> Result<DescriptorPoolHandle, DeviceError> {
        // Capacity is modeled on max_sets alone; the per-type pool sizes are
        // bookkeeping a real backend would forward to the native API.
        let id = self.next_id();
        self.pools.lock().insert(
            id,
            HostPool {
                max_sets: config.max_sets,
                allocated_sets: 0,
                allow_individual_free: config.allow_individual_free,
            },
        );
        Ok(DescriptorPoolHandle::new(id))
    }

    fn destroy_pool(&self, pool: DescriptorPoolHandle) {
        if self.pools.lock().remove(&pool.raw()).is_none() {
            log::warn!("destroy_pool: unknown handle {:#x}", pool.raw());
        }
    }

    fn allocate_set(
        &self,
        pool: DescriptorPoolHandle,
        _layout: SetLayoutHandle,
    ) -> Result<DescriptorSetHandle, DeviceError> {
        let mut pools = self.pools.lock();
        let entry = pools
            .get_mut(&pool.raw())
            .ok_or(DeviceError::UnknownHandle(pool.raw()))?;
        if entry.allocated_sets >= entry.max_sets {
            return Err(DeviceError::PoolExhausted);
        }
        entry.allocated_sets += 1;
        drop(pools);
        Ok(DescriptorSetHandle::new(self.next_id()))
    }

    fn free_set(
        &self,
        pool: DescriptorPoolHandle,
        _set: DescriptorSetHandle,
    ) -> Result<(), DeviceError> {
        let mut pools = self.pools.lock();
        let entry = pools
            .get_mut(&pool.raw())
            .ok_or(DeviceError::UnknownHandle(pool.raw()))?;
        if !entry.allow_individual_free {
            return Err(DeviceError::IndividualFreeUnsupported);
        }
        entry.allocated_sets = entry.allocated_sets.saturating_sub(1);
        Ok(())
    }

    fn reset_pool(&self, pool: DescriptorPoolHandle) {
        let mut pools = self.pools.lock();
        if let Some(entry) = pools.get_mut(&pool.raw()) {
            entry.allocated_sets = 0;
        } else {
            log::warn!("reset_pool: unknown handle {:#x}", pool.raw());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_config(max_sets: u32, allow_individual_free: bool) -> DescriptorPoolConfig {
        DescriptorPoolConfig {
            pool_sizes: Vec::new(),
            max_sets,
            allow_individual_free,
        }
    }

    #[test]
    fn buffers_are_writable_and_tracked() {
        let device = HeadlessDevice::new();
        let buffer = device.create_buffer(64).unwrap();
        unsafe {
            buffer.cpu_ptr.as_ptr().write(0xAB);
        }
        assert_eq!(device.live_buffer_count(), 1);
        assert_eq!(device.resident_bytes(), 64);

        device.destroy_buffer(buffer.handle);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.resident_bytes(), 0);
    }

    #[test]
    fn budget_is_enforced() {
        let device = HeadlessDevice::with_buffer_budget(100);
        let first = device.create_buffer(80).unwrap();
        assert_eq!(
            device.create_buffer(80).unwrap_err(),
            DeviceError::OutOfMemory { requested: 80 }
        );
        device.destroy_buffer(first.handle);
        assert!(device.create_buffer(80).is_ok());
    }

    #[test]
    fn zero_byte_buffer_is_valid() {
        let device = HeadlessDevice::new();
        let buffer = device.create_buffer(0).unwrap();
        assert_ne!(buffer.handle.raw(), 0);
        device.destroy_buffer(buffer.handle);
    }

    #[test]
    fn pool_capacity_and_reset() {
        let device = HeadlessDevice::new();
        let pool = device.create_pool(&pool_config(2, false)).unwrap();
        let layout = SetLayoutHandle::new(1);

        let a = device.allocate_set(pool, layout).unwrap();
        let b = device.allocate_set(pool, layout).unwrap();
        assert_ne!(a, b);
        assert_eq!(
            device.allocate_set(pool, layout).unwrap_err(),
            DeviceError::PoolExhausted
        );

        assert_eq!(
            device.free_set(pool, a).unwrap_err(),
            DeviceError::IndividualFreeUnsupported
        );

        device.reset_pool(pool);
        assert!(device.allocate_set(pool, layout).is_ok());
        device.destroy_pool(pool);
    }

    #[test]
    fn individual_free_restores_capacity() {
        let device = HeadlessDevice::new();
        let pool = device.create_pool(&pool_config(1, true)).unwrap();
        let layout = SetLayoutHandle::new(7);

        let set = device.allocate_set(pool, layout).unwrap();
        assert_eq!(
            device.allocate_set(pool, layout).unwrap_err(),
            DeviceError::PoolExhausted
        );
        device.free_set(pool, set).unwrap();
        assert!(device.allocate_set(pool, layout).is_ok());
        device.destroy_pool(pool);
    }
}
