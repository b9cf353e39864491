//! Descriptor Allocation Tests
//!
//! Tests for:
//! - DescriptorPoolManager: pool reuse, pending-release queue, reset on
//!   recycle, pool retirement, teardown contract
//! - DescriptorSetAllocator: exhausted-pool cycling, individual freeing,
//!   weak back-reference release
//! - DynamicDescriptorSetAllocator: pool growth, peak tracking, whole-pool
//!   frame recycling

use std::sync::Arc;

use framepool::device::{DescriptorDevice, SetLayoutHandle};
use framepool::{
    DescriptorPoolConfig, DescriptorPoolManager, DescriptorPoolSize, DescriptorSetAllocator,
    DescriptorType, DynamicDescriptorSetAllocator, HeadlessDevice, QueueMask,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(max_sets: u32, allow_individual_free: bool) -> DescriptorPoolConfig {
    DescriptorPoolConfig {
        pool_sizes: vec![
            DescriptorPoolSize {
                ty: DescriptorType::UniformBufferDynamic,
                count: max_sets,
            },
            DescriptorPoolSize {
                ty: DescriptorType::CombinedImageSampler,
                count: max_sets * 2,
            },
        ],
        max_sets,
        allow_individual_free,
    }
}

fn layout() -> SetLayoutHandle {
    SetLayoutHandle::new(0xFEED)
}

// ============================================================================
// DescriptorPoolManager Tests
// ============================================================================

#[test]
fn freed_pools_are_reused_before_creating_new_ones() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let manager = DescriptorPoolManager::new(device.clone(), "MainPool", config(8, false));

    let pool = manager.get_pool().unwrap();
    let handle = pool.handle();
    manager.free_pool(pool);
    assert_eq!(manager.free_pool_count(), 1);

    let pool = manager.get_pool().unwrap();
    assert_eq!(pool.handle(), handle);
    assert_eq!(manager.created_pool_count(), 1);

    manager.free_pool(pool);
    manager.destroy(0);
    assert_eq!(device.live_pool_count(), 0);
}

#[test]
fn pending_pools_wait_for_their_completion_token() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let manager = DescriptorPoolManager::new(device.clone(), "PendingPool", config(8, false));

    let first = manager.get_pool().unwrap();
    let second = manager.get_pool().unwrap();
    manager.discard_pools([first], QueueMask::from_index(0), 1);
    manager.discard_pools([second], QueueMask::from_index(0), 2);
    assert_eq!(manager.pending_pool_count(), 2);

    manager.release_stale_pools(1);
    assert_eq!(manager.free_pool_count(), 1);
    assert_eq!(manager.pending_pool_count(), 1);

    manager.release_stale_pools(2);
    assert_eq!(manager.free_pool_count(), 2);
    assert_eq!(manager.pending_pool_count(), 0);

    manager.destroy(2);
    assert_eq!(device.live_pool_count(), 0);
}

#[test]
fn recycled_pools_come_back_reset() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let manager = DescriptorPoolManager::new(device.clone(), "ResetPool", config(1, false));

    let pool = manager.get_pool().unwrap();
    let handle = pool.handle();
    device.allocate_set(handle, layout()).unwrap();
    manager.discard_pools([pool], QueueMask::from_index(0), 1);
    manager.release_stale_pools(1);

    // Same pool, full capacity again.
    let pool = manager.get_pool().unwrap();
    assert_eq!(pool.handle(), handle);
    assert!(device.allocate_set(handle, layout()).is_ok());

    manager.free_pool(pool);
    manager.destroy(1);
}

#[test]
fn retired_pools_are_never_handed_out_again() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let manager = DescriptorPoolManager::new(device.clone(), "RetiredPool", config(1, false));

    let pool = manager.get_pool().unwrap();
    let handle = pool.handle();
    manager.retire_pool(pool);
    assert_eq!(manager.free_pool_count(), 0);
    assert_eq!(manager.retired_pool_count(), 1);

    let fresh = manager.get_pool().unwrap();
    assert_ne!(fresh.handle(), handle);

    manager.free_pool(fresh);
    manager.destroy(0);
    assert_eq!(device.live_pool_count(), 0);
}

#[test]
#[should_panic(expected = "device must be idled")]
fn manager_destroy_with_pending_pools_is_fatal() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let manager = DescriptorPoolManager::new(device, "FatalPool", config(4, false));
    let pool = manager.get_pool().unwrap();
    manager.discard_pools([pool], QueueMask::ALL, 3);
    manager.destroy(2);
}

// ============================================================================
// DescriptorSetAllocator Tests
// ============================================================================

#[test]
fn exhausted_pools_are_cycled_with_one_retry() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let allocator = DescriptorSetAllocator::new(device.clone(), "SetAlloc", config(2, false));
    let mask = QueueMask::from_index(0);

    let a = allocator.allocate(mask, layout()).unwrap();
    let b = allocator.allocate(mask, layout()).unwrap();
    // Third set exhausts the first pool and lands in a fresh one.
    let c = allocator.allocate(mask, layout()).unwrap();
    assert_eq!(allocator.created_pool_count(), 2);
    assert_ne!(a.set(), b.set());
    assert_ne!(b.set(), c.set());
    assert_ne!(a.pool(), c.pool());

    drop(a);
    drop(b);
    drop(c);
    allocator.destroy(0);
    assert_eq!(device.live_pool_count(), 0);
}

#[test]
fn repeated_exhaustion_always_lands_on_a_new_pool() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    // One set per pool without individual freeing: every allocation after
    // the first exhausts the current pool, so a stale pool creeping back
    // into circulation would stall the allocator on its single retry.
    let allocator = DescriptorSetAllocator::new(device.clone(), "TinyPoolAlloc", config(1, false));
    let mask = QueueMask::from_index(0);

    let sets: Vec<_> = (0..4)
        .map(|_| allocator.allocate(mask, layout()).unwrap())
        .collect();
    assert_eq!(allocator.created_pool_count(), 4);

    let mut handles: Vec<_> = sets.iter().map(|s| s.set()).collect();
    handles.sort_unstable();
    handles.dedup();
    assert_eq!(handles.len(), 4);

    drop(sets);
    allocator.destroy(0);
    assert_eq!(device.live_pool_count(), 0);
}

#[test]
fn individual_freeing_returns_capacity_without_new_pools() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let allocator = DescriptorSetAllocator::new(device.clone(), "FreeingAlloc", config(1, true));
    let mask = QueueMask::from_index(1);

    let first = allocator.allocate(mask, layout()).unwrap();
    assert_eq!(first.queue_mask(), mask);
    first.release();

    // The freed set made room in the same pool.
    let second = allocator.allocate(mask, layout()).unwrap();
    assert_eq!(allocator.created_pool_count(), 1);

    drop(second);
    allocator.destroy(0);
    assert_eq!(device.live_pool_count(), 0);
}

#[test]
fn releasing_a_set_after_allocator_teardown_is_a_noop() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let allocator = DescriptorSetAllocator::new(device, "ShortLivedAlloc", config(4, true));

    let allocation = allocator.allocate(QueueMask::ALL, layout()).unwrap();
    drop(allocator);
    // The weak back-reference fails to upgrade; the set died with its pool.
    drop(allocation);
}

// ============================================================================
// DynamicDescriptorSetAllocator Tests
// ============================================================================

#[test]
fn dynamic_allocator_appends_pools_as_they_fill() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let manager = Arc::new(DescriptorPoolManager::new(
        device.clone(),
        "DynPool",
        config(4, false),
    ));
    let mut allocator = DynamicDescriptorSetAllocator::new(manager.clone(), "Ctx0");

    let mut sets = Vec::new();
    for _ in 0..10 {
        sets.push(allocator.allocate(layout()).unwrap());
    }
    sets.sort_unstable();
    sets.dedup();
    assert_eq!(sets.len(), 10);
    assert_eq!(allocator.allocated_pool_count(), 3);
    assert_eq!(allocator.peak_pool_count(), 3);

    allocator.release_pools(QueueMask::from_index(0), 1);
    assert_eq!(allocator.allocated_pool_count(), 0);
    assert_eq!(manager.pending_pool_count(), 3);

    drop(allocator);
    manager.destroy(1);
    assert_eq!(device.live_pool_count(), 0);
}

#[test]
fn dynamic_pools_are_recycled_across_frames() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let manager = Arc::new(DescriptorPoolManager::new(
        device.clone(),
        "FramePool",
        config(4, false),
    ));
    let mut allocator = DynamicDescriptorSetAllocator::new(manager.clone(), "Ctx1");

    for frame in 1..=4u64 {
        for _ in 0..8 {
            allocator.allocate(layout()).unwrap();
        }
        allocator.release_pools(QueueMask::from_index(0), frame);
        manager.release_stale_pools(frame);
    }

    // Steady state: the two pools from frame 1 keep cycling.
    assert_eq!(manager.created_pool_count(), 2);
    assert_eq!(allocator.peak_pool_count(), 2);

    drop(allocator);
    manager.destroy(4);
    assert_eq!(device.live_pool_count(), 0);
}

#[test]
#[should_panic(expected = "release_pools() was not called")]
fn dropping_a_dynamic_allocator_with_held_pools_is_fatal() {
    init_logger();
    let device = Arc::new(HeadlessDevice::new());
    let manager = Arc::new(DescriptorPoolManager::new(device, "LeakPool", config(4, false)));
    let mut allocator = DynamicDescriptorSetAllocator::new(manager, "LeakyCtx");
    let _ = allocator.allocate(layout()).unwrap();
    drop(allocator);
}
