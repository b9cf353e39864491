//! Framepool — transient GPU resource allocation
//!
//! Hands out short-lived regions of GPU-addressable memory (per-draw
//! constant/vertex bytes) and short-lived descriptor-set slots to a real-time
//! rendering pipeline, and reclaims them only once the GPU has provably
//! finished consuming them.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ per frame                                                  │
//! │                                                            │
//! │   LinearHeap ── allocate() ──▶ DynamicAllocation           │
//! │       │                                                    │
//! │       └─ finish_frame(token) ──▶ PageProvider stale queue  │
//! │                                                            │
//! │   DynamicDescriptorSetAllocator ── allocate() ──▶ set      │
//! │       │                                                    │
//! │       └─ release_pools(mask, token) ──▶ pending queue      │
//! └────────────────────────────────────────────────────────────┘
//!
//!   later, once the fence subsystem reports `last_completed >= token`:
//!
//!   release_stale_pages(last_completed)  ──▶ pages back in the size index
//!   release_stale_pools(last_completed)  ──▶ pools reset and back in the
//!                                            free deque
//! ```
//!
//! Actual GPU calls live behind the narrow [`device::BufferDevice`] and
//! [`device::DescriptorDevice`] traits; [`HeadlessDevice`] is a host-memory
//! implementation for tests and headless runs. Completion is an opaque
//! monotonically increasing [`CompletionToken`] supplied by the caller's
//! fence subsystem — this crate never waits on the GPU itself.
//!
//! # Thread Safety
//!
//! The shared providers ([`PageProvider`], [`DescriptorPoolManager`],
//! [`DescriptorSetAllocator`]) are safe to call from any thread; each guards
//! its indices with a single mutex. The per-context allocators
//! ([`LinearHeap`], [`DynamicDescriptorSetAllocator`]) take `&mut self` and
//! perform no locking — one rendering context is driven by one thread at a
//! time, and the borrow checker makes that contract structural.

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod errors;
pub mod utils;

pub use buffer::{DynamicAllocation, DynamicPage, LinearHeap, PageProvider};
pub use descriptor::{
    DescriptorPool, DescriptorPoolManager, DescriptorSetAllocation, DescriptorSetAllocator,
    DynamicDescriptorSetAllocator,
};
pub use device::headless::HeadlessDevice;
pub use device::{
    BufferDevice, BufferHandle, CompletionToken, DescriptorDevice, DescriptorPoolConfig,
    DescriptorPoolHandle, DescriptorPoolSize, DescriptorSetHandle, DescriptorType, DeviceError,
    QueueMask, RawBuffer, SetLayoutHandle,
};
pub use errors::{FramePoolError, Result};
