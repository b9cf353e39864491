//! Descriptor set allocation
//!
//! The descriptor-set analog of the dynamic buffer stack:
//!
//! - [`DescriptorPoolManager`]: thread-safe pool of descriptor pools with a
//!   fence-gated pending-release queue for whole-pool recycling.
//! - [`DescriptorSetAllocator`]: thread-safe allocator for long-lived sets
//!   with an explicit per-set release path.
//! - [`DynamicDescriptorSetAllocator`]: per-rendering-context allocator for
//!   per-frame transient sets; entire pools are recycled at frame end.

pub mod dynamic_allocator;
pub mod pool_manager;
pub mod set_allocator;

pub use dynamic_allocator::DynamicDescriptorSetAllocator;
pub use pool_manager::{DescriptorPool, DescriptorPoolManager};
pub use set_allocator::{DescriptorSetAllocation, DescriptorSetAllocator};
