//! Dynamic buffer memory
//!
//! - [`PageProvider`]: thread-safe owner of GPU memory pages; best-fit-or-
//!   create allocation, fence-gated recycling through a stale queue.
//! - [`LinearHeap`]: per-rendering-context bump allocator layered on top of
//!   the provider.
//! - [`DynamicPage`] / [`DynamicAllocation`]: the page object and the
//!   per-draw sub-region value object.

pub mod heap;
pub mod page;
pub mod provider;

pub use heap::LinearHeap;
pub use page::{DynamicAllocation, DynamicPage};
pub use provider::PageProvider;
