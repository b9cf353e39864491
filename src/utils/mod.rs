//! Utility Module
//!
//! - [`mem`]: byte-size formatting for the usage-stats summaries emitted at
//!   teardown.

pub mod mem;

pub use mem::format_bytes;
