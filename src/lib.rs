//! heaplab - an instrumented heap-allocator laboratory
//!
//! Five independent allocation strategies manage fixed-size memory regions
//! behind one lifecycle contract (`init` / `allocate` / `release` / `reset`)
//! and one introspection surface (block table, statistics, operation log),
//! so their behavior can be observed and compared side by side.
//!
//! # Example
//!
//! ```
//! use heaplab::facade::{HeapFacade, HeapKind};
//!
//! let mut heap = HeapFacade::new();
//! heap.init(HeapKind::Coalescing, 4096);
//! let handle = heap.allocate(128);
//! heap.release(handle);
//! assert_eq!(heap.stats().allocated_bytes, 0);
//! ```

#![doc(html_root_url = "https://docs.rs/heaplab")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod facade;
pub mod heap;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

pub use facade::{HeapFacade, HeapKind};
pub use heap::{AllocHandle, HeapStrategy, RegionFlags};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "heaplab";
