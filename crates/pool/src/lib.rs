//! # tessera-pool
//!
//! Memory pool for short-lived job objects.
//!
//! - [`SizeClassPool`]: lock-free free list for one allocation size
//! - [`JobManager`]: per-thread pools with work stealing and heap fallback
//! - [`PoolBox`] / [`UninitSlot`]: typed wrappers that always destroy before recycling
//!
//! ## Quick Start
//!
//! ```rust
//! use tessera_pool::prelude::*;
//!
//! let manager = JobManager::initialized(PoolConfig::default())?;
//!
//! let value = manager.alloc([1.0f32; 12]);
//! assert_eq!(value[0], 1.0);
//! drop(value); // memory goes back to this thread's pool
//!
//! // Same size class, same thread: the slot is reused.
//! let again = manager.allocate_uninitialized(size_of::<[f32; 12]>());
//! manager.release_uninitialized(again, size_of::<[f32; 12]>());
//! # Ok::<(), tessera_pool::PoolError>(())
//! ```
//!
//! ## Memory lifecycle
//!
//! Blocks come from the global allocator on a pool miss and go back to it
//! only in [`JobManager::shutdown`] (or when the manager drops). Releasing
//! never frees; it pushes the block onto the releasing thread's pool.

// Lock-free free lists and raw slot tokens are the point of this crate
#![allow(unsafe_code)]
// Pointer casts between slot headers and payload bytes are reviewed per-site
#![allow(clippy::cast_ptr_alignment)]

pub mod config;
pub mod error;
pub mod manager;
pub mod node;
pub mod pool_box;
pub mod registry;
pub mod size_class;
pub mod slot;
pub mod stats;
pub mod utils;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use manager::{JobManager, ManagerState};
pub use node::PoolNode;
pub use pool_box::{PoolBox, UninitSlot};
pub use registry::{MAX_SLOTS, SlotRegistry};
pub use size_class::SizeClassPool;
pub use slot::{HEADER_SIZE, RawSlot, SLOT_ALIGN, SlotId, size_class_for};
pub use stats::{NodeStats, PoolStats};
pub use utils::Backoff;

/// Common imports
pub mod prelude {
    pub use crate::config::PoolConfig;
    pub use crate::error::{PoolError, PoolResult};
    pub use crate::manager::JobManager;
    pub use crate::pool_box::{PoolBox, UninitSlot};
    pub use crate::slot::RawSlot;
}
