//! # tessera-job
//!
//! Hierarchical job decomposition on top of [`tessera_pool`].
//!
//! - [`Job`] / [`JobHandle`]: pool-backed, type-erased units of work
//! - [`JobContext`] / [`Spawner`]: bounded fan-out plus one continuation
//! - [`BatchSpawnerJob`]: splits a [`Divisible`] payload into leaf workers
//! - [`InlineExecutor`] / [`ThreadedExecutor`]: reference schedulers
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use tessera_job::prelude::*;
//!
//! struct Sum<'a> {
//!     items: &'a [u32],
//!     total: &'a AtomicUsize,
//! }
//!
//! impl<'a> Job<'a> for Sum<'a> {
//!     fn run(&mut self, _ctx: &mut JobContext<'_, 'a>) {
//!         let sum: u32 = self.items.iter().sum();
//!         self.total.fetch_add(sum as usize, Ordering::Relaxed);
//!     }
//! }
//!
//! let manager = JobManager::initialized(PoolConfig::default())?;
//! let total = AtomicUsize::new(0);
//! let data: Vec<u32> = (1..=10).collect();
//!
//! let executor = InlineExecutor::new(&manager);
//! executor.execute(2, |root| {
//!     let (left, right) = data.split_at(5);
//!     root.create_with(Sum { items: left, total: &total });
//!     root.create_with(Sum { items: right, total: &total });
//! });
//! assert_eq!(total.load(Ordering::Relaxed), 55);
//! # Ok::<(), tessera_pool::PoolError>(())
//! ```

// Job handles erase types over raw pool slots
#![allow(unsafe_code)]

pub mod batch;
pub mod context;
pub mod error;
pub mod executor;
pub mod job;

pub use batch::{BatchPlan, BatchSpawnerJob, BatchWorker, Divisible, SpawnLimits, plan_batches};
pub use context::{JobContext, JobQueue, Spawner};
pub use error::{JobError, JobResult};
pub use executor::{ExecutorConfig, InlineExecutor, ThreadedExecutor};
pub use job::{Job, JobHandle};

/// Common imports
pub mod prelude {
    pub use crate::batch::{BatchSpawnerJob, BatchWorker, Divisible, SpawnLimits};
    pub use crate::context::{JobContext, JobQueue, Spawner};
    pub use crate::executor::{ExecutorConfig, InlineExecutor, ThreadedExecutor};
    pub use crate::job::{Job, JobHandle};
    pub use tessera_pool::{JobManager, PoolConfig};
}
