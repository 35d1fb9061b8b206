//! Reference schedulers
//!
//! Both executors implement [`JobQueue`](crate::JobQueue) and seed work
//! through a root spawner. They exist to drive jobs in tests and benches;
//! a real scheduler only needs to implement the queue trait.

mod inline;
mod threaded;

pub use inline::InlineExecutor;
pub use threaded::{ExecutorConfig, ThreadedExecutor};
