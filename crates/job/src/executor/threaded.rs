//! Scoped worker-pool executor
//!
//! Workers share one lock-free queue. A pending counter goes up when a job
//! is submitted and down after it has run, so children are always counted
//! before their parent is retired and zero means the whole tree is done.
//!
//! Workers live for one `run`. Each retires its pool node on the way out, so
//! the next run's workers adopt those nodes and the manager's node list stays
//! at one node per concurrent worker.

use core::fmt;
use std::num::NonZeroUsize;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_queue::SegQueue;
use tessera_pool::{Backoff, JobManager};
use tracing::debug;

use crate::context::{JobContext, JobQueue, Spawner};
use crate::error::{JobError, JobResult};
use crate::job::JobHandle;

/// Upper bound on worker threads per executor
const MAX_WORKERS: usize = 1024;

/// Worker-pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Number of scoped worker threads per run
    pub worker_count: usize,
    /// Spin with exponential backoff while the queue is momentarily empty
    pub use_backoff: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_count: thread::available_parallelism().map_or(4, NonZeroUsize::get),
            use_backoff: true,
        }
    }
}

impl ExecutorConfig {
    /// `worker_count` workers, backoff enabled
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> JobResult<()> {
        if self.worker_count == 0 {
            return Err(JobError::invalid_config("worker_count must be > 0"));
        }
        if self.worker_count > MAX_WORKERS {
            return Err(JobError::invalid_config(format!(
                "worker_count {} exceeds {MAX_WORKERS}",
                self.worker_count
            )));
        }
        Ok(())
    }
}

/// Marks the executor poisoned if a worker unwinds
struct PoisonGuard<'e>(&'e AtomicBool);

impl Drop for PoisonGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.store(true, Ordering::Release);
        }
    }
}

/// Returns the worker's pool node to the manager when the worker exits
struct RetireGuard<'m>(&'m JobManager);

impl Drop for RetireGuard<'_> {
    fn drop(&mut self) {
        self.0.retire_thread_node();
    }
}

/// Multi-threaded executor over `std::thread::scope`
///
/// Jobs finish on whichever worker picked them up, so job memory is
/// released into that worker's pool and later stolen by others.
pub struct ThreadedExecutor<'a> {
    manager: &'a JobManager,
    config: ExecutorConfig,
    queue: SegQueue<JobHandle<'a>>,
    pending: AtomicUsize,
    executed: AtomicUsize,
    poisoned: AtomicBool,
}

impl<'a> ThreadedExecutor<'a> {
    pub fn new(manager: &'a JobManager, config: ExecutorConfig) -> JobResult<Self> {
        config.validate()?;
        Ok(Self {
            manager,
            config,
            queue: SegQueue::new(),
            pending: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Jobs submitted but not finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Total jobs run over the executor's lifetime
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    /// A job panicked; the executor will not run anything else
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Seed root jobs from the calling thread
    pub fn spawn_root<F>(&self, fan_out: usize, seed: F)
    where
        F: FnOnce(&mut Spawner<'_, 'a>),
    {
        let mut ctx = JobContext::new(self.manager, self);
        let mut spawner = ctx.spawner(fan_out);
        seed(&mut spawner);
    }

    /// Run workers until every pending job has finished
    ///
    /// Returns the number of jobs run.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of the first job that panicked.
    pub fn run(&self) -> usize {
        if self.is_poisoned() {
            return 0;
        }
        let before = self.executed();
        debug!(
            workers = self.config.worker_count,
            pending = self.pending(),
            "executor starting"
        );

        thread::scope(|scope| {
            let workers: Vec<_> = (0..self.config.worker_count)
                .map(|_| scope.spawn(|| self.work()))
                .collect();
            for worker in workers {
                if let Err(payload) = worker.join() {
                    panic::resume_unwind(payload);
                }
            }
        });

        let executed = self.executed() - before;
        debug!(executed, "executor idle");
        executed
    }

    /// Seed and run in one call
    pub fn execute<F>(&self, fan_out: usize, seed: F) -> usize
    where
        F: FnOnce(&mut Spawner<'_, 'a>),
    {
        self.spawn_root(fan_out, seed);
        self.run()
    }

    fn work(&self) {
        // Dropped last, after the worker has released every job it ran
        let _retire = RetireGuard(self.manager);
        let _poison = PoisonGuard(&self.poisoned);
        let mut ctx = JobContext::new(self.manager, self);
        let mut backoff = Backoff::new();

        while !self.is_poisoned() {
            if let Some(job) = self.queue.pop() {
                backoff.reset();
                job.run(&mut ctx);
                self.executed.fetch_add(1, Ordering::Relaxed);
                if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    break;
                }
            } else if self.pending() == 0 {
                break;
            } else if self.config.use_backoff {
                backoff.spin_or_yield();
            } else {
                thread::yield_now();
            }
        }
    }
}

impl<'a> JobQueue<'a> for ThreadedExecutor<'a> {
    fn submit(&self, job: JobHandle<'a>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.queue.push(job);
    }
}

impl fmt::Debug for ThreadedExecutor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedExecutor")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .field("executed", &self.executed())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use tessera_pool::PoolConfig;

    struct Noop;

    impl<'a> Job<'a> for Noop {
        fn run(&mut self, _ctx: &mut JobContext<'_, 'a>) {}
    }

    #[test]
    fn zero_workers_rejected() {
        let manager = JobManager::initialized(PoolConfig::debug()).unwrap();
        let err = ThreadedExecutor::new(&manager, ExecutorConfig::with_workers(0)).unwrap_err();
        assert_eq!(err.code(), "JOB:EXECUTOR:CONFIG");
    }

    #[test]
    fn repeated_runs_reuse_worker_nodes() {
        let manager = JobManager::initialized(PoolConfig::debug()).unwrap();
        let executor = ThreadedExecutor::new(&manager, ExecutorConfig::with_workers(4)).unwrap();
        for _ in 0..50 {
            executor.execute(1, |root| {
                root.create_with(Noop);
            });
        }

        // The seeding thread plus at most one node per worker
        let nodes = manager.stats().nodes;
        assert!(nodes <= 5, "node list grew to {nodes}");
        assert_eq!(executor.executed(), 50);
        assert_eq!(manager.stats().live_slots(), 0);
    }

    #[test]
    fn empty_run_returns_immediately() {
        let manager = JobManager::initialized(PoolConfig::debug()).unwrap();
        let executor = ThreadedExecutor::new(&manager, ExecutorConfig::with_workers(3)).unwrap();
        assert_eq!(executor.run(), 0);
        assert_eq!(executor.pending(), 0);
    }
}
