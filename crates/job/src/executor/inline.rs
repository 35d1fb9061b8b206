//! Single-threaded FIFO executor

use core::cell::RefCell;
use core::fmt;
use std::collections::VecDeque;

use tessera_pool::JobManager;

use crate::context::{JobContext, JobQueue, Spawner};
use crate::job::JobHandle;

/// Runs jobs one at a time on the calling thread, oldest first
pub struct InlineExecutor<'a> {
    manager: &'a JobManager,
    queue: RefCell<VecDeque<JobHandle<'a>>>,
}

impl<'a> InlineExecutor<'a> {
    pub fn new(manager: &'a JobManager) -> Self {
        Self {
            manager,
            queue: RefCell::new(VecDeque::new()),
        }
    }

    /// Jobs submitted but not run yet
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Seed root jobs through a one-shot spawner of `fan_out` children
    pub fn spawn_root<F>(&self, fan_out: usize, seed: F)
    where
        F: FnOnce(&mut Spawner<'_, 'a>),
    {
        let mut ctx = JobContext::new(self.manager, self);
        let mut spawner = ctx.spawner(fan_out);
        seed(&mut spawner);
    }

    /// Run until the queue is empty; returns the number of jobs run
    pub fn run_until_idle(&self) -> usize {
        let mut ctx = JobContext::new(self.manager, self);
        let mut executed = 0;
        loop {
            let Some(job) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            job.run(&mut ctx);
            executed += 1;
        }
        executed
    }

    /// Seed and drain in one call
    pub fn execute<F>(&self, fan_out: usize, seed: F) -> usize
    where
        F: FnOnce(&mut Spawner<'_, 'a>),
    {
        self.spawn_root(fan_out, seed);
        self.run_until_idle()
    }
}

impl<'a> JobQueue<'a> for InlineExecutor<'a> {
    fn submit(&self, job: JobHandle<'a>) {
        self.queue.borrow_mut().push_back(job);
    }
}

impl fmt::Debug for InlineExecutor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}
