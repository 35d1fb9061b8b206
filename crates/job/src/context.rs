//! Execution context and bounded spawning
//!
//! A running job sees the scheduler only through [`JobContext`]. Children
//! and the optional continuation are buffered in a [`Spawner`] and reach
//! the scheduler together when the spawner drops, so nothing a job spawns
//! can start before the spawning code is done with it.

use core::fmt;

use smallvec::SmallVec;
use tessera_pool::JobManager;
use tracing::trace;

use crate::job::{Job, JobHandle};

/// Inline capacity for buffered children before the spawner spills to the heap
const INLINE_CHILDREN: usize = 8;

/// Scheduler boundary
///
/// Implementations decide where and when submitted jobs run. No ordering is
/// implied between siblings, or between children and a continuation.
pub trait JobQueue<'a> {
    /// Hand a job to the scheduler
    fn submit(&self, job: JobHandle<'a>);

    /// Hand over the continuation of a spawning job
    fn submit_continuation(&self, job: JobHandle<'a>) {
        self.submit(job);
    }
}

/// What a running job can reach: the allocator and the scheduler
pub struct JobContext<'q, 'a> {
    manager: &'a JobManager,
    queue: &'q dyn JobQueue<'a>,
}

impl<'q, 'a> JobContext<'q, 'a> {
    pub fn new(manager: &'a JobManager, queue: &'q dyn JobQueue<'a>) -> Self {
        Self { manager, queue }
    }

    /// Allocator backing every job spawned from this context
    pub fn manager(&self) -> &'a JobManager {
        self.manager
    }

    /// Start spawning at most `fan_out` children
    ///
    /// # Panics
    ///
    /// Panics if `fan_out` is zero.
    pub fn spawner(&mut self, fan_out: usize) -> Spawner<'_, 'a> {
        Spawner::new(self.manager, self.queue, fan_out)
    }
}

impl fmt::Debug for JobContext<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext").finish_non_exhaustive()
    }
}

/// Bounded child builder
///
/// Jobs created here live in pool memory and can be configured through the
/// returned `&mut J` until the spawner drops. On drop, children are
/// submitted in creation order, then the continuation.
pub struct Spawner<'s, 'a> {
    manager: &'a JobManager,
    queue: &'s dyn JobQueue<'a>,
    fan_out: usize,
    children: SmallVec<[JobHandle<'a>; INLINE_CHILDREN]>,
    continuation: Option<JobHandle<'a>>,
}

impl<'s, 'a> Spawner<'s, 'a> {
    pub(crate) fn new(manager: &'a JobManager, queue: &'s dyn JobQueue<'a>, fan_out: usize) -> Self {
        assert!(fan_out > 0, "spawner fan-out must be at least 1");
        Self {
            manager,
            queue,
            fan_out,
            children: SmallVec::new(),
            continuation: None,
        }
    }

    /// Add a default-constructed child
    ///
    /// # Panics
    ///
    /// Panics if `fan_out` children already exist.
    pub fn create<J: Job<'a> + Default>(&mut self) -> &mut J {
        self.create_with(J::default())
    }

    /// Add `job` as a child
    ///
    /// # Panics
    ///
    /// Panics if `fan_out` children already exist.
    pub fn create_with<J: Job<'a>>(&mut self, job: J) -> &mut J {
        assert!(
            self.children.len() < self.fan_out,
            "fan-out overflow: spawner allows {} children",
            self.fan_out
        );
        let (handle, mut typed) = JobHandle::new_typed(self.manager, job);
        self.children.push(handle);
        // SAFETY: The job lives in pool memory owned by the handle just
        // pushed; moving the handle does not move the job, and the handle
        // outlives the returned borrow of self.
        unsafe { typed.as_mut() }
    }

    /// Set a default-constructed continuation
    ///
    /// # Panics
    ///
    /// Panics if a continuation was already set.
    pub fn create_continuation<J: Job<'a> + Default>(&mut self) -> &mut J {
        self.continuation_with(J::default())
    }

    /// Set `job` as the continuation
    ///
    /// # Panics
    ///
    /// Panics if a continuation was already set.
    pub fn continuation_with<J: Job<'a>>(&mut self, job: J) -> &mut J {
        assert!(
            self.continuation.is_none(),
            "spawner already has a continuation"
        );
        let (handle, mut typed) = JobHandle::new_typed(self.manager, job);
        self.continuation = Some(handle);
        // SAFETY: As in create_with; the handle is owned by self.continuation.
        unsafe { typed.as_mut() }
    }

    /// Maximum number of children
    pub fn fan_out(&self) -> usize {
        self.fan_out
    }

    /// Children created so far
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn has_continuation(&self) -> bool {
        self.continuation.is_some()
    }

    /// Submit everything now; returns the number of jobs handed over
    pub fn finish(mut self) -> usize {
        self.submit_all()
    }

    fn submit_all(&mut self) -> usize {
        let children = self.children.len();
        let continuation = self.continuation.is_some();
        trace!(children, continuation, fan_out = self.fan_out, "submitting spawned jobs");

        for child in self.children.drain(..) {
            self.queue.submit(child);
        }
        if let Some(job) = self.continuation.take() {
            self.queue.submit_continuation(job);
        }
        children + usize::from(continuation)
    }
}

impl Drop for Spawner<'_, '_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // The parent failed; its pending jobs are destroyed, not run.
            self.children.clear();
            self.continuation = None;
            return;
        }
        self.submit_all();
    }
}

impl fmt::Debug for Spawner<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawner")
            .field("fan_out", &self.fan_out)
            .field("children", &self.children.len())
            .field("continuation", &self.continuation.is_some())
            .finish()
    }
}
