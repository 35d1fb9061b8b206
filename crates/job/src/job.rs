//! The executable unit and its pool-backed handle

use core::fmt;
use core::mem::ManuallyDrop;
use core::ptr::{self, NonNull};

use tessera_pool::{JobManager, PoolBox, RawSlot};

use crate::context::JobContext;

/// A unit of work the scheduler runs exactly once
///
/// Jobs own plain parameters: counts and borrowed input/output slices. They
/// never own the buffers those slices point into.
pub trait Job<'a>: Send + 'a {
    /// Do the work; may spawn children and one continuation through `ctx`
    fn run(&mut self, ctx: &mut JobContext<'_, 'a>);

    /// Name used in diagnostics
    fn name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

/// Type-erased job living in pool memory
///
/// Running or dropping the handle destroys the job and returns its memory
/// to the pool of the thread that does it.
pub struct JobHandle<'a> {
    job: NonNull<dyn Job<'a> + 'a>,
    slot: ManuallyDrop<RawSlot>,
    size: usize,
    manager: &'a JobManager,
}

// SAFETY: JobHandle<'a> is Send.
// - It exclusively owns a `dyn Job<'a>`, and Job requires Send
// - The slot token is Send and the manager is Sync
unsafe impl Send for JobHandle<'_> {}

impl<'a> JobHandle<'a> {
    /// Move `job` into pool memory from `manager`
    pub fn new<J: Job<'a>>(manager: &'a JobManager, job: J) -> Self {
        Self::from_box(manager.alloc(job))
    }

    /// Erase the type of an already pooled job
    pub fn from_box<J: Job<'a>>(job: PoolBox<'a, J>) -> Self {
        Self::erase(job).0
    }

    /// Allocate the job and keep a typed pointer for in-place setup
    pub(crate) fn new_typed<J: Job<'a>>(manager: &'a JobManager, job: J) -> (Self, NonNull<J>) {
        Self::erase(manager.alloc(job))
    }

    fn erase<J: Job<'a>>(job: PoolBox<'a, J>) -> (Self, NonNull<J>) {
        let manager = PoolBox::manager(&job);
        let slot = PoolBox::into_raw(job);
        let typed = slot.as_ptr().cast::<J>();
        let handle = Self {
            job: typed,
            slot: ManuallyDrop::new(slot),
            size: size_of::<J>(),
            manager,
        };
        (handle, typed)
    }

    /// Diagnostic name of the job
    pub fn name(&self) -> &'static str {
        // SAFETY: The handle owns an initialized job.
        unsafe { self.job.as_ref() }.name()
    }

    /// Run the job, then destroy it and recycle its memory
    pub fn run(mut self, ctx: &mut JobContext<'_, 'a>) {
        // SAFETY: The handle owns an initialized job; &mut self is exclusive.
        unsafe { self.job.as_mut() }.run(ctx);
    }
}

impl Drop for JobHandle<'_> {
    fn drop(&mut self) {
        // SAFETY: Destroying the job, then recycling its memory.
        // 1. The job is initialized and owned by this handle
        // 2. The token is taken exactly once, here
        // 3. size matches the size_of::<J>() used at allocation
        unsafe {
            ptr::drop_in_place(self.job.as_ptr());
            let slot = ManuallyDrop::take(&mut self.slot);
            self.manager.release_uninitialized(slot, self.size);
        }
    }
}

impl fmt::Debug for JobHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job", &self.name())
            .field("slot", &*self.slot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JobQueue;
    use std::cell::RefCell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_pool::PoolConfig;

    struct Counting {
        runs: Arc<AtomicUsize>,
        drops: Arc<AtomicUsize>,
    }

    impl<'a> Job<'a> for Counting {
        fn run(&mut self, _ctx: &mut JobContext<'_, 'a>) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for Counting {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct NullQueue(RefCell<usize>);

    impl<'a> JobQueue<'a> for NullQueue {
        fn submit(&self, _job: JobHandle<'a>) {
            *self.0.borrow_mut() += 1;
        }
    }

    fn counting() -> (Counting, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let drops = Arc::new(AtomicUsize::new(0));
        let job = Counting {
            runs: Arc::clone(&runs),
            drops: Arc::clone(&drops),
        };
        (job, runs, drops)
    }

    #[test]
    fn run_destroys_and_recycles() {
        let manager = JobManager::initialized(PoolConfig::debug()).unwrap();
        let queue = NullQueue::default();
        let (job, runs, drops) = counting();

        let handle = JobHandle::new(&manager, job);
        assert!(handle.name().ends_with("Counting"));
        let mut ctx = JobContext::new(&manager, &queue);
        handle.run(&mut ctx);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().pooled_slots, 1);
    }

    #[test]
    fn dropping_unrun_handle_releases() {
        let manager = JobManager::initialized(PoolConfig::debug()).unwrap();
        let (job, runs, drops) = counting();

        drop(JobHandle::new(&manager, job));

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().live_slots(), 0);
    }
}
