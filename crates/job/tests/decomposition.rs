//! Decomposition tests for `BatchSpawnerJob`.
//!
//! A recording queue runs one job at a time and notes what each run
//! submitted, so the fan-out bound and the concrete scenarios can be
//! checked step by step.

mod common;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Mutex;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tessera_job::{
    InlineExecutor, JobContext, JobHandle, JobQueue, SpawnLimits, plan_batches,
};
use tessera_pool::{JobManager, PoolConfig};

use common::{MarkSpawner, Marks, counters, miscounted};

// ---------------------------------------------------------------------------
// Recording queue
// ---------------------------------------------------------------------------

/// What one job run handed to the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Step {
    job: &'static str,
    children: usize,
    continuations: usize,
}

#[derive(Default)]
struct RecordingQueue<'a> {
    queue: RefCell<VecDeque<JobHandle<'a>>>,
    current: RefCell<Step>,
    steps: RefCell<Vec<Step>>,
}

impl<'a> JobQueue<'a> for RecordingQueue<'a> {
    fn submit(&self, job: JobHandle<'a>) {
        self.current.borrow_mut().children += 1;
        self.queue.borrow_mut().push_back(job);
    }

    fn submit_continuation(&self, job: JobHandle<'a>) {
        self.current.borrow_mut().continuations += 1;
        self.queue.borrow_mut().push_back(job);
    }
}

impl<'a> RecordingQueue<'a> {
    /// Run the oldest job and record what it spawned
    fn step(&self, manager: &'a JobManager) -> Option<Step> {
        let job = self.queue.borrow_mut().pop_front()?;
        *self.current.borrow_mut() = Step {
            job: job.name(),
            ..Step::default()
        };
        let mut ctx = JobContext::new(manager, self);
        job.run(&mut ctx);
        let step = self.current.take();
        self.steps.borrow_mut().push(step.clone());
        Some(step)
    }

    fn drain(&self, manager: &'a JobManager) {
        while self.step(manager).is_some() {}
    }

    fn spawner_steps(&self) -> Vec<Step> {
        self.steps
            .borrow()
            .iter()
            .filter(|step| step.job.contains("BatchSpawnerJob"))
            .cloned()
            .collect()
    }
}

fn manager() -> JobManager {
    JobManager::initialized(PoolConfig::debug()).expect("valid config")
}

fn seed<'a>(
    queue: &RecordingQueue<'a>,
    manager: &'a JobManager,
    marks: Marks<'a>,
    limits: SpawnLimits,
) {
    queue.submit(JobHandle::new(manager, MarkSpawner::with_limits(marks, limits)));
    queue.current.take();
}

// ---------------------------------------------------------------------------
// Concrete scenarios
// ---------------------------------------------------------------------------

#[test]
fn two_hundred_fifty_items_make_three_children() {
    let manager = manager();
    let items = counters(250);
    let sizes = Mutex::new(Vec::new());
    let queue = RecordingQueue::default();
    seed(
        &queue,
        &manager,
        Marks {
            counters: &items,
            batch_sizes: Some(&sizes),
        },
        SpawnLimits::default(),
    );

    let root = queue.step(&manager).expect("root spawner queued");
    assert_eq!((root.children, root.continuations), (3, 0));

    queue.drain(&manager);
    assert_eq!(*sizes.lock().unwrap(), vec![100, 100, 50]);
    assert_eq!(miscounted(&items), Vec::<usize>::new());
}

#[test]
fn twenty_thousand_items_continue_once() {
    let manager = manager();
    let items = counters(20_000);
    let queue = RecordingQueue::default();
    seed(
        &queue,
        &manager,
        Marks {
            counters: &items,
            batch_sizes: None,
        },
        SpawnLimits::default(),
    );
    queue.drain(&manager);

    let spawners: Vec<_> = queue
        .spawner_steps()
        .into_iter()
        .map(|step| (step.children, step.continuations))
        .collect();
    assert_eq!(spawners, vec![(128, 1), (72, 0)]);
    assert_eq!(miscounted(&items), Vec::<usize>::new());
    assert_eq!(manager.stats().live_slots(), 0);
}

#[test]
fn empty_payload_spawns_nothing() {
    let manager = manager();
    let queue = RecordingQueue::default();
    seed(&queue, &manager, Marks::default(), SpawnLimits::default());

    let root = queue.step(&manager).expect("root spawner queued");
    assert_eq!((root.children, root.continuations), (0, 0));
    assert!(queue.step(&manager).is_none());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every item is processed exactly once, whatever the limits
    #[test]
    fn decomposition_is_complete(
        total in 0usize..3_000,
        per_child in 1usize..64,
        max_children in 1usize..16,
    ) {
        let manager = manager();
        let items = counters(total);
        let limits = SpawnLimits::new(per_child, max_children).unwrap();

        let executor = InlineExecutor::new(&manager);
        executor.execute(1, |root| {
            root.create_with(MarkSpawner::with_limits(
                Marks { counters: &items, batch_sizes: None },
                limits,
            ));
        });

        prop_assert!(miscounted(&items).is_empty());
        prop_assert_eq!(manager.stats().live_slots(), 0);
    }

    /// No step exceeds the fan-out bound and no leaf exceeds its batch size
    #[test]
    fn fan_out_is_bounded(
        total in 0usize..3_000,
        per_child in 1usize..64,
        max_children in 1usize..16,
    ) {
        let manager = manager();
        let items = counters(total);
        let sizes = Mutex::new(Vec::new());
        let limits = SpawnLimits::new(per_child, max_children).unwrap();
        let queue = RecordingQueue::default();
        seed(&queue, &manager, Marks { counters: &items, batch_sizes: Some(&sizes) }, limits);
        queue.drain(&manager);

        for step in queue.steps.borrow().iter() {
            prop_assert!(step.children <= max_children, "{step:?}");
            prop_assert!(step.continuations <= 1, "{step:?}");
        }
        prop_assert!(sizes.lock().unwrap().iter().all(|&size| size <= per_child));
    }

    /// Child ranges tile the covered prefix and the continuation takes the rest
    #[test]
    fn plan_ranges_tile_the_input(
        total in 0usize..100_000,
        per_child in 1usize..500,
        max_children in 1usize..256,
    ) {
        let plan = plan_batches(total, SpawnLimits::new(per_child, max_children).unwrap());
        prop_assert_eq!(plan.job_count(), total.div_ceil(per_child).min(max_children));

        let mut next = 0;
        for range in plan.children() {
            prop_assert_eq!(range.start, next);
            prop_assert!(!range.is_empty() && range.len() <= per_child);
            next = range.end;
        }
        match plan.continuation() {
            Some(rest) => {
                prop_assert_eq!(rest.start, next);
                prop_assert_eq!(rest.end, total);
            }
            None => prop_assert_eq!(next, total),
        }
    }
}
