//! Batch decomposition
//!
//! A [`BatchSpawnerJob`] splits its payload into at most `max_children`
//! leaf workers of at most `max_items_per_child` items each. Whatever does
//! not fit goes to a single continuation of the same spawner type, which
//! repeats the process later. The spawner never waits for its children.

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::Range;

use tracing::trace;

use crate::context::JobContext;
use crate::error::{JobError, JobResult};
use crate::job::Job;

// ============================================================================
// Limits and planning
// ============================================================================

/// Bounds on a single spawn step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnLimits {
    max_items_per_child: usize,
    max_children: usize,
}

impl SpawnLimits {
    /// 100 items per leaf, 128 leaves per spawn
    pub const DEFAULT: Self = Self {
        max_items_per_child: 100,
        max_children: 128,
    };

    /// Validated limits; both values must be non-zero
    pub fn new(max_items_per_child: usize, max_children: usize) -> JobResult<Self> {
        if max_items_per_child == 0 {
            return Err(JobError::invalid_limits("max_items_per_child must be > 0"));
        }
        if max_children == 0 {
            return Err(JobError::invalid_limits("max_children must be > 0"));
        }
        Ok(Self {
            max_items_per_child,
            max_children,
        })
    }

    pub fn max_items_per_child(&self) -> usize {
        self.max_items_per_child
    }

    pub fn max_children(&self) -> usize {
        self.max_children
    }

    /// Most items one spawn step can hand to its children
    pub fn items_per_spawn(&self) -> usize {
        self.max_items_per_child.saturating_mul(self.max_children)
    }
}

impl Default for SpawnLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// How one spawn step divides `total` items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    total: usize,
    per_child: usize,
    job_count: usize,
}

/// Plan one spawn step over `total` items
pub fn plan_batches(total: usize, limits: SpawnLimits) -> BatchPlan {
    let per_child = limits.max_items_per_child;
    let job_count = total.div_ceil(per_child).min(limits.max_children);
    BatchPlan {
        total,
        per_child,
        job_count,
    }
}

impl BatchPlan {
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of leaf children
    pub fn job_count(&self) -> usize {
        self.job_count
    }

    /// Items handed to the children
    pub fn covered(&self) -> usize {
        self.job_count.saturating_mul(self.per_child).min(self.total)
    }

    /// Items left for the continuation
    pub fn remainder(&self) -> usize {
        self.total - self.covered()
    }

    /// Index range of each child, in order
    pub fn children(&self) -> impl ExactSizeIterator<Item = Range<usize>> + use<> {
        let Self {
            total, per_child, ..
        } = *self;
        (0..self.job_count).map(move |i| {
            let start = i.saturating_mul(per_child);
            start..start.saturating_add(per_child).min(total)
        })
    }

    /// Index range left for the continuation, if any
    pub fn continuation(&self) -> Option<Range<usize>> {
        let covered = self.covered();
        (covered < self.total).then_some(covered..self.total)
    }
}

// ============================================================================
// Divisible payloads
// ============================================================================

/// A payload that can be cut into contiguous item ranges
///
/// Parallel arrays are expressed as tuples; both halves must have the same
/// length.
pub trait Divisible: Sized {
    /// Number of items
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first `mid` items and the rest
    fn split_at(self, mid: usize) -> (Self, Self);
}

impl<T> Divisible for &[T] {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn split_at(self, mid: usize) -> (Self, Self) {
        <[T]>::split_at(self, mid)
    }
}

impl<T> Divisible for &mut [T] {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn split_at(self, mid: usize) -> (Self, Self) {
        self.split_at_mut(mid)
    }
}

impl Divisible for Range<usize> {
    fn len(&self) -> usize {
        ExactSizeIterator::len(self)
    }

    fn split_at(self, mid: usize) -> (Self, Self) {
        assert!(mid <= Divisible::len(&self), "split point out of range");
        let split = self.start + mid;
        (self.start..split, split..self.end)
    }
}

impl<A: Divisible, B: Divisible> Divisible for (A, B) {
    fn len(&self) -> usize {
        debug_assert_eq!(self.0.len(), self.1.len(), "parallel payloads differ in length");
        self.0.len()
    }

    fn split_at(self, mid: usize) -> (Self, Self) {
        let (a_head, a_tail) = self.0.split_at(mid);
        let (b_head, b_tail) = self.1.split_at(mid);
        ((a_head, b_head), (a_tail, b_tail))
    }
}

// ============================================================================
// Spawner job
// ============================================================================

/// A leaf job that processes exactly its slice and never spawns
pub trait BatchWorker<'a>: Job<'a> + Sized {
    type Parameters: Divisible + Default + Send + 'a;

    fn with_parameters(parameters: Self::Parameters) -> Self;
}

/// Generic spawner: leaf workers for what fits, one continuation for the rest
pub struct BatchSpawnerJob<'a, W: BatchWorker<'a>> {
    parameters: W::Parameters,
    limits: SpawnLimits,
    _worker: PhantomData<fn() -> W>,
}

impl<'a, W: BatchWorker<'a>> BatchSpawnerJob<'a, W> {
    pub fn new(parameters: W::Parameters) -> Self {
        Self::with_limits(parameters, SpawnLimits::DEFAULT)
    }

    pub fn with_limits(parameters: W::Parameters, limits: SpawnLimits) -> Self {
        Self {
            parameters,
            limits,
            _worker: PhantomData,
        }
    }

    pub fn parameters(&self) -> &W::Parameters {
        &self.parameters
    }

    /// Payload still to be spawned; usable from `Spawner::create`
    pub fn parameters_mut(&mut self) -> &mut W::Parameters {
        &mut self.parameters
    }

    pub fn limits(&self) -> SpawnLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: SpawnLimits) {
        self.limits = limits;
    }
}

impl<'a, W: BatchWorker<'a>> Default for BatchSpawnerJob<'a, W> {
    fn default() -> Self {
        Self::new(W::Parameters::default())
    }
}

impl<'a, W: BatchWorker<'a>> Job<'a> for BatchSpawnerJob<'a, W> {
    fn run(&mut self, ctx: &mut JobContext<'_, 'a>) {
        let mut rest = mem::take(&mut self.parameters);
        let plan = plan_batches(rest.len(), self.limits);
        trace!(
            job = self.name(),
            total = plan.total(),
            children = plan.job_count(),
            remainder = plan.remainder(),
            "planned batch"
        );
        if plan.job_count() == 0 {
            return;
        }

        let mut spawner = ctx.spawner(plan.job_count());
        for range in plan.children() {
            let (head, tail) = rest.split_at(range.end - range.start);
            spawner.create_with(W::with_parameters(head));
            rest = tail;
        }
        if plan.continuation().is_some() {
            spawner.continuation_with(Self::with_limits(rest, self.limits));
        }
    }
}

impl<'a, W: BatchWorker<'a>> fmt::Debug for BatchSpawnerJob<'a, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSpawnerJob")
            .field("worker", &core::any::type_name::<W>())
            .field("items", &self.parameters.len())
            .field("limits", &self.limits)
            .finish()
    }
}
