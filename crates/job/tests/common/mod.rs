//! Shared leaf worker for decomposition tests.
//!
//! `MarkWorker` bumps one counter per item it covers and records the size
//! of its batch, so tests can check coverage and per-leaf bounds.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use tessera_job::{BatchSpawnerJob, BatchWorker, Divisible, Job, JobContext};

/// Counters to mark plus an optional sink for batch sizes
#[derive(Default)]
pub struct Marks<'a> {
    pub counters: &'a [AtomicU32],
    pub batch_sizes: Option<&'a Mutex<Vec<usize>>>,
}

impl Divisible for Marks<'_> {
    fn len(&self) -> usize {
        self.counters.len()
    }

    fn split_at(self, mid: usize) -> (Self, Self) {
        let (head, tail) = self.counters.split_at(mid);
        (
            Self {
                counters: head,
                batch_sizes: self.batch_sizes,
            },
            Self {
                counters: tail,
                batch_sizes: self.batch_sizes,
            },
        )
    }
}

pub struct MarkWorker<'a> {
    marks: Marks<'a>,
}

impl<'a> Job<'a> for MarkWorker<'a> {
    fn run(&mut self, _ctx: &mut JobContext<'_, 'a>) {
        for counter in self.marks.counters {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(sizes) = self.marks.batch_sizes {
            sizes.lock().unwrap().push(self.marks.counters.len());
        }
    }
}

impl<'a> BatchWorker<'a> for MarkWorker<'a> {
    type Parameters = Marks<'a>;

    fn with_parameters(marks: Marks<'a>) -> Self {
        Self { marks }
    }
}

pub type MarkSpawner<'a> = BatchSpawnerJob<'a, MarkWorker<'a>>;

pub fn counters(len: usize) -> Vec<AtomicU32> {
    (0..len).map(|_| AtomicU32::new(0)).collect()
}

/// Indices whose counter is not exactly one
pub fn miscounted(counters: &[AtomicU32]) -> Vec<usize> {
    counters
        .iter()
        .enumerate()
        .filter(|(_, counter)| counter.load(Ordering::Relaxed) != 1)
        .map(|(index, _)| index)
        .collect()
}

/// Opt-in log output for debugging a failing test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}
