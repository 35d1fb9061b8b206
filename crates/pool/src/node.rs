//! Per-thread pool nodes
//!
//! A `PoolNode` bundles the size-class pools of one thread. Nodes are linked
//! into the manager's node list so other threads can steal from them.
//!
//! A thread that is about to exit can retire its node; the next thread that
//! needs a node adopts it, pooled slots included, instead of growing the list.
//!
//! ## Invariants
//!
//! - Only the owning thread adds size classes; other threads only read the
//!   class list and go through the lock-free pool operations
//! - A node has at most one owner; ownership passes only through
//!   `retire` (Release) and a successful `try_adopt` (Acquire)
//! - Class entries and nodes are never unlinked while the manager is initialized

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use crate::registry::SlotRegistry;
use crate::size_class::SizeClassPool;
use crate::stats::NodeStats;

struct ClassEntry {
    pool: SizeClassPool,
    next: *mut ClassEntry,
}

/// Size-class pools owned by one thread
pub struct PoolNode {
    index: usize,
    owner: Mutex<ThreadId>,
    /// Some thread has this node bound
    claimed: AtomicBool,
    classes: AtomicPtr<ClassEntry>,
    pub(crate) next: AtomicPtr<PoolNode>,
    pub(crate) counters: NodeCounters,
}

/// Diagnostic counters, only advanced when stats tracking is on
#[derive(Debug, Default)]
pub(crate) struct NodeCounters {
    pub(crate) local_hits: AtomicU64,
    pub(crate) stolen_hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) releases: AtomicU64,
}

impl NodeCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// SAFETY: PoolNode is Send + Sync.
// - classes/next are atomics; entries are published with Release and never
//   unlinked or mutated after publication except through SizeClassPool's CAS
// - Only the owner thread appends entries (checked in get_or_create)
// - Entries are freed only in Drop (&mut self)
unsafe impl Send for PoolNode {}
unsafe impl Sync for PoolNode {}

impl PoolNode {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            owner: Mutex::new(thread::current().id()),
            claimed: AtomicBool::new(true),
            classes: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
            counters: NodeCounters::default(),
        }
    }

    /// Registration order of this node (0 = first thread to allocate)
    pub fn index(&self) -> usize {
        self.index
    }

    /// Thread that owns (or last owned) this node
    pub fn owner(&self) -> ThreadId {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the node waits for a new owner
    pub fn is_retired(&self) -> bool {
        !self.claimed.load(Ordering::Acquire)
    }

    /// Give up ownership; the caller must not touch the node as owner again
    pub(crate) fn retire(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    /// Take over a retired node for the calling thread
    pub(crate) fn try_adopt(&self) -> bool {
        let adopted = self
            .claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if adopted {
            *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = thread::current().id();
        }
        adopted
    }

    /// Next node in the manager's list
    pub(crate) fn next_node(&self) -> Option<&PoolNode> {
        // SAFETY: Nodes are only freed by JobManager::shutdown(&mut self),
        // which cannot overlap with any borrow of a node.
        unsafe { self.next.load(Ordering::Acquire).as_ref() }
    }

    /// Pool for `class_size`, if this node has one
    pub fn find(&self, class_size: usize) -> Option<&SizeClassPool> {
        self.pools().find(|pool| pool.class_size() == class_size)
    }

    /// Iterate over every pool of this node
    pub fn pools(&self) -> impl Iterator<Item = &SizeClassPool> {
        // SAFETY: Entries stay alive as long as the node (see invariants).
        let mut cursor = unsafe { self.classes.load(Ordering::Acquire).as_ref() };
        core::iter::from_fn(move || {
            let entry = cursor?;
            // SAFETY: next was set before the entry was published.
            cursor = unsafe { entry.next.as_ref() };
            Some(&entry.pool)
        })
    }

    /// Pool for `class_size`, creating it on first use
    ///
    /// Must be called from the owning thread.
    pub(crate) fn get_or_create(
        &self,
        class_size: usize,
        registry: &Arc<SlotRegistry>,
        use_backoff: bool,
    ) -> &SizeClassPool {
        if let Some(pool) = self.find(class_size) {
            return pool;
        }

        debug_assert_eq!(
            thread::current().id(),
            self.owner(),
            "size classes may only be added by the owning thread"
        );

        let entry = Box::into_raw(Box::new(ClassEntry {
            pool: SizeClassPool::with_backoff(class_size, Arc::clone(registry), use_backoff),
            next: self.classes.load(Ordering::Relaxed),
        }));
        self.classes.store(entry, Ordering::Release);

        // SAFETY: The entry was just published and lives as long as the node.
        unsafe { &(*entry).pool }
    }

    /// Free the pooled slots of every size class, returning how many were freed
    pub(crate) fn free_pooled(&mut self) -> usize {
        let mut freed = 0;
        let mut cursor = *self.classes.get_mut();
        while !cursor.is_null() {
            // SAFETY: &mut self excludes every other reader of the entry list.
            let entry = unsafe { &mut *cursor };
            freed += entry.pool.free_pooled();
            cursor = entry.next;
        }
        freed
    }

    pub(crate) fn snapshot(&self) -> NodeStats {
        NodeStats {
            index: self.index,
            owner: self.owner(),
            size_classes: self.pools().count(),
            pooled_slots: self.pools().map(SizeClassPool::free_count).sum(),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            stolen_hits: self.counters.stolen_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            releases: self.counters.releases.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PoolNode {
    fn drop(&mut self) {
        let mut cursor = *self.classes.get_mut();
        while !cursor.is_null() {
            // SAFETY: Reclaiming entries created by get_or_create.
            // - Each entry came from Box::into_raw and appears once in the list
            // - &mut self proves no concurrent readers
            let entry = unsafe { Box::from_raw(cursor) };
            cursor = entry.next;
        }
    }
}

impl core::fmt::Debug for PoolNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolNode")
            .field("index", &self.index)
            .field("owner", &self.owner())
            .field("retired", &self.is_retired())
            .field("size_classes", &self.pools().count())
            .finish_non_exhaustive()
    }
}
