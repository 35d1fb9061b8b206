//! Thread-local job allocator
//!
//! `JobManager` hands out job memory from per-thread size-class pools:
//!
//! 1. the calling thread's own pool for the size class,
//! 2. any other thread's pool, scanning from the node after the caller's
//!    and wrapping around to the head of the list,
//! 3. a fresh heap block.
//!
//! Memory always goes back to the pool of the thread that releases it, so
//! idle threads accumulate surplus that busy threads later steal. Nothing is
//! returned to the global allocator until [`JobManager::shutdown`].
//!
//! Short-lived threads hand their node back with
//! [`JobManager::retire_thread_node`]; the next unbound thread adopts it, so
//! the node list tracks peak concurrency rather than total threads seen.
//!
//! The manager is an explicit context rather than a process global:
//! `initialize` and `shutdown` take `&mut self`, so the borrow checker
//! guarantees no thread is allocating while pools are torn down.

use core::alloc::Layout;
use core::cell::RefCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::node::{NodeCounters, PoolNode};
use crate::registry::SlotRegistry;
use crate::size_class::SizeClassPool;
use crate::slot::{RawSlot, SLOT_ALIGN, size_class_for};
use crate::stats::{NodeStats, PoolStats};
use crate::utils::Backoff;

/// Source of process-unique manager incarnation keys; 0 is never issued
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// A node bound to this thread for one manager incarnation
struct Binding {
    epoch: u64,
    /// Dead once the incarnation shuts down, wherever that happens
    alive: Weak<()>,
    node: NonNull<PoolNode>,
}

thread_local! {
    /// Nodes this thread registered, keyed by manager incarnation
    static BOUND_NODES: RefCell<Vec<Binding>> = const { RefCell::new(Vec::new()) };
}

fn bound_node(epoch: u64) -> Option<NonNull<PoolNode>> {
    BOUND_NODES.with_borrow(|nodes| {
        nodes
            .iter()
            .find_map(|binding| (binding.epoch == epoch).then_some(binding.node))
    })
}

fn bind_node(epoch: u64, alive: &Arc<()>, node: NonNull<PoolNode>) {
    BOUND_NODES.with_borrow_mut(|nodes| {
        // Incarnations shut down on other threads never unbound here
        nodes.retain(|binding| binding.alive.strong_count() > 0);
        nodes.push(Binding {
            epoch,
            alive: Arc::downgrade(alive),
            node,
        });
    });
}

fn unbind_node(epoch: u64) -> Option<NonNull<PoolNode>> {
    // The thread may already be tearing down its TLS (manager dropped from
    // another TLS destructor); nothing left to unbind then.
    BOUND_NODES
        .try_with(|nodes| {
            let mut nodes = nodes.borrow_mut();
            let position = nodes.iter().position(|binding| binding.epoch == epoch)?;
            Some(nodes.swap_remove(position).node)
        })
        .ok()
        .flatten()
}

#[cfg(test)]
fn binding_count() -> usize {
    BOUND_NODES.with_borrow(Vec::len)
}

/// Lifecycle of a [`JobManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Constructed, `initialize` not called yet
    Uninitialized,
    /// Ready to allocate
    Initialized,
    /// Pools freed; `initialize` makes it usable again
    ShutDown,
}

/// Size-classed, thread-local, work-stealing job allocator
pub struct JobManager {
    config: PoolConfig,
    state: ManagerState,
    /// Key of the current incarnation in every thread's `BOUND_NODES`
    epoch: u64,
    /// Replaced at shutdown; threads drop bindings whose token is gone
    alive: Arc<()>,
    registry: Arc<SlotRegistry>,
    /// Head of the append-only node list
    nodes: AtomicPtr<PoolNode>,
    node_count: AtomicUsize,
}

impl JobManager {
    /// Create an uninitialized manager
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    /// Create and initialize a manager in one step
    pub fn initialized(config: PoolConfig) -> PoolResult<Self> {
        let mut manager = Self::new(config)?;
        manager.initialize();
        Ok(manager)
    }

    fn with_valid_config(config: PoolConfig) -> Self {
        Self {
            config,
            state: ManagerState::Uninitialized,
            epoch: 0,
            alive: Arc::new(()),
            registry: Arc::new(SlotRegistry::new()),
            nodes: AtomicPtr::new(ptr::null_mut()),
            node_count: AtomicUsize::new(0),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Whether allocation is currently allowed
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state == ManagerState::Initialized
    }

    /// Make the manager usable, starting from empty pools
    ///
    /// Calling it on an initialized manager shuts it down first.
    pub fn initialize(&mut self) {
        self.shutdown();

        self.registry = Arc::new(SlotRegistry::new());
        self.epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        self.state = ManagerState::Initialized;

        debug!(epoch = self.epoch, config = ?self.config, "job manager initialized");
    }

    /// Free every pooled slot and forget every thread node
    ///
    /// Safe to call repeatedly; only the first call after `initialize` does
    /// anything. Slots still held by callers are leaked rather than freed
    /// under them, and reported through `tracing`.
    pub fn shutdown(&mut self) {
        if self.state != ManagerState::Initialized {
            trace!(state = ?self.state, "job manager shutdown skipped");
            return;
        }

        let mut freed = 0;
        let mut node_count = 0;
        let mut cursor = core::mem::replace(self.nodes.get_mut(), ptr::null_mut());
        while !cursor.is_null() {
            // SAFETY: Reclaiming a node published by register_node().
            // - Every node came from Box::leak and appears once in the list
            // - &mut self proves no thread holds a node reference
            let mut node = unsafe { Box::from_raw(cursor) };
            cursor = *node.next.get_mut();
            freed += node.free_pooled();
            node_count += 1;
        }

        let created = self.registry.len();
        let leaked = created.saturating_sub(freed);
        if leaked > 0 {
            warn!(
                leaked,
                created, "job manager shut down with slots still in use; leaking them"
            );
        }

        unbind_node(self.epoch);
        self.alive = Arc::new(());
        self.registry = Arc::new(SlotRegistry::new());
        *self.node_count.get_mut() = 0;
        self.epoch = 0;
        self.state = ManagerState::ShutDown;

        debug!(nodes = node_count, freed, "job manager shut down");
    }

    /// The calling thread's node, registering it on first use
    ///
    /// # Panics
    ///
    /// Panics if the manager is not initialized.
    pub fn get_thread_local_node(&self) -> &PoolNode {
        assert!(
            self.is_initialized(),
            "job manager used while {:?}; call initialize() first",
            self.state
        );

        match bound_node(self.epoch) {
            // SAFETY: Bound nodes live until shutdown(&mut self), which
            // cannot run while &self is borrowed.
            Some(node) => unsafe { node.as_ref() },
            None => self.register_node(),
        }
    }

    /// Hand the calling thread's node over to the next thread that needs one
    ///
    /// For threads about to exit. The node keeps its pooled slots, and other
    /// threads may still steal from it. A later allocation on this thread
    /// binds a node again. Does nothing if the thread has no node.
    pub fn retire_thread_node(&self) {
        if !self.is_initialized() {
            return;
        }
        let Some(node) = unbind_node(self.epoch) else {
            return;
        };
        // SAFETY: Bound nodes live until shutdown(&mut self).
        let node = unsafe { node.as_ref() };
        node.retire();

        debug!(index = node.index(), thread = ?node.owner(), "retired pool node");
    }

    fn register_node(&self) -> &PoolNode {
        if let Some(node) = self.nodes().find(|node| node.try_adopt()) {
            bind_node(self.epoch, &self.alive, NonNull::from(node));
            debug!(index = node.index(), thread = ?node.owner(), "adopted pool node");
            return node;
        }

        let index = self.node_count.fetch_add(1, Ordering::Relaxed);
        let node = NonNull::from(Box::leak(Box::new(PoolNode::new(index))));
        // SAFETY: The node is leaked until shutdown reclaims it.
        let node_ref = unsafe { node.as_ref() };

        let mut backoff = self.config.use_backoff.then(Backoff::new);
        let mut head = self.nodes.load(Ordering::Relaxed);
        loop {
            node_ref.next.store(head, Ordering::Relaxed);
            match self.nodes.compare_exchange(
                head,
                node.as_ptr(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => {
                    head = actual;
                    if let Some(backoff) = backoff.as_mut() {
                        backoff.spin();
                    }
                }
            }
        }
        bind_node(self.epoch, &self.alive, node);

        debug!(index, thread = ?node_ref.owner(), "registered pool node");

        node_ref
    }

    /// Every registered node, most recently registered first
    pub fn nodes(&self) -> impl Iterator<Item = &PoolNode> {
        // SAFETY: Nodes live until shutdown(&mut self).
        let mut cursor = unsafe { self.nodes.load(Ordering::Acquire).as_ref() };
        core::iter::from_fn(move || {
            let node = cursor?;
            cursor = node.next_node();
            Some(node)
        })
    }

    /// Reserve `size` bytes of job memory (at least [`HEADER_SIZE`](crate::HEADER_SIZE))
    ///
    /// Never fails; heap exhaustion aborts the process.
    ///
    /// # Panics
    ///
    /// Panics if the manager is not initialized.
    pub fn allocate_uninitialized(&self, size: usize) -> RawSlot {
        let class_size = size_class_for(size);
        let node = self.get_thread_local_node();

        let mut slot = if let Some(slot) = node.find(class_size).and_then(SizeClassPool::acquire) {
            self.count(&node.counters.local_hits);
            slot
        } else if let Some(slot) = self.steal(node, class_size) {
            self.count(&node.counters.stolen_hits);
            slot
        } else {
            self.count(&node.counters.misses);
            self.registry.allocate(class_size)
        };

        if let Some(pattern) = self.config.alloc_pattern {
            slot.fill(pattern);
        }
        slot
    }

    /// Reserve memory for `layout`, reporting instead of panicking on misuse
    pub fn allocate_layout(&self, layout: Layout) -> PoolResult<RawSlot> {
        if !self.is_initialized() {
            return Err(PoolError::invalid_state(format!(
                "job manager is {:?}",
                self.state
            )));
        }
        if layout.align() > SLOT_ALIGN {
            return Err(PoolError::invalid_alignment(layout.align(), SLOT_ALIGN));
        }
        Ok(self.allocate_uninitialized(layout.size()))
    }

    /// Return a slot to the calling thread's pool for its size class
    ///
    /// The slot does not need to come from this thread. The size class is
    /// created on first release if the thread never used it before.
    ///
    /// # Panics
    ///
    /// Panics if `size` does not round to the slot's size class, if the slot
    /// was issued by another manager incarnation, or if the manager is not
    /// initialized.
    pub fn release_uninitialized(&self, mut slot: RawSlot, size: usize) {
        let class_size = size_class_for(size);
        assert_eq!(
            slot.class_size(),
            class_size,
            "slot {} of size class {} released as {size} bytes (size class {class_size})",
            slot.id(),
            slot.class_size(),
        );

        let node = self.get_thread_local_node();
        if let Some(pattern) = self.config.dealloc_pattern {
            slot.fill(pattern);
        }
        node.get_or_create(class_size, &self.registry, self.config.use_backoff)
            .release(slot);
        self.count(&node.counters.releases);
    }

    fn steal(&self, mine: &PoolNode, class_size: usize) -> Option<RawSlot> {
        if !self.config.steal {
            return None;
        }

        let take = |node: &PoolNode| node.find(class_size).and_then(SizeClassPool::acquire);

        let mut cursor = mine.next_node();
        while let Some(node) = cursor {
            if let Some(slot) = take(node) {
                return Some(slot);
            }
            cursor = node.next_node();
        }

        self.nodes()
            .take_while(|node| !ptr::eq(*node, mine))
            .find_map(take)
    }

    #[inline]
    fn count(&self, counter: &AtomicU64) {
        if self.config.track_stats {
            NodeCounters::bump(counter);
        }
    }

    /// Aggregate statistics over every node
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            slots_created: self.registry.len(),
            ..PoolStats::default()
        };
        for node in self.nodes() {
            stats.accumulate(&node.snapshot());
        }
        stats
    }

    /// Per-node statistics in registration order
    pub fn node_stats(&self) -> Vec<NodeStats> {
        let mut nodes: Vec<_> = self.nodes().map(PoolNode::snapshot).collect();
        nodes.sort_by_key(|node| node.index);
        nodes
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::with_valid_config(PoolConfig::default())
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobManager")
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("nodes", &self.nodes().count())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::HEADER_SIZE;
    use std::thread;

    fn manager() -> JobManager {
        JobManager::initialized(PoolConfig::debug()).unwrap()
    }

    #[test]
    fn lifecycle_states() {
        let mut manager = JobManager::new(PoolConfig::default()).unwrap();
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        manager.initialize();
        assert_eq!(manager.state(), ManagerState::Initialized);
        manager.shutdown();
        assert_eq!(manager.state(), ManagerState::ShutDown);
        manager.shutdown();
        assert_eq!(manager.state(), ManagerState::ShutDown);
    }

    #[test]
    fn invalid_config_rejected() {
        let config = PoolConfig {
            alloc_pattern: Some(1),
            dealloc_pattern: Some(1),
            ..PoolConfig::default()
        };
        assert!(JobManager::new(config).is_err());
    }

    #[test]
    #[should_panic(expected = "call initialize() first")]
    fn allocate_before_initialize_panics() {
        let manager = JobManager::default();
        let _ = manager.allocate_uninitialized(64);
    }

    #[test]
    fn thread_node_is_registered_once() {
        let manager = manager();
        let first = ptr::from_ref(manager.get_thread_local_node());
        let second = ptr::from_ref(manager.get_thread_local_node());
        assert_eq!(first, second);
        assert_eq!(manager.nodes().count(), 1);
    }

    #[test]
    fn exiting_threads_hand_their_node_on() {
        let manager = manager();
        for _ in 0..5 {
            thread::scope(|scope| {
                scope.spawn(|| {
                    let slot = manager.allocate_uninitialized(40);
                    manager.release_uninitialized(slot, 40);
                    manager.retire_thread_node();
                });
            });
        }

        let stats = manager.stats();
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.local_hits, 4);
        assert!(manager.nodes().all(PoolNode::is_retired));

        // Retiring twice, or without a node, is harmless
        manager.retire_thread_node();
        let slot = manager.allocate_uninitialized(40);
        manager.retire_thread_node();
        manager.retire_thread_node();
        manager.release_uninitialized(slot, 40);
        assert_eq!(manager.stats().nodes, 1);
    }

    #[test]
    fn bindings_of_dead_managers_are_pruned() {
        for _ in 0..3 {
            let manager = manager();
            let slot = manager.allocate_uninitialized(40);
            manager.release_uninitialized(slot, 40);
            // Shut down elsewhere, so this thread never unbinds the node
            thread::spawn(move || drop(manager)).join().unwrap();
        }
        assert!(binding_count() >= 3);

        let manager = manager();
        let slot = manager.allocate_uninitialized(40);
        manager.release_uninitialized(slot, 40);
        assert_eq!(binding_count(), 1);
    }

    #[test]
    fn local_reuse_counts_hits() {
        let manager = manager();
        let slot = manager.allocate_uninitialized(40);
        let id = slot.id();
        manager.release_uninitialized(slot, 40);

        let again = manager.allocate_uninitialized(40);
        assert_eq!(again.id(), id);
        manager.release_uninitialized(again, 40);

        let stats = manager.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.releases, 2);
        assert_eq!(stats.slots_created, 1);
        assert_eq!(stats.pooled_slots, 1);
    }

    #[test]
    fn alloc_pattern_fills_payload() {
        let manager = manager();
        let slot = manager.allocate_uninitialized(HEADER_SIZE);
        // SAFETY: The slot payload is HEADER_SIZE initialized bytes.
        let bytes = unsafe { core::slice::from_raw_parts(slot.as_ptr().as_ptr(), HEADER_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0xBB));
        manager.release_uninitialized(slot, HEADER_SIZE);
    }

    #[test]
    #[should_panic(expected = "released as")]
    fn mismatched_size_panics() {
        let manager = manager();
        let slot = manager.allocate_uninitialized(256);
        manager.release_uninitialized(slot, 64);
    }

    #[test]
    fn allocate_layout_reports_errors() {
        let mut manager = manager();
        let too_aligned = Layout::from_size_align(64, 64).unwrap();
        assert_eq!(
            manager.allocate_layout(too_aligned).unwrap_err(),
            PoolError::invalid_alignment(64, SLOT_ALIGN)
        );

        let fine = Layout::new::<[u64; 4]>();
        let slot = manager.allocate_layout(fine).unwrap();
        manager.release_uninitialized(slot, fine.size());

        manager.shutdown();
        assert_eq!(
            manager.allocate_layout(fine).unwrap_err().code(),
            "POOL:SYSTEM:STATE"
        );
    }
}
