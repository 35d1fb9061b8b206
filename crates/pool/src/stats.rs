//! Job pool statistics

use std::thread::ThreadId;

/// Snapshot of one thread's pool node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStats {
    /// Registration order of the node
    pub index: usize,
    /// Thread that owns the node
    pub owner: ThreadId,
    /// Number of size classes the node has created
    pub size_classes: usize,
    /// Slots currently pooled across all size classes
    pub pooled_slots: usize,
    /// Allocations served from the node's own pools
    pub local_hits: u64,
    /// Allocations this thread served by stealing from other nodes
    pub stolen_hits: u64,
    /// Allocations that fell through to the heap
    pub misses: u64,
    /// Slots released into this node's pools
    pub releases: u64,
}

/// Manager-wide snapshot, aggregated over every node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Registered thread nodes
    pub nodes: usize,
    /// Blocks ever taken from the heap
    pub slots_created: usize,
    /// Blocks currently sitting in some pool
    pub pooled_slots: usize,
    /// Allocations served locally
    pub local_hits: u64,
    /// Allocations served by stealing
    pub stolen_hits: u64,
    /// Allocations served by the heap
    pub misses: u64,
    /// Releases into any pool
    pub releases: u64,
}

impl PoolStats {
    /// Blocks handed out and not yet returned
    pub fn live_slots(&self) -> usize {
        self.slots_created.saturating_sub(self.pooled_slots)
    }

    /// Fraction of allocations served without touching the heap
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.local_hits + self.stolen_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.local_hits + self.stolen_hits) as f64 / total as f64
        }
    }

    pub(crate) fn accumulate(&mut self, node: &NodeStats) {
        self.nodes += 1;
        self.pooled_slots += node.pooled_slots;
        self.local_hits += node.local_hits;
        self.stolen_hits += node.stolen_hits;
        self.misses += node.misses;
        self.releases += node.releases;
    }
}
