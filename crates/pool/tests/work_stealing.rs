//! Work-stealing tests for the job allocator.
//!
//! A thread whose own pool is empty must take slots from another thread's
//! pool before touching the heap, and the victim pool must stay consistent.

use std::collections::HashSet;
use std::thread;

use pretty_assertions::assert_eq;
use tessera_pool::{JobManager, PoolConfig, SlotId};

const CLASS: usize = 96;

fn manager(config: PoolConfig) -> JobManager {
    JobManager::initialized(config.with_stats(true)).expect("valid config")
}

/// Allocate `count` slots on a fresh thread and release them there
fn deposit_on_helper_thread(manager: &JobManager, count: usize) -> HashSet<SlotId> {
    thread::scope(|scope| {
        scope
            .spawn(|| {
                let slots: Vec<_> = (0..count)
                    .map(|_| manager.allocate_uninitialized(CLASS))
                    .collect();
                let ids: HashSet<SlotId> = slots.iter().map(|slot| slot.id()).collect();
                for slot in slots {
                    manager.release_uninitialized(slot, CLASS);
                }
                ids
            })
            .join()
            .expect("helper thread panicked")
    })
}

#[test]
fn empty_thread_steals_before_allocating() {
    let manager = manager(PoolConfig::debug());
    let deposited = deposit_on_helper_thread(&manager, 3);

    let stolen: Vec<_> = (0..3).map(|_| manager.allocate_uninitialized(CLASS)).collect();
    for slot in &stolen {
        assert!(deposited.contains(&slot.id()), "slot {} was not stolen", slot.id());
    }

    // Victim is drained; the next request goes to the heap.
    let fresh = manager.allocate_uninitialized(CLASS);
    assert!(!deposited.contains(&fresh.id()));

    let nodes = manager.node_stats();
    assert_eq!(nodes.len(), 2);
    let (victim, thief) = (&nodes[0], &nodes[1]);
    assert_eq!(victim.pooled_slots, 0);
    assert_eq!(victim.misses, 3);
    assert_eq!(thief.stolen_hits, 3);
    assert_eq!(thief.misses, 1);
    assert_eq!(thief.local_hits, 0);

    for slot in stolen {
        manager.release_uninitialized(slot, CLASS);
    }
    manager.release_uninitialized(fresh, CLASS);

    // Released slots land in the thief's own pool, not back at the victim.
    let nodes = manager.node_stats();
    assert_eq!(nodes[0].pooled_slots, 0);
    assert_eq!(nodes[1].pooled_slots, 4);
}

#[test]
fn victim_pool_survives_partial_steal() {
    let manager = manager(PoolConfig::debug());
    let deposited = deposit_on_helper_thread(&manager, 5);

    let stolen = manager.allocate_uninitialized(CLASS);
    assert!(deposited.contains(&stolen.id()));
    assert_eq!(manager.node_stats()[0].pooled_slots, 4);

    // The remaining four still come out intact and distinct.
    let rest: Vec<_> = (0..4).map(|_| manager.allocate_uninitialized(CLASS)).collect();
    let mut ids: HashSet<_> = rest.iter().map(|slot| slot.id()).collect();
    ids.insert(stolen.id());
    assert_eq!(ids, deposited);

    manager.release_uninitialized(stolen, CLASS);
    for slot in rest {
        manager.release_uninitialized(slot, CLASS);
    }
}

#[test]
fn scan_wraps_to_list_head() {
    let manager = manager(PoolConfig::debug());

    // Register this thread first so it ends up at the tail of the list.
    let warmup = manager.allocate_uninitialized(16);
    manager.release_uninitialized(warmup, 16);

    let deposited = deposit_on_helper_thread(&manager, 1);
    let stolen = manager.allocate_uninitialized(CLASS);
    assert!(deposited.contains(&stolen.id()));
    assert_eq!(manager.node_stats()[0].stolen_hits, 1);
    manager.release_uninitialized(stolen, CLASS);
}

#[test]
fn other_size_classes_are_not_stolen() {
    let manager = manager(PoolConfig::debug());
    deposit_on_helper_thread(&manager, 2);

    let other = manager.allocate_uninitialized(CLASS * 2);
    assert_eq!(manager.stats().stolen_hits, 0);
    assert_eq!(manager.stats().misses, 3);
    manager.release_uninitialized(other, CLASS * 2);
}

#[test]
fn stealing_can_be_disabled() {
    let manager = manager(PoolConfig::debug().with_steal(false));
    let deposited = deposit_on_helper_thread(&manager, 2);

    let slot = manager.allocate_uninitialized(CLASS);
    assert!(!deposited.contains(&slot.id()));
    assert_eq!(manager.stats().stolen_hits, 0);
    manager.release_uninitialized(slot, CLASS);
}
