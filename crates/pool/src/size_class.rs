//! Lock-free free list for one size class
//!
//! # Safety
//!
//! The pool is a Treiber stack of slot ids:
//! - The head packs `(tag << 32) | id` into one `AtomicU64`; id 0 means empty
//! - Each successful push or pop bumps the tag, so a stale head word never
//!   matches after the slot it names was popped and pushed back (ABA)
//! - Links live in the out-of-band slot header, never in payload bytes
//! - Blocks are never freed while the pool is alive, so reading a stale
//!   link during a lost race reads valid (if outdated) memory
//!
//! ## Invariants
//!
//! - Every slot reachable from `head` is `FREE` and of exactly `class_size`
//! - A slot is reachable from at most one pool at a time
//! - `free_count` equals the stack length when no operation is in flight

use core::fmt;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::registry::SlotRegistry;
use crate::slot::{RawSlot, STATE_FREE, STATE_LIVE, SlotId, free_block};
use crate::utils::Backoff;

#[inline]
const fn pack(id: u32, tag: u32) -> u64 {
    ((tag as u64) << 32) | id as u64
}

#[inline]
const fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

/// Free list of equally sized slots
///
/// `acquire` and `release` are safe to call from any number of threads at
/// once. Neither blocks, allocates, nor frees; contention only costs CAS
/// retries.
pub struct SizeClassPool {
    class_size: usize,
    head: AtomicU64,
    free_count: AtomicUsize,
    registry: Arc<SlotRegistry>,
    use_backoff: bool,
}

impl SizeClassPool {
    /// Create an empty pool for `class_size` byte slots issued by `registry`
    pub fn new(class_size: usize, registry: Arc<SlotRegistry>) -> Self {
        Self::with_backoff(class_size, registry, true)
    }

    /// Create an empty pool, choosing whether CAS retries back off
    pub fn with_backoff(class_size: usize, registry: Arc<SlotRegistry>, use_backoff: bool) -> Self {
        Self {
            class_size,
            head: AtomicU64::new(pack(0, 0)),
            free_count: AtomicUsize::new(0),
            registry,
            use_backoff,
        }
    }

    /// Size class served by this pool
    #[inline]
    pub fn class_size(&self) -> usize {
        self.class_size
    }

    /// Number of pooled slots (exact in absence of races)
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    /// Whether the stack is currently empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        unpack(self.head.load(Ordering::Acquire)).0 == 0
    }

    /// Pop a free slot, or `None` if the pool is empty
    pub fn acquire(&self) -> Option<RawSlot> {
        let mut backoff = self.use_backoff.then(Backoff::new);
        let mut head = self.head.load(Ordering::Acquire);

        loop {
            let (id, tag) = unpack(head);
            let id = SlotId::new(NonZeroU32::new(id)?);
            let header = self.registry.header(id);

            // SAFETY: Reading the link of the current head.
            // - Registered blocks stay allocated while this pool holds the registry
            // - next is atomic, so a concurrent re-push cannot race on it
            // - A stale value is harmless: the tagged CAS below rejects it
            let next = unsafe { header.as_ref() }.next.load(Ordering::Acquire);

            match self.head.compare_exchange(
                head,
                pack(next, tag.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.free_count.fetch_sub(1, Ordering::Relaxed);
                    // SAFETY: The CAS unlinked this slot, so we own it exclusively.
                    let slot = unsafe { RawSlot::from_header(header) };
                    let previous = slot.header().mark_live();
                    debug_assert_eq!(previous, STATE_FREE, "pooled slot {id} was not free");
                    return Some(slot);
                }
                Err(actual) => {
                    head = actual;
                    if let Some(backoff) = backoff.as_mut() {
                        backoff.spin();
                    }
                }
            }
        }
    }

    /// Push a slot onto the free list
    ///
    /// # Panics
    ///
    /// Panics if the slot belongs to another size class or another registry,
    /// or is not live (double release).
    pub fn release(&self, slot: RawSlot) {
        assert_eq!(
            slot.class_size(),
            self.class_size,
            "slot {} of size class {} released into the pool for size class {}",
            slot.id(),
            slot.class_size(),
            self.class_size
        );
        let id = slot.id();
        assert_eq!(
            self.registry.header(id).as_ptr().cast_const(),
            core::ptr::from_ref(slot.header()),
            "slot {id} belongs to another manager incarnation"
        );

        let previous = slot.header().mark_free();
        assert_eq!(previous, STATE_LIVE, "slot {id} released twice");

        let header = slot.into_header();
        // SAFETY: We still own the block; only its atomic link is touched below.
        let header = unsafe { header.as_ref() };

        let mut backoff = self.use_backoff.then(Backoff::new);
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let (head_id, tag) = unpack(head);
            header.next.store(head_id, Ordering::Relaxed);

            match self.head.compare_exchange(
                head,
                pack(id.get(), tag.wrapping_add(1)),
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
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Free every pooled slot through the global allocator
    ///
    /// Returns the number of blocks freed. Requires `&mut self`, so no other
    /// thread can be acquiring or releasing concurrently.
    pub(crate) fn free_pooled(&mut self) -> usize {
        let mut freed = 0;
        while let Some(slot) = self.acquire() {
            // SAFETY: The slot was just unlinked and is owned by nobody else.
            unsafe { free_block(slot.into_header()) };
            freed += 1;
        }
        freed
    }
}

impl Drop for SizeClassPool {
    fn drop(&mut self) {
        self.free_pooled();
    }
}

impl fmt::Debug for SizeClassPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeClassPool")
            .field("class_size", &self.class_size)
            .field("free_count", &self.free_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(class_size: usize) -> (Arc<SlotRegistry>, SizeClassPool) {
        let registry = Arc::new(SlotRegistry::new());
        let pool = SizeClassPool::new(class_size, Arc::clone(&registry));
        (registry, pool)
    }

    #[test]
    fn empty_pool_acquires_nothing() {
        let (_registry, pool) = pool(64);
        assert!(pool.is_empty());
        assert!(pool.acquire().is_none());
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn release_then_acquire_is_lifo() {
        let (registry, pool) = pool(64);
        let a = registry.allocate(64);
        let b = registry.allocate(64);
        let (a_id, b_id) = (a.id(), b.id());

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.free_count(), 2);

        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_eq!(first.id(), b_id);
        assert_eq!(second.id(), a_id);
        assert!(pool.acquire().is_none());

        pool.release(first);
        pool.release(second);
    }

    #[test]
    fn tag_advances_on_every_operation() {
        let (registry, pool) = pool(32);
        let slot = registry.allocate(32);
        let id = slot.id();

        pool.release(slot);
        let (head_id, tag) = unpack(pool.head.load(Ordering::Relaxed));
        assert_eq!(head_id, id.get());
        assert_eq!(tag, 1);

        let slot = pool.acquire().unwrap();
        let (head_id, tag) = unpack(pool.head.load(Ordering::Relaxed));
        assert_eq!(head_id, 0);
        assert_eq!(tag, 2);
        pool.release(slot);
    }

    #[test]
    #[should_panic(expected = "released into the pool for size class")]
    fn mismatched_class_panics() {
        let (registry, pool) = pool(64);
        pool.release(registry.allocate(128));
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_panics() {
        let (registry, pool) = pool(64);
        let slot = registry.allocate(64);
        let header = slot.into_header();
        // SAFETY: Deliberately forging a second token to exercise the state check.
        pool.release(unsafe { RawSlot::from_header(header) });
        pool.release(unsafe { RawSlot::from_header(header) });
    }

    #[test]
    fn drop_frees_pooled_slots() {
        let (registry, mut pool) = pool(48);
        for _ in 0..10 {
            pool.release(registry.allocate(48));
        }
        assert_eq!(pool.free_pooled(), 10);
        assert_eq!(pool.free_count(), 0);
    }
}
