//! Append-only slot registry
//!
//! Maps slot ids to block headers so free lists can link slots by id. The
//! table is a fixed array of lazily installed segments whose sizes double,
//! so a published entry never moves and lookups need no lock.
//!
//! ## Invariants
//!
//! - Ids are issued once, densely, starting at 1
//! - An entry is written exactly once, before its id escapes the allocating thread
//! - Segments are installed by CAS and only freed when the registry drops
//! - Blocks are owned by pools and tokens, never by the registry itself

use core::num::NonZeroU32;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU8, AtomicU32, Ordering};

use crate::slot::{RawSlot, STATE_LIVE, SlotHeader, SlotId, block_layout};

const BASE_SEGMENT_LEN: usize = 64;
const SEGMENT_COUNT: usize = 26;

/// Highest id the registry can map
pub const MAX_SLOTS: u64 = (BASE_SEGMENT_LEN as u64) * ((1 << SEGMENT_COUNT) - 1);

type Entry = AtomicPtr<SlotHeader>;

/// Id-to-block table shared by every pool of one manager incarnation
pub struct SlotRegistry {
    segments: [AtomicPtr<Entry>; SEGMENT_COUNT],
    next_id: AtomicU32,
}

// SAFETY: SlotRegistry is Send + Sync.
// - Segment pointers and entries are atomics
// - Segments are append-only and freed only in Drop (&mut self)
// - The registry never dereferences the block headers it stores
unsafe impl Send for SlotRegistry {}
unsafe impl Sync for SlotRegistry {}

#[inline]
const fn segment_len(segment: usize) -> usize {
    BASE_SEGMENT_LEN << segment
}

/// Split a zero-based index into (segment, offset)
#[inline]
const fn locate(index: usize) -> (usize, usize) {
    let segment = (index / BASE_SEGMENT_LEN + 1).ilog2() as usize;
    let first = BASE_SEGMENT_LEN * ((1 << segment) - 1);
    (segment, index - first)
}

impl SlotRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            segments: [const { AtomicPtr::new(ptr::null_mut()) }; SEGMENT_COUNT],
            next_id: AtomicU32::new(1),
        }
    }

    /// Number of slots ever allocated through this registry
    pub fn len(&self) -> usize {
        (self.next_id.load(Ordering::Acquire) as usize).saturating_sub(1)
    }

    /// Whether no slot was ever allocated
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a fresh block of `class_size` payload bytes and register it
    ///
    /// The returned slot is `LIVE` and owned by the caller. Out-of-memory
    /// aborts through [`std::alloc::handle_alloc_error`].
    pub fn allocate(&self, class_size: usize) -> RawSlot {
        let raw_id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let id = NonZeroU32::new(raw_id)
            .filter(|raw| u64::from(raw.get()) <= MAX_SLOTS)
            .map(SlotId::new)
            .unwrap_or_else(|| panic!("slot id space exhausted ({MAX_SLOTS} slots)"));

        let layout = block_layout(class_size);
        // SAFETY: Allocating a block for one slot.
        // - layout has non-zero size (header is never empty)
        let raw = unsafe { std::alloc::alloc(layout) };
        let Some(header) = NonNull::new(raw.cast::<SlotHeader>()) else {
            std::alloc::handle_alloc_error(layout)
        };

        // SAFETY: Initializing the header of the fresh block.
        // - header is valid for writes and aligned to SLOT_ALIGN
        // - Nobody else can observe the block before the entry store below
        unsafe {
            header.write(SlotHeader {
                next: AtomicU32::new(0),
                id,
                state: AtomicU8::new(STATE_LIVE),
                class_size,
            });
        }

        self.entry(id).store(header.as_ptr(), Ordering::Release);

        // SAFETY: The block is LIVE and exclusively owned by the new token.
        unsafe { RawSlot::from_header(header) }
    }

    /// Resolve an id to its block header
    ///
    /// # Panics
    ///
    /// Panics if `id` was never issued by this registry.
    pub(crate) fn header(&self, id: SlotId) -> NonNull<SlotHeader> {
        let index = id.get() as usize - 1;
        let (segment, offset) = locate(index);
        let base = self.segments[segment].load(Ordering::Acquire);
        assert!(!base.is_null(), "slot {id} does not belong to this registry");
        // SAFETY: Reading an entry of an installed segment.
        // - base points to segment_len(segment) initialized entries
        // - offset < segment_len(segment) by construction of locate()
        let entry = unsafe { &*base.add(offset) };
        let header = entry.load(Ordering::Acquire);
        NonNull::new(header)
            .unwrap_or_else(|| panic!("slot {id} does not belong to this registry"))
    }

    /// Entry for `id`, installing its segment if needed
    fn entry(&self, id: SlotId) -> &Entry {
        let (segment, offset) = locate(id.get() as usize - 1);
        let base = self.segment(segment);
        // SAFETY: offset is within the installed segment (see locate()).
        unsafe { &*base.add(offset) }
    }

    fn segment(&self, segment: usize) -> *mut Entry {
        let current = self.segments[segment].load(Ordering::Acquire);
        if !current.is_null() {
            return current;
        }

        let len = segment_len(segment);
        let fresh: Box<[Entry]> = (0..len).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        let fresh = Box::into_raw(fresh).cast::<Entry>();

        match self.segments[segment].compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => fresh,
            Err(winner) => {
                // SAFETY: Discarding our unpublished segment.
                // - fresh came from Box<[Entry]> of exactly len elements
                // - The CAS failed, so no other thread has seen it
                drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(fresh, len)) });
                winner
            }
        }
    }
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SlotRegistry {
    fn drop(&mut self) {
        for (segment, slot) in self.segments.iter_mut().enumerate() {
            let base = *slot.get_mut();
            if base.is_null() {
                continue;
            }
            // SAFETY: Freeing a segment installed by segment().
            // - base came from Box<[Entry]> of segment_len(segment) elements
            // - &mut self proves no concurrent readers remain
            drop(unsafe {
                Box::from_raw(ptr::slice_from_raw_parts_mut(base, segment_len(segment)))
            });
        }
    }
}

impl core::fmt::Debug for SlotRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlotRegistry")
            .field("slots", &self.len())
            .finish_non_exhaustive()
    }
}
