//! Allocation slots
//!
//! Every slot is one heap block laid out as
//!
//! ```text
//! [SlotHeader | padding to SLOT_ALIGN][payload: class_size bytes]
//! ^ block start                        ^ RawSlot::as_ptr()
//! ```
//!
//! The header lives outside the payload, so a free slot is never
//! reinterpreted as a link node. The free-list link is a slot id rather than
//! a pointer, which lets pool heads carry an ABA tag in the same word.

use core::alloc::Layout;
use core::fmt;
use core::num::NonZeroU32;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use crate::utils::align_up;

/// Alignment of every payload handed out by the pool (SIMD register width)
pub const SLOT_ALIGN: usize = 16;

/// Size of the per-slot header, padded to [`SLOT_ALIGN`]
///
/// Size classes are never smaller than this.
pub const HEADER_SIZE: usize = align_up(size_of::<SlotHeader>(), SLOT_ALIGN);

pub(crate) const STATE_FREE: u8 = 0;
pub(crate) const STATE_LIVE: u8 = 1;

/// Round a requested size up to its size class
#[inline]
pub const fn size_class_for(size: usize) -> usize {
    if size < HEADER_SIZE { HEADER_SIZE } else { size }
}

/// Identity of a slot within one manager incarnation
///
/// Ids are dense, start at 1 and are never reused until the registry that
/// issued them is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(NonZeroU32);

impl SlotId {
    pub(crate) const fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    /// Raw id value
    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Out-of-band bookkeeping in front of every payload
#[repr(C)]
pub(crate) struct SlotHeader {
    /// Id of the next free slot while pooled, 0 terminates the list
    pub(crate) next: AtomicU32,
    pub(crate) id: SlotId,
    pub(crate) state: AtomicU8,
    pub(crate) class_size: usize,
}

impl SlotHeader {
    /// Flip the slot to `LIVE`, returning the previous state
    #[inline]
    pub(crate) fn mark_live(&self) -> u8 {
        self.state.swap(STATE_LIVE, Ordering::AcqRel)
    }

    /// Flip the slot to `FREE`, returning the previous state
    #[inline]
    pub(crate) fn mark_free(&self) -> u8 {
        self.state.swap(STATE_FREE, Ordering::AcqRel)
    }
}

/// Heap layout of a whole block for the given class
pub(crate) fn block_layout(class_size: usize) -> Layout {
    let total = HEADER_SIZE
        .checked_add(class_size)
        .unwrap_or_else(|| panic!("slot size {class_size} overflows the address space"));
    match Layout::from_size_align(total, SLOT_ALIGN) {
        Ok(layout) => layout,
        Err(_) => panic!("slot size {class_size} exceeds the maximum allocation size"),
    }
}

/// Return a block to the global allocator
///
/// # Safety
///
/// `header` must come from [`SlotRegistry::allocate`](crate::SlotRegistry::allocate),
/// must not be reachable from any pool or [`RawSlot`] afterwards, and must
/// not have been freed already.
pub(crate) unsafe fn free_block(header: NonNull<SlotHeader>) {
    // SAFETY: Reading the class size to rebuild the allocation layout.
    // - Caller guarantees header points to a live block from SlotRegistry
    // - class_size is immutable after construction
    let class_size = unsafe { header.as_ref().class_size };
    let layout = block_layout(class_size);
    // SAFETY: Releasing the block with its original layout.
    // - SlotHeader has no Drop glue (atomics and plain integers)
    // - layout matches the one used in SlotRegistry::allocate
    // - Caller guarantees exclusive ownership and no double free
    unsafe { std::alloc::dealloc(header.as_ptr().cast::<u8>(), layout) };
}

/// Owned, uninitialized slot memory
///
/// A `RawSlot` is a move-only token: whoever holds it exclusively owns the
/// payload bytes. Hand it back with `JobManager::release_uninitialized`
/// or [`SizeClassPool::release`](crate::SizeClassPool::release); dropping it
/// leaks the block until the owning manager shuts down.
#[must_use = "a slot that is never released stays unavailable until shutdown"]
pub struct RawSlot {
    header: NonNull<SlotHeader>,
}

// SAFETY: RawSlot is Send.
// - It is an exclusive ownership token for one heap block
// - Header fields touched across threads are atomics or immutable
// - Payload bytes are only reachable through the single token
unsafe impl Send for RawSlot {}

impl RawSlot {
    /// Wrap a header that the caller exclusively owns
    ///
    /// # Safety
    ///
    /// `header` must point to a registered block that is currently `LIVE`
    /// and not owned by any other token or pool.
    #[inline]
    pub(crate) unsafe fn from_header(header: NonNull<SlotHeader>) -> Self {
        Self { header }
    }

    /// Give up the token, returning the header pointer
    #[inline]
    pub(crate) fn into_header(self) -> NonNull<SlotHeader> {
        self.header
    }

    #[inline]
    pub(crate) fn header(&self) -> &SlotHeader {
        // SAFETY: Shared access to the slot header.
        // - The token keeps the block allocated (only shutdown frees blocks)
        // - Mutable header fields are atomics
        unsafe { self.header.as_ref() }
    }

    /// Pointer to the payload, aligned to [`SLOT_ALIGN`]
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        // SAFETY: Offsetting within the same allocation.
        // - Every block is HEADER_SIZE + class_size bytes long
        // - HEADER_SIZE is a multiple of SLOT_ALIGN, so the result is aligned
        unsafe { self.header.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Size class of this slot in bytes
    #[inline]
    pub fn class_size(&self) -> usize {
        self.header().class_size
    }

    /// Identity of this slot
    #[inline]
    pub fn id(&self) -> SlotId {
        self.header().id
    }

    /// Overwrite the whole payload with `byte`
    pub fn fill(&mut self, byte: u8) {
        // SAFETY: Writing class_size bytes into the payload.
        // - &mut self proves exclusive ownership of the payload
        // - The payload is exactly class_size bytes long
        unsafe { self.as_ptr().as_ptr().write_bytes(byte, self.class_size()) };
    }
}

impl fmt::Debug for RawSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSlot")
            .field("id", &self.id())
            .field("class_size", &self.class_size())
            .field("payload", &self.as_ptr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_aligned() {
        assert_eq!(HEADER_SIZE % SLOT_ALIGN, 0);
        assert!(HEADER_SIZE >= size_of::<SlotHeader>());
    }

    #[test]
    fn small_sizes_round_to_header() {
        assert_eq!(size_class_for(0), HEADER_SIZE);
        assert_eq!(size_class_for(1), HEADER_SIZE);
        assert_eq!(size_class_for(HEADER_SIZE), HEADER_SIZE);
        assert_eq!(size_class_for(HEADER_SIZE + 1), HEADER_SIZE + 1);
    }

    #[test]
    fn block_layout_covers_header_and_payload() {
        let layout = block_layout(100);
        assert_eq!(layout.size(), HEADER_SIZE + 100);
        assert_eq!(layout.align(), SLOT_ALIGN);
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn block_layout_rejects_overflow() {
        let _ = block_layout(usize::MAX);
    }
}
