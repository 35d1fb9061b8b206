//! Typed wrappers over pooled slots
//!
//! `UninitSlot<T>` is reserved memory that is not yet a `T`; writing a value
//! turns it into a `PoolBox<T>`. Dropping a `PoolBox` runs `T`'s destructor
//! before the memory goes back to the pool, so "released without destroying"
//! cannot happen in safe code.

use core::fmt;
use core::marker::PhantomData;
use core::mem::{ManuallyDrop, MaybeUninit};
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use crate::manager::JobManager;
use crate::slot::{RawSlot, SLOT_ALIGN};

impl JobManager {
    /// Reserve memory for one `T` without constructing it
    ///
    /// # Panics
    ///
    /// Panics if the manager is not initialized.
    pub fn allocate<T>(&self) -> UninitSlot<'_, T> {
        const {
            assert!(
                align_of::<T>() <= SLOT_ALIGN,
                "pooled types must not need more than 16-byte alignment"
            );
        }
        UninitSlot {
            slot: ManuallyDrop::new(self.allocate_uninitialized(size_of::<T>())),
            manager: self,
            _marker: PhantomData,
        }
    }

    /// Move `value` into pooled memory
    pub fn alloc<T>(&self, value: T) -> PoolBox<'_, T> {
        self.allocate::<T>().write(value)
    }

    /// Destroy a pooled value and return its memory to the calling thread's pool
    ///
    /// # Panics
    ///
    /// Panics if `value` was allocated by a different manager.
    pub fn release<T>(&self, value: PoolBox<'_, T>) {
        assert!(
            ptr::eq(self, value.manager),
            "pooled value released to a manager that did not allocate it"
        );
        drop(value);
    }
}

/// Reserved, uninitialized pool memory for one `T`
///
/// Dropping it without writing returns the memory untouched.
pub struct UninitSlot<'m, T> {
    slot: ManuallyDrop<RawSlot>,
    manager: &'m JobManager,
    _marker: PhantomData<T>,
}

impl<'m, T> UninitSlot<'m, T> {
    /// Pointer to the reserved memory
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.slot.as_ptr().cast::<T>().as_ptr()
    }

    /// The reserved memory as `MaybeUninit`
    pub fn as_uninit(&mut self) -> &mut MaybeUninit<T> {
        // SAFETY: The payload is at least size_of::<T>() bytes, aligned to
        // SLOT_ALIGN >= align_of::<T>(), and exclusively owned by self.
        unsafe { &mut *self.as_mut_ptr().cast::<MaybeUninit<T>>() }
    }

    /// Construct the value in place
    pub fn write(mut self, value: T) -> PoolBox<'m, T> {
        self.as_uninit().write(value);
        // SAFETY: The value was just initialized above.
        unsafe { self.assume_init() }
    }

    /// Treat the memory as initialized
    ///
    /// # Safety
    ///
    /// A valid `T` must have been written through [`as_mut_ptr`](Self::as_mut_ptr)
    /// or [`as_uninit`](Self::as_uninit).
    pub unsafe fn assume_init(self) -> PoolBox<'m, T> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: Moving the token out of a value whose Drop will never run.
        let slot = unsafe { ManuallyDrop::take(&mut this.slot) };
        PoolBox {
            slot: ManuallyDrop::new(slot),
            manager: this.manager,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for UninitSlot<'_, T> {
    fn drop(&mut self) {
        // SAFETY: The token is taken exactly once, here.
        let slot = unsafe { ManuallyDrop::take(&mut self.slot) };
        self.manager.release_uninitialized(slot, size_of::<T>());
    }
}

impl<T> fmt::Debug for UninitSlot<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UninitSlot").field("slot", &*self.slot).finish()
    }
}

/// Owned `T` living in pool memory
///
/// Like `Box<T>`, but the memory returns to the dropping thread's pool.
pub struct PoolBox<'m, T> {
    slot: ManuallyDrop<RawSlot>,
    manager: &'m JobManager,
    _marker: PhantomData<T>,
}

// SAFETY: PoolBox<T> owns a T exactly like Box<T>.
// - The slot token is Send and the manager is Sync
// - Shared access only hands out &T
unsafe impl<T: Send> Send for PoolBox<'_, T> {}
unsafe impl<T: Sync> Sync for PoolBox<'_, T> {}

impl<'m, T> PoolBox<'m, T> {
    /// Manager the value was allocated from
    pub fn manager(this: &Self) -> &'m JobManager {
        this.manager
    }

    /// Typed pointer to the value
    pub fn as_non_null(this: &Self) -> NonNull<T> {
        this.slot.as_ptr().cast::<T>()
    }

    /// Move the value out and return the memory to the pool
    pub fn into_inner(this: Self) -> T {
        let (slot, manager) = Self::into_parts(this);
        // SAFETY: The slot holds an initialized T that nothing else owns.
        let value = unsafe { slot.as_ptr().cast::<T>().read() };
        manager.release_uninitialized(slot, size_of::<T>());
        value
    }

    /// Give up ownership without destroying the value
    ///
    /// The returned token still holds a live `T`; the caller must drop it in
    /// place before releasing the slot with `size_of::<T>()`.
    pub fn into_raw(this: Self) -> RawSlot {
        Self::into_parts(this).0
    }

    fn into_parts(this: Self) -> (RawSlot, &'m JobManager) {
        let mut this = ManuallyDrop::new(this);
        // SAFETY: Moving the token out of a value whose Drop will never run.
        let slot = unsafe { ManuallyDrop::take(&mut this.slot) };
        (slot, this.manager)
    }
}

impl<T> Deref for PoolBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The slot holds an initialized T owned by self.
        unsafe { Self::as_non_null(self).as_ref() }
    }
}

impl<T> DerefMut for PoolBox<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The slot holds an initialized T; &mut self is exclusive.
        unsafe { Self::as_non_null(self).as_mut() }
    }
}

impl<T> Drop for PoolBox<'_, T> {
    fn drop(&mut self) {
        // SAFETY: Destroying the value, then recycling its memory.
        // 1. drop_in_place runs T's destructor on the initialized value
        // 2. The token is taken exactly once, here
        // 3. The memory is released only after the destructor finished
        unsafe {
            ptr::drop_in_place(Self::as_non_null(self).as_ptr());
            let slot = ManuallyDrop::take(&mut self.slot);
            self.manager.release_uninitialized(slot, size_of::<T>());
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
