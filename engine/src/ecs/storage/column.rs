//! A typed, contiguous array for one component in one table.
//!
//! Columns are type-erased: elements are runs of bytes whose size and
//! lifecycle come from the column's [`TypeInfo`]. The column never decides
//! its own capacity; the table drives it so that every column's capacity
//! matches the entity vector exactly.

use std::ptr;

use crate::ecs::component::TypeInfo;
use crate::ecs::id::Id;
use crate::ecs::storage::mem::RawStorage;

/// One component column.
pub struct Column {
    data: RawStorage,
    len: usize,
    id: Id,
    ti: TypeInfo,
}

impl Column {
    /// Construct an empty column for the given id and descriptor.
    pub fn new(id: Id, ti: TypeInfo) -> Self {
        Self {
            data: RawStorage::new(ti.layout()),
            len: 0,
            id,
            ti,
        }
    }

    /// The id this column stores data for.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// The type descriptor for the stored elements.
    #[inline]
    pub fn type_info(&self) -> &TypeInfo {
        &self.ti
    }

    /// The element size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.ti.size()
    }

    /// The number of elements.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the column has no elements.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The element capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Pointer to the element at `row`.
    ///
    /// # Panics
    /// Panics in debug builds if the row is outside the capacity.
    #[inline]
    pub fn el(&self, row: usize) -> *mut u8 {
        self.data.ptr_at(row)
    }

    /// Grow the column by `to_add` elements toward a destination capacity
    /// of `dst_cap`, returning a pointer to the first new element.
    ///
    /// When the buffer has to relocate and the descriptor provides a
    /// `ctor_move_dtor` hook, the old elements are moved into a fresh
    /// allocation through that hook rather than a plain realloc, so
    /// non-trivially relocatable payloads stay valid. New elements are
    /// constructed when `construct` is set and a `ctor` hook exists;
    /// otherwise they are left uninitialized.
    pub fn grow(&mut self, to_add: usize, dst_cap: usize, construct: bool) -> *mut u8 {
        debug_assert!(dst_cap >= self.len + to_add, "column capacity underflow");

        let count = self.len;
        let can_realloc = dst_cap != self.data.capacity();
        let ti = self.ti;

        if to_add == 0 {
            if can_realloc {
                self.data.set_capacity(dst_cap);
            }
            return self.data.as_ptr();
        }

        // Relocation through the move hook is only needed when there are
        // elements to carry over and the buffer may actually move.
        let relocate = if count > 0 && can_realloc {
            ti.hooks.ctor_move_dtor
        } else {
            None
        };

        let result = if let Some(move_ctor) = relocate {
            let mut dst = RawStorage::new(ti.layout());
            dst.set_capacity(dst_cap);

            // Relocate existing elements into the new buffer. The old
            // buffer is now moved-from and can be released as raw bytes.
            unsafe { move_ctor(dst.as_ptr(), self.data.as_ptr(), count, &ti) };

            let new_slot = dst.ptr_at(count);
            if construct {
                if let Some(ctor) = ti.hooks.ctor {
                    unsafe { ctor(new_slot, to_add, &ti) };
                }
            }

            self.data = dst;
            new_slot
        } else {
            if can_realloc {
                self.data.set_capacity(dst_cap);
            }
            let new_slot = self.data.ptr_at(count);
            if construct {
                if let Some(ctor) = ti.hooks.ctor {
                    unsafe { ctor(new_slot, to_add, &ti) };
                }
            }
            new_slot
        };

        self.len += to_add;
        debug_assert_eq!(self.data.capacity(), dst_cap);
        result
    }

    /// Drop the last element slot without destructing it. Callers run the
    /// dtor (or move the payload out) first.
    #[inline]
    pub fn remove_last(&mut self) {
        debug_assert!(self.len > 0);
        self.len -= 1;
    }

    /// Swap-remove without lifecycle hooks: copy the last element's bytes
    /// into `row` and drop the last slot.
    pub fn fast_swap_remove(&mut self, row: usize) {
        debug_assert!(row < self.len);
        let last = self.len - 1;
        if row != last {
            unsafe {
                ptr::copy_nonoverlapping(self.el(last), self.el(row), self.size());
            }
        }
        self.len -= 1;
    }

    /// Set the length directly. Used by bulk operations that fill element
    /// slots through other means.
    ///
    /// # Safety
    /// All elements below `len` must be initialized and `len` must not
    /// exceed the capacity.
    #[inline]
    pub unsafe fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.capacity());
        self.len = len;
    }

    /// Shrink the capacity down to the current length.
    pub fn reclaim(&mut self) {
        self.data.set_capacity(self.len);
    }

    /// Release the column storage. All elements must already have been
    /// destructed or moved out.
    pub fn fini(&mut self) {
        self.len = 0;
        self.data.release();
    }

    /// Steal the storage of another column of the same id and size. The
    /// source is left empty.
    pub fn take_from(&mut self, src: &mut Column) {
        debug_assert_eq!(self.id, src.id);
        debug_assert_eq!(self.size(), src.size());
        debug_assert_eq!(self.len, 0);
        self.data.release();
        self.data = std::mem::replace(&mut src.data, RawStorage::new(src.ti.layout()));
        self.len = src.len;
        src.len = 0;
    }
}

// Dropping a column releases the buffer only. Destructing live payloads is
// the table's job before the column goes away; a missed fini leaks rather
// than double-frees.
