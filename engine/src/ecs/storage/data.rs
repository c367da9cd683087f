//! The mutable storage of a table: parallel entity/record arrays, the
//! component columns and the bitset columns, together with the row-level
//! operations (append, delete, move, swap, merge, shrink).
//!
//! Every operation keeps the core invariants: `entities` and `records`
//! stay the same length, every column stays length- and capacity-
//! synchronized with `entities`, and every bitset column tracks one bit
//! per row. Tables whose flags carry no complex bits (no hooks, no
//! toggles) take fast paths that never dispatch through hook pointers.

use std::ptr;
use std::slice;

use crate::ecs::component::{HookContext, IterHook};
use crate::ecs::entity::{self, Entity};
use crate::ecs::id;
use crate::ecs::storage::bitset::BitsetColumn;
use crate::ecs::storage::column::Column;
use crate::ecs::storage::flags::{self, TableFlags};
use crate::ecs::storage::TableId;

/// The mutable data of one table.
pub struct TableData {
    /// One entity id per row.
    pub entities: Vec<Entity>,
    /// One entity-index key per row; `None` until the row is committed.
    pub records: Vec<Option<Entity>>,
    /// One column per data-carrying id, sorted by id.
    pub columns: Box<[Column]>,
    /// One bitset column per toggle-capable id, sorted by id.
    pub bitsets: Box<[BitsetColumn]>,
    /// Change counters: slot 0 for the entity vector, slot `c + 1` for
    /// column `c`. Allocated on first subscription.
    dirty_state: Option<Box<[u32]>>,
    /// Copy of the owning table's flags.
    pub flags: TableFlags,
    /// Reentrancy guard; mutating operations require 0.
    lock: i32,
}

impl TableData {
    pub fn new(columns: Box<[Column]>, bitsets: Box<[BitsetColumn]>, flags: TableFlags) -> Self {
        Self {
            entities: Vec::new(),
            records: Vec::new(),
            columns,
            bitsets,
            dirty_state: None,
            flags,
            lock: 0,
        }
    }

    /// The number of rows.
    #[inline]
    pub fn count(&self) -> usize {
        self.entities.len()
    }

    /// The number of component columns.
    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Bump the nesting lock.
    #[inline]
    pub fn lock(&mut self) {
        self.lock += 1;
    }

    /// Drop one level of the nesting lock.
    ///
    /// # Panics
    /// Panics if the lock is already 0.
    #[inline]
    pub fn unlock(&mut self) {
        self.lock -= 1;
        assert!(self.lock >= 0, "table lock underflow");
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock != 0
    }

    /// Assert that no reentrant mutation is in progress.
    #[inline]
    pub fn assert_unlocked(&self) {
        assert_eq!(self.lock, 0, "mutation of a locked table");
    }

    /// Bump a dirty counter if change tracking is active.
    #[inline]
    pub fn mark_dirty(&mut self, index: usize) {
        if let Some(state) = self.dirty_state.as_mut() {
            state[index] += 1;
        }
    }

    /// The dirty counters, if change tracking is active.
    pub fn dirty_state(&self) -> Option<&[u32]> {
        self.dirty_state.as_deref()
    }

    /// Get the dirty counters, allocating them on first use. Counters
    /// start at 1 so a fresh subscription sees every column as changed.
    pub fn dirty_state_ensure(&mut self) -> &[u32] {
        if self.dirty_state.is_none() {
            let state = vec![1u32; self.columns.len() + 1];
            self.dirty_state = Some(state.into_boxed_slice());
        }
        self.dirty_state.as_deref().expect("dirty state just allocated")
    }

    /// Append one entity. Returns the new row.
    ///
    /// `record` is the entity-index key stored alongside the row; the
    /// caller owns the index update itself. With `construct`, new column
    /// elements run their ctor; with `on_add`, the on_add hook fires for
    /// every column that has one.
    pub fn append(
        &mut self,
        entity: Entity,
        record: Option<Entity>,
        construct: bool,
        on_add: bool,
    ) -> usize {
        let count = self.entities.len();
        self.entities.push(entity);
        self.records.push(record);
        debug_assert_eq!(self.entities.len(), self.records.len());

        self.mark_dirty(0);

        // Column capacity always tracks the entity vector exactly.
        let cap = self.entities.capacity();

        // Fast path: no hooks, no toggles, nothing to dispatch.
        if self.flags & flags::COMPLEX == 0 {
            for column in self.columns.iter_mut() {
                column.grow(1, cap, false);
            }
            return count;
        }

        for column in self.columns.iter_mut() {
            column.grow(1, cap, construct);

            if on_add {
                if let Some(hook) = column.type_info().hooks.on_add {
                    invoke_hook(hook, &self.entities[count..], column, count, 1);
                }
            }

            debug_assert_eq!(column.len(), self.entities.len());
            debug_assert_eq!(column.capacity(), self.entities.capacity());
        }

        for bitset in self.bitsets.iter_mut() {
            bitset.data.addn(1);
        }

        count
    }

    /// Append `to_add` rows at once. Entity ids come from `ids` or are
    /// zeroed; record keys start out `None`. Column elements are always
    /// constructed; on_add notification belongs to the caller. Returns the
    /// first new row.
    pub fn appendn(&mut self, to_add: usize, ids: Option<&[Entity]>) -> usize {
        let cur_count = self.entities.len();

        self.entities.reserve(to_add);
        match ids {
            Some(ids) => {
                debug_assert_eq!(ids.len(), to_add);
                self.entities.extend_from_slice(ids);
            }
            None => self.entities.resize(cur_count + to_add, id::NULL),
        }
        self.records.resize(cur_count + to_add, None);

        let cap = self.entities.capacity();
        for column in self.columns.iter_mut() {
            column.grow(to_add, cap, true);
            debug_assert_eq!(column.capacity(), cap);
        }

        for bitset in self.bitsets.iter_mut() {
            bitset.data.addn(to_add);
        }

        self.mark_dirty(0);

        cur_count
    }

    /// Delete the row, swap-removing the last row into its place. Patches
    /// the moved row's entity-index record. With `destruct`, remove hooks
    /// and dtors fire for the deleted row. Returns the remaining count.
    pub fn delete(&mut self, index: &mut entity::Index, row: usize, destruct: bool) -> usize {
        let count = self.entities.len();
        assert!(count > 0, "delete from an empty table");
        let last = count - 1;
        assert!(row <= last, "row {} out of bounds (count: {})", row, count);

        // Move the last entity and record into the hole.
        let entity_to_move = self.entities[last];
        let entity_to_delete = self.entities[row];
        self.entities[row] = entity_to_move;
        self.entities.pop();

        let record_to_move = self.records[last];
        self.records[row] = record_to_move;
        self.records.pop();

        // The moved row's record now reports the new row; flag bits stay.
        if row != last {
            if let Some(moved) = record_to_move {
                index.set_row(moved, row);
            }
        }

        self.mark_dirty(0);

        // Fast path: plain byte removal. Toggle-free by definition, so
        // there are no bitset columns to touch.
        if self.flags & flags::COMPLEX == 0 {
            if row == last {
                for column in self.columns.iter_mut() {
                    column.remove_last();
                }
            } else {
                for column in self.columns.iter_mut() {
                    column.fast_swap_remove(row);
                }
            }
            return last;
        }

        if row == last {
            // Deleting the trailing row: destruct in place, then drop it.
            if destruct && (self.flags & flags::HAS_DTORS != 0) {
                for column in self.columns.iter_mut() {
                    invoke_remove_hooks(
                        column,
                        slice::from_ref(&entity_to_delete),
                        row,
                        1,
                        true,
                    );
                }
            }
            for column in self.columns.iter_mut() {
                column.remove_last();
            }
        } else if self.flags & (flags::HAS_DTORS | flags::HAS_MOVE) != 0 {
            // Mid-table with lifecycle hooks: notify, then move the last
            // element into the hole through move_dtor (or plain bytes).
            for column in self.columns.iter_mut() {
                let ti = *column.type_info();
                let dst = column.el(row);
                let src = column.el(last);

                if destruct {
                    if let Some(hook) = ti.hooks.on_remove {
                        invoke_hook(hook, slice::from_ref(&entity_to_delete), column, row, 1);
                    }
                }

                if let Some(move_dtor) = ti.hooks.move_dtor {
                    unsafe { move_dtor(dst, src, 1, &ti) };
                } else {
                    unsafe { ptr::copy_nonoverlapping(src, dst, ti.size()) };
                }

                column.remove_last();
            }
        } else {
            for column in self.columns.iter_mut() {
                column.fast_swap_remove(row);
            }
        }

        for bitset in self.bitsets.iter_mut() {
            bitset.data.remove(row);
        }

        last
    }

    /// Swap two rows: entities, records, bitset bits and column bytes.
    /// Both rows must be committed (record keys present).
    pub fn swap(&mut self, index: &mut entity::Index, row_1: usize, row_2: usize) {
        if row_1 == row_2 {
            return;
        }

        self.mark_dirty(0);

        let e1 = self.entities[row_1];
        let e2 = self.entities[row_2];

        assert!(
            self.records[row_1].is_some() && self.records[row_2].is_some(),
            "swap of uncommitted rows"
        );

        self.entities.swap(row_1, row_2);
        self.records.swap(row_1, row_2);

        // Each record keeps its own flag bits while the rows trade places.
        index.set_row(e1, row_2);
        index.set_row(e2, row_1);

        for bitset in self.bitsets.iter_mut() {
            bitset.data.swap(row_1, row_2);
        }

        // Swap column elements through a scratch buffer sized for the
        // largest element.
        let max_size = self
            .columns
            .iter()
            .map(|c| c.size())
            .max()
            .unwrap_or(0);
        if max_size == 0 {
            return;
        }
        let mut tmp = vec![0u8; max_size];

        for column in self.columns.iter_mut() {
            let size = column.size();
            let el_1 = column.el(row_1);
            let el_2 = column.el(row_2);
            unsafe {
                ptr::copy_nonoverlapping(el_1, tmp.as_mut_ptr(), size);
                ptr::copy_nonoverlapping(el_2, el_1, size);
                ptr::copy_nonoverlapping(tmp.as_ptr(), el_2, size);
            }
        }
    }

    /// Trim every buffer's capacity down to the current length. Returns
    /// whether any storage was allocated.
    pub fn shrink(&mut self) -> bool {
        let had_payload = self.entities.capacity() > 0;

        self.entities.shrink_to_fit();
        self.records.shrink_to_fit();

        for column in self.columns.iter_mut() {
            column.reclaim();
        }

        had_payload
    }

    /// Destruct all components in `[row, row + count)` and update the
    /// entity index. All on_remove hooks finish before any dtor begins.
    ///
    /// With `update_entity_index` unset (snapshot-style callers) the index
    /// records are left untouched. `is_delete` removes records outright
    /// instead of clearing their location.
    pub fn dtor_all(
        &mut self,
        index: &mut entity::Index,
        row: usize,
        count: usize,
        update_entity_index: bool,
        is_delete: bool,
    ) {
        // Deleting without updating the index would leave dangling records.
        debug_assert!(!is_delete || update_entity_index);

        let end = row + count;
        debug_assert!(end <= self.entities.len());

        if self.flags & flags::HAS_DTORS != 0 {
            // Guard against reentrant mutation from inside hooks.
            self.lock += 1;

            // All on_remove notifications first.
            for column in self.columns.iter_mut() {
                if let Some(hook) = column.type_info().hooks.on_remove {
                    invoke_hook(hook, &self.entities[row..end], column, row, count);
                }
            }

            // Then every destructor.
            for column in self.columns.iter_mut() {
                let ti = *column.type_info();
                if let Some(dtor) = ti.hooks.dtor {
                    unsafe { dtor(column.el(row), count, &ti) };
                }
            }

            if update_entity_index {
                self.update_index_range(index, row, end, is_delete);
            }

            self.lock -= 1;
        } else if update_entity_index {
            self.update_index_range(index, row, end, is_delete);
        }
    }

    fn update_index_range(
        &mut self,
        index: &mut entity::Index,
        row: usize,
        end: usize,
        is_delete: bool,
    ) {
        for i in row..end {
            let entity = self.entities[i];
            if entity == id::NULL {
                continue;
            }
            if is_delete {
                index.remove(entity);
            } else {
                index.clear_location(entity);
            }
        }
    }

    /// Tear down all rows and release every buffer. Destructors run for
    /// all rows; the column and bitset structures survive empty so the
    /// table stays usable. Returns the row count before teardown.
    pub fn fini(
        &mut self,
        index: &mut entity::Index,
        update_entity_index: bool,
        is_delete: bool,
    ) -> usize {
        self.assert_unlocked();

        let count = self.entities.len();
        if count > 0 {
            self.dtor_all(index, 0, count, update_entity_index, is_delete);
        }

        debug_assert_eq!(self.entities.len(), self.records.len());

        for column in self.columns.iter_mut() {
            debug_assert_eq!(column.len(), count);
            column.fini();
        }
        for bitset in self.bitsets.iter_mut() {
            bitset.data.fini();
        }

        self.entities = Vec::new();
        self.records = Vec::new();

        count
    }
}

/// Invoke an iter hook over a run of elements in a column. `entities` is
/// already sliced to the affected run.
fn invoke_hook(hook: IterHook, entities: &[Entity], column: &Column, row: usize, count: usize) {
    debug_assert_eq!(entities.len(), count);
    let ctx = HookContext {
        entities,
        ptr: column.el(row),
        row,
        count,
        id: column.id(),
    };
    hook(&ctx);
}

/// Add-side hook sequence: ctor (when constructing), then on_add.
fn invoke_add_hooks(
    column: &mut Column,
    entities: &[Entity],
    row: usize,
    count: usize,
    construct: bool,
) {
    let ti = *column.type_info();

    if construct {
        if let Some(ctor) = ti.hooks.ctor {
            unsafe { ctor(column.el(row), count, &ti) };
        }
    }

    if let Some(hook) = ti.hooks.on_add {
        invoke_hook(hook, entities, column, row, count);
    }
}

/// Remove-side hook sequence: on_remove, then dtor (when destructing).
fn invoke_remove_hooks(
    column: &mut Column,
    entities: &[Entity],
    row: usize,
    count: usize,
    dtor: bool,
) {
    let ti = *column.type_info();

    if let Some(hook) = ti.hooks.on_remove {
        invoke_hook(hook, entities, column, row, count);
    }

    if dtor {
        if let Some(dtor_fn) = ti.hooks.dtor {
            unsafe { dtor_fn(column.el(row), count, &ti) };
        }
    }
}

/// Byte-for-byte move of matching columns; only valid when neither table
/// is complex.
fn fast_move(dst: &mut TableData, dst_row: usize, src: &mut TableData, src_row: usize) {
    let mut i_dst = 0;
    let mut i_src = 0;

    while i_dst < dst.columns.len() && i_src < src.columns.len() {
        let dst_id = dst.columns[i_dst].id();
        let src_id = src.columns[i_src].id();

        if dst_id == src_id {
            let size = dst.columns[i_dst].size();
            let to = dst.columns[i_dst].el(dst_row);
            let from = src.columns[i_src].el(src_row);
            unsafe { ptr::copy_nonoverlapping(from, to, size) };
        }

        if dst_id <= src_id {
            i_dst += 1;
        }
        if dst_id >= src_id {
            i_src += 1;
        }
    }
}

/// Move bitset bits for `count` rows starting at the given rows. Matching
/// columns copy bit values; with `clear`, source columns are torn down
/// once their bits have been moved (bulk-merge semantics).
fn move_bitset_columns(
    dst: &mut TableData,
    dst_row: usize,
    src: &mut TableData,
    src_row: usize,
    count: usize,
    clear: bool,
) {
    if dst.bitsets.is_empty() && src.bitsets.is_empty() {
        return;
    }

    let mut i_dst = 0;
    let mut i_src = 0;

    while i_dst < dst.bitsets.len() && i_src < src.bitsets.len() {
        let dst_id = dst.bitsets[i_dst].id;
        let src_id = src.bitsets[i_src].id;

        if dst_id == src_id {
            let (dst_bs, src_bs) = (&mut dst.bitsets[i_dst], &mut src.bitsets[i_src]);
            dst_bs.data.ensure(dst_row + count);
            for i in 0..count {
                let value = src_bs.data.get(src_row + i);
                dst_bs.data.set(dst_row + i, value);
            }
            if clear {
                debug_assert_eq!(src_bs.data.count(), count);
                src_bs.data.fini();
            }
        } else if dst_id < src_id {
            // Column only the destination has: cover the new rows with
            // cleared bits.
            dst.bitsets[i_dst].data.ensure(dst_row + count);
        } else if clear {
            src.bitsets[i_src].data.fini();
        }

        if dst_id <= src_id {
            i_dst += 1;
        }
        if dst_id >= src_id {
            i_src += 1;
        }
    }

    while i_dst < dst.bitsets.len() {
        dst.bitsets[i_dst].data.ensure(dst_row + count);
        i_dst += 1;
    }

    if clear {
        while i_src < src.bitsets.len() {
            debug_assert_eq!(src.bitsets[i_src].data.count(), count);
            src.bitsets[i_src].data.fini();
            i_src += 1;
        }
    }
}

/// Move one row's component data between tables.
///
/// Both rows must already exist; entity-index updates are the caller's
/// responsibility, and the caller is expected to swap-remove the source
/// row afterwards. When the source row is the trailing row, the move runs
/// destructors for the moved-away-from storage here (`use_move_dtor`),
/// because no later swap will clean it up.
pub fn move_row(
    dst: &mut TableData,
    dst_row: usize,
    dst_entity: Entity,
    src: &mut TableData,
    src_row: usize,
    src_entity: Entity,
    construct: bool,
) {
    if (dst.flags | src.flags) & flags::COMPLEX == 0 {
        fast_move(dst, dst_row, src, src_row);
        return;
    }

    move_bitset_columns(dst, dst_row, src, src_row, 1, false);

    // Same entity: transfer ownership between tables. Different entities
    // (cloning): copy-construct instead.
    let same_entity = dst_entity == src_entity;

    // The moved-away-from slot only needs its destructor here when it is
    // the trailing row; otherwise the later swap-remove cleans it up.
    let use_move_dtor = src.entities.len() == src_row + 1;

    let mut i_dst = 0;
    let mut i_src = 0;

    while i_dst < dst.columns.len() && i_src < src.columns.len() {
        let dst_id = dst.columns[i_dst].id();
        let src_id = src.columns[i_src].id();

        if dst_id == src_id {
            let ti = *dst.columns[i_dst].type_info();
            let to = dst.columns[i_dst].el(dst_row);
            let from = src.columns[i_src].el(src_row);

            if same_entity {
                let mut mover = ti.hooks.move_ctor;
                if use_move_dtor || mover.is_none() {
                    // Fall back to ctor_move_dtor so the source slot's
                    // destructor runs as part of the transfer.
                    mover = ti.hooks.ctor_move_dtor;
                }
                if let Some(mover) = mover {
                    unsafe { mover(to, from, 1, &ti) };
                } else {
                    unsafe { ptr::copy_nonoverlapping(from, to, ti.size()) };
                }
            } else if let Some(copy) = ti.hooks.copy_ctor {
                unsafe { copy(to, from, 1, &ti) };
            } else {
                unsafe { ptr::copy_nonoverlapping(from, to, ti.size()) };
            }
        } else if dst_id < src_id {
            invoke_add_hooks(
                &mut dst.columns[i_dst],
                slice::from_ref(&dst_entity),
                dst_row,
                1,
                construct,
            );
        } else {
            invoke_remove_hooks(
                &mut src.columns[i_src],
                slice::from_ref(&src_entity),
                src_row,
                1,
                use_move_dtor,
            );
        }

        if dst_id <= src_id {
            i_dst += 1;
        }
        if dst_id >= src_id {
            i_src += 1;
        }
    }

    while i_dst < dst.columns.len() {
        invoke_add_hooks(
            &mut dst.columns[i_dst],
            slice::from_ref(&dst_entity),
            dst_row,
            1,
            construct,
        );
        i_dst += 1;
    }

    while i_src < src.columns.len() {
        invoke_remove_hooks(
            &mut src.columns[i_src],
            slice::from_ref(&src_entity),
            src_row,
            1,
            use_move_dtor,
        );
        i_src += 1;
    }
}

/// Append the full contents of one column to another, moving elements
/// through move_dtor when present. The source column ends up empty.
fn merge_column(dst: &mut Column, src: &mut Column, column_size: usize) {
    if dst.is_empty() {
        dst.take_from(src);
        return;
    }

    let dst_count = dst.len();
    let src_count = src.len();
    let ti = *dst.type_info();

    dst.grow(src_count, column_size, true);
    let to = dst.el(dst_count);
    let from = src.el(0);

    if let Some(move_dtor) = ti.hooks.move_dtor {
        unsafe { move_dtor(to, from, src_count, &ti) };
    } else {
        unsafe { ptr::copy_nonoverlapping(from, to, ti.size() * src_count) };
    }

    unsafe { src.set_len(0) };
    src.fini();
}

/// Merge every row of `src` into `dst`: patch the entity-index records to
/// the destination table, concatenate the entity/record vectors (stealing
/// the source storage when the destination is empty), merge columns
/// element-wise and move the bitset bits. The source ends up empty.
///
/// Empty/nonempty signalling and traversable-count transfer stay with the
/// caller.
pub fn merge(
    index: &mut entity::Index,
    dst_table: TableId,
    src_table: TableId,
    dst: &mut TableData,
    src: &mut TableData,
) {
    let src_count = src.entities.len();
    let dst_count = dst.entities.len();

    // Point the old entities at their new table and rows first.
    for i in 0..src_count {
        let key = if dst_table != src_table {
            src.records[i].unwrap_or_else(|| panic!("merge source row {} has no record", i))
        } else {
            // Merging a table into itself: refresh by entity id.
            src.entities[i]
        };
        let record = index.ensure(key);
        record.table = Some(dst_table);
        record.row = entity::row_to_record(dst_count + i, record.flags());
    }

    if src_count == 0 {
        return;
    }

    // Concatenate the parallel vectors; an empty destination takes the
    // source storage so column capacities stay aligned with it.
    if dst.entities.is_empty() {
        dst.entities = std::mem::take(&mut src.entities);
        dst.records = std::mem::take(&mut src.records);
    } else {
        dst.entities.append(&mut src.entities);
        dst.records.append(&mut src.records);
        // Drop the drained source buffers so the source's columns and
        // entity vector stay capacity-synchronized at zero.
        src.entities = Vec::new();
        src.records = Vec::new();
    }
    debug_assert_eq!(dst.entities.len(), src_count + dst_count);

    let column_size = dst.entities.capacity();

    let mut i_new = 0;
    let mut i_old = 0;

    while i_new < dst.columns.len() && i_old < src.columns.len() {
        let dst_id = dst.columns[i_new].id();
        let src_id = src.columns[i_old].id();

        if dst_id == src_id {
            merge_column(&mut dst.columns[i_new], &mut src.columns[i_old], column_size);
            dst.mark_dirty(i_new + 1);
            i_new += 1;
            i_old += 1;
        } else if dst_id < src_id {
            // Column only the destination has: construct the added range.
            dst.columns[i_new].grow(src_count, column_size, true);
            i_new += 1;
        } else {
            // Column only the source has: destruct and release.
            let column = &mut src.columns[i_old];
            let ti = *column.type_info();
            if let Some(dtor) = ti.hooks.dtor {
                unsafe { dtor(column.el(0), src_count, &ti) };
            }
            unsafe { column.set_len(0) };
            column.fini();
            i_old += 1;
        }
    }

    move_bitset_columns(dst, dst_count, src, 0, src_count, true);

    while i_new < dst.columns.len() {
        dst.columns[i_new].grow(src_count, column_size, true);
        i_new += 1;
    }

    while i_old < src.columns.len() {
        let column = &mut src.columns[i_old];
        let ti = *column.type_info();
        if let Some(dtor) = ti.hooks.dtor {
            unsafe { dtor(column.el(0), src_count, &ti) };
        }
        unsafe { column.set_len(0) };
        column.fini();
        i_old += 1;
    }

    dst.mark_dirty(0);
}
