//! The store: table ownership and the public engine surface.
//!
//! The store owns the collaborators (entity index, id index, component
//! registry, event broker), the sparse table set and the type→table map.
//! Every mutating table operation goes through here so that empty↔nonempty
//! transitions are signalled exactly once, at the transition.

use std::collections::HashMap;

use log::debug;

use crate::ecs::component;
use crate::ecs::entity::{self, Entity};
use crate::ecs::event::{self, Broker, Kind, TableEvent};
use crate::ecs::id::{self, Id};
use crate::ecs::id_index::IdIndex;
use crate::ecs::storage::data;
use crate::ecs::storage::flags;
use crate::ecs::storage::{Table, TableId, Type};

/// Store-wide bookkeeping counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Info {
    pub table_count: usize,
    pub table_record_count: usize,
    pub empty_table_count: usize,
    pub table_delete_total: usize,
}

/// The world-side owner of all tables and their collaborators.
#[derive(Default)]
pub struct Store {
    /// The entity index: entity → (table, row) records.
    pub entities: entity::Index,
    /// The id index: id → id record with table cache.
    pub ids: IdIndex,
    /// Component descriptors.
    pub components: component::Registry,
    /// Table lifecycle observers.
    pub events: Broker,
    tables: Vec<Option<Table>>,
    free_ids: Vec<u32>,
    by_type: HashMap<Type, TableId>,
    pub info: Info,
}

/// Split mutable borrows of two distinct tables out of the table set.
fn two_tables_mut(
    tables: &mut [Option<Table>],
    a: TableId,
    b: TableId,
) -> (&mut Table, &mut Table) {
    assert_ne!(a, b, "operation needs two distinct tables");
    let (low, high, flip) = if a.index() < b.index() {
        (a.index(), b.index(), false)
    } else {
        (b.index(), a.index(), true)
    };
    let (head, tail) = tables.split_at_mut(high);
    let first = head[low].as_mut().expect("stale table id");
    let second = tail[0].as_mut().expect("stale table id");
    if flip {
        (second, first)
    } else {
        (first, second)
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the table for a set of ids, creating it on first use.
    pub fn table_ensure(&mut self, ids: impl Into<Vec<Id>>) -> TableId {
        self.table_ensure_from(ids, None)
    }

    /// Find or create the table for a set of ids, using `from` as an
    /// ancestor to amortise id-record lookups over the shared prefix.
    pub fn table_ensure_from(&mut self, ids: impl Into<Vec<Id>>, from: Option<TableId>) -> TableId {
        let ty = Type::new(ids);
        if let Some(&existing) = self.by_type.get(&ty) {
            return existing;
        }

        let table_id = match self.free_ids.pop() {
            Some(raw) => TableId::new(raw),
            None => {
                self.tables.push(None);
                TableId::new((self.tables.len() - 1) as u32)
            }
        };

        let table = {
            let from_table = from.and_then(|f| self.tables[f.index()].as_ref());
            Table::init(table_id, ty.clone(), from_table, &mut self.ids, &self.components)
        };

        self.info.table_count += 1;
        self.info.table_record_count += table.records().len();
        self.info.empty_table_count += 1;

        self.by_type.insert(ty, table_id);
        self.tables[table_id.index()] = Some(table);

        if self.events.has(Kind::Create) {
            self.events.emit(TableEvent {
                kind: Kind::Create,
                table: table_id,
            });
        }

        table_id
    }

    /// The table for an id.
    ///
    /// # Panics
    /// Panics on a stale table id.
    pub fn table(&self, table: TableId) -> &Table {
        self.tables[table.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("stale table id {:?}", table))
    }

    /// The table for an id, if it is live.
    pub fn try_table(&self, table: TableId) -> Option<&Table> {
        self.tables.get(table.index()).and_then(Option::as_ref)
    }

    fn table_mut(&mut self, table: TableId) -> &mut Table {
        self.tables[table.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale table id {:?}", table))
    }

    /// Free a table: tear down its rows (with destructors and entity-index
    /// removal), unregister it from every id record and drop it from the
    /// table set.
    pub fn table_free(&mut self, table_id: TableId) {
        let mut table = self.tables[table_id.index()]
            .take()
            .unwrap_or_else(|| panic!("stale table id {:?}", table_id));
        table.data.assert_unlocked();

        if self.events.has(Kind::Delete) {
            self.events.emit(TableEvent {
                kind: Kind::Delete,
                table: table_id,
            });
        }

        debug!(
            "table {:?} deleted with {} entities",
            table_id,
            table.count()
        );

        if table.is_empty() {
            self.info.empty_table_count -= 1;
        }

        table.data.fini(&mut self.entities, true, true);

        self.by_type.remove(table.ty());
        table.unregister(&mut self.ids);

        self.info.table_count -= 1;
        self.info.table_record_count -= table.records().len();
        self.info.table_delete_total += 1;

        self.free_ids.push(table_id.raw());
    }

    fn set_table_filled(&mut self, table: TableId) {
        self.info.empty_table_count -= 1;
        self.events.emit(TableEvent {
            kind: Kind::Fill,
            table,
        });
    }

    fn set_table_empty(&mut self, table: TableId) {
        self.info.empty_table_count += 1;
        self.events.emit(TableEvent {
            kind: Kind::Empty,
            table,
        });
    }

    /// Append an entity to a table. The entity's index record is created
    /// or updated to point at the new row. Returns the row.
    pub fn append(
        &mut self,
        table_id: TableId,
        entity: Entity,
        construct: bool,
        on_add: bool,
    ) -> usize {
        let table = self.tables[table_id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale table id {:?}", table_id));
        table.data.assert_unlocked();
        assert!(
            table.flags & flags::HAS_TARGET == 0,
            "append to a table with target rows"
        );

        self.entities.ensure(entity);
        let row = table.data.append(entity, Some(entity), construct, on_add);
        self.entities.set_location(entity, table_id, row);

        #[cfg(debug_assertions)]
        table.verify_invariants();

        // The first entity moves the table from inactive to active.
        if row == 0 {
            self.set_table_filled(table_id);
        }

        row
    }

    /// Append `to_add` rows at once; entity ids come from `ids` or are
    /// zeroed, and record keys stay unset until callers commit them.
    /// Returns the first new row.
    pub fn appendn(&mut self, table_id: TableId, to_add: usize, ids: Option<&[Entity]>) -> usize {
        let table = self.tables[table_id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale table id {:?}", table_id));
        table.data.assert_unlocked();

        let cur_count = table.count();
        let row = table.data.appendn(to_add, ids);

        #[cfg(debug_assertions)]
        table.verify_invariants();

        if cur_count == 0 && to_add > 0 {
            self.set_table_filled(table_id);
        }

        row
    }

    /// Delete a row, swap-removing the last row into its place. The
    /// deleted entity's index record loses its location; the moved
    /// entity's record is patched.
    pub fn delete(&mut self, table_id: TableId, row: usize, destruct: bool) {
        let table = self.tables[table_id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale table id {:?}", table_id));
        table.data.assert_unlocked();
        assert!(
            table.flags & flags::HAS_TARGET == 0,
            "delete from a table with target rows"
        );

        let entity = table.data.entities[row];
        let remaining = table.data.delete(&mut self.entities, row, destruct);
        self.entities.clear_location(entity);

        #[cfg(debug_assertions)]
        if let Some(table) = self.tables[table_id.index()].as_ref() {
            table.verify_invariants();
        }

        if remaining == 0 {
            self.set_table_empty(table_id);
        }
    }

    /// Move one row's component data between two tables. Both rows must
    /// already exist; entity-index updates and the source-row delete stay
    /// with the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn move_entity(
        &mut self,
        dst_entity: Entity,
        src_entity: Entity,
        dst_table: TableId,
        dst_row: usize,
        src_table: TableId,
        src_row: usize,
        construct: bool,
    ) {
        let (dst, src) = two_tables_mut(&mut self.tables, dst_table, src_table);
        dst.data.assert_unlocked();
        src.data.assert_unlocked();

        data::move_row(
            &mut dst.data,
            dst_row,
            dst_entity,
            &mut src.data,
            src_row,
            src_entity,
            construct,
        );

        #[cfg(debug_assertions)]
        {
            dst.verify_invariants();
            src.verify_invariants();
        }
    }

    /// Migrate an entity to a different table: append a destination row,
    /// move the component data across, delete the source row and commit
    /// the entity's new location. Returns the destination row.
    pub fn migrate(&mut self, entity: Entity, dst_table: TableId) -> usize {
        let record = self
            .entities
            .get(entity)
            .unwrap_or_else(|| panic!("migrate of entity {} without a record", entity));
        let src_table = record
            .table
            .unwrap_or_else(|| panic!("migrate of entity {} without a table", entity));
        let src_row = record.row();

        if src_table == dst_table {
            return src_row;
        }

        // Reserve the destination row uninitialized; the move constructs
        // what the source cannot provide.
        let dst_row = {
            let table = self.tables[dst_table.index()]
                .as_mut()
                .unwrap_or_else(|| panic!("stale table id {:?}", dst_table));
            table.data.assert_unlocked();
            table.data.append(entity, Some(entity), false, false)
        };
        if dst_row == 0 {
            self.set_table_filled(dst_table);
        }

        {
            let (dst, src) = two_tables_mut(&mut self.tables, dst_table, src_table);
            data::move_row(
                &mut dst.data,
                dst_row,
                entity,
                &mut src.data,
                src_row,
                entity,
                true,
            );
        }

        // The move already destructed the moved-away-from slot when it was
        // the trailing row; the delete must not destruct again.
        let remaining = {
            let table = self.tables[src_table.index()]
                .as_mut()
                .unwrap_or_else(|| panic!("stale table id {:?}", src_table));
            table.data.delete(&mut self.entities, src_row, false)
        };
        if remaining == 0 {
            self.set_table_empty(src_table);
        }

        self.entities.set_location(entity, dst_table, dst_row);

        dst_row
    }

    /// Swap two rows of a table.
    pub fn swap(&mut self, table_id: TableId, row_1: usize, row_2: usize) {
        let table = self.tables[table_id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale table id {:?}", table_id));
        table.data.assert_unlocked();
        table.data.swap(&mut self.entities, row_1, row_2);

        #[cfg(debug_assertions)]
        table.verify_invariants();
    }

    /// Merge every entity of `src` into `dst`. The source table ends up
    /// empty; both tables' empty/nonempty transitions are signalled and
    /// the traversable count moves across.
    pub fn merge(&mut self, dst_table: TableId, src_table: TableId) {
        let (src_count, dst_count) = {
            let (dst, src) = two_tables_mut(&mut self.tables, dst_table, src_table);
            dst.data.assert_unlocked();
            src.data.assert_unlocked();

            let src_count = src.count();
            let dst_count = dst.count();
            data::merge(
                &mut self.entities,
                dst_table,
                src_table,
                &mut dst.data,
                &mut src.data,
            );
            (src_count, dst_count)
        };

        if src_count > 0 {
            if dst_count == 0 {
                self.set_table_filled(dst_table);
            }
            self.set_table_empty(src_table);

            let (dst, src) = two_tables_mut(&mut self.tables, dst_table, src_table);
            let moved = src.traversable_count();
            dst.traversable_add(moved);
            src.traversable_add(-moved);
            debug_assert_eq!(src.traversable_count(), 0);

            #[cfg(debug_assertions)]
            {
                dst.verify_invariants();
                src.verify_invariants();
            }
        }
    }

    /// Trim a table's buffers to its current row count. Returns whether
    /// any storage was allocated.
    pub fn shrink(&mut self, table_id: TableId) -> bool {
        let table = self.table_mut(table_id);
        table.data.assert_unlocked();
        let had_payload = table.data.shrink();

        #[cfg(debug_assertions)]
        table.verify_invariants();

        had_payload
    }

    /// Destruct all rows of a table and clear the entities' locations,
    /// deactivating the table.
    pub fn clear_entities(&mut self, table_id: TableId) {
        self.fini_rows(table_id, false);
    }

    /// Destruct all rows of a table and delete the entities from the
    /// index, deactivating the table.
    pub fn delete_entities(&mut self, table_id: TableId) {
        self.fini_rows(table_id, true);
    }

    fn fini_rows(&mut self, table_id: TableId, is_delete: bool) {
        let count = {
            let table = self.tables[table_id.index()]
                .as_mut()
                .unwrap_or_else(|| panic!("stale table id {:?}", table_id));
            table.data.assert_unlocked();
            let count = table.data.fini(&mut self.entities, true, is_delete);
            let traversable = table.traversable_count();
            table.traversable_add(-traversable);
            count
        };

        if count > 0 {
            self.set_table_empty(table_id);
        }
    }

    /// Bump a component's dirty counter in a table, if change tracking is
    /// active there.
    pub fn mark_dirty(&mut self, table_id: TableId, component: Id) {
        let Some(slot) = self.ids.get_table(component, table_id) else {
            return;
        };
        let table = self.table_mut(table_id);
        table.data.assert_unlocked();
        if table.data.dirty_state().is_none() {
            return;
        }
        let column = table.records()[slot].column;
        if column < 0 {
            return;
        }
        table.data.mark_dirty(column as usize + 1);
    }

    /// The dirty counters of a table, allocated on first subscription.
    pub fn dirty_state(&mut self, table_id: TableId) -> &[u32] {
        self.table_mut(table_id).data.dirty_state_ensure()
    }

    /// Bump a table's reentrancy lock.
    pub fn lock(&mut self, table_id: TableId) {
        self.table_mut(table_id).data.lock();
    }

    /// Release one level of a table's reentrancy lock.
    pub fn unlock(&mut self, table_id: TableId) {
        self.table_mut(table_id).data.unlock();
    }

    /// The number of rows in a table.
    pub fn count(&self, table_id: TableId) -> usize {
        self.table(table_id).count()
    }

    /// The slot of an id in a table's type, or -1 when absent or invalid.
    pub fn type_index(&self, table_id: TableId, id: Id) -> i32 {
        if id == id::NULL {
            return -1;
        }
        match self.ids.get_table(id, table_id) {
            Some(slot) => self.table(table_id).records()[slot].index,
            None => -1,
        }
    }

    /// The column slot of an id in a table, or -1 when absent, dataless
    /// or invalid.
    pub fn column_index(&self, table_id: TableId, id: Id) -> i32 {
        if id == id::NULL {
            return -1;
        }
        match self.ids.get_table(id, table_id) {
            Some(slot) => self.table(table_id).records()[slot].column,
            None => -1,
        }
    }

    /// Determine if a table's type contains an id.
    pub fn has_id(&self, table_id: TableId, id: Id) -> bool {
        self.type_index(table_id, id) != -1
    }

    /// Pointer to an id's column data at `offset` rows in, or null when
    /// the id carries no data in this table.
    pub fn get_id_ptr(&self, table_id: TableId, id: Id, offset: usize) -> *mut u8 {
        let column = self.column_index(table_id, id);
        if column < 0 {
            return std::ptr::null_mut();
        }
        self.table(table_id).column_ptr(column as usize, offset)
    }

    /// The depth of a table in an acyclic relationship: how many `rel`
    /// hops separate it from a root. Returns -1 for invalid input or a
    /// cycle.
    pub fn get_depth(&self, table_id: TableId, rel: Id) -> i32 {
        if rel == id::NULL || rel.is_pair() || rel.is_wildcard() || rel.has_any_role() {
            return -1;
        }

        let mut visited = vec![table_id];
        let mut depth = 0;
        let mut cur = table_id;

        loop {
            let Some(slot) = self.ids.get_table(Id::pair(rel, id::WILDCARD), cur) else {
                return depth;
            };
            let table = self.table(cur);
            let record = table.records()[slot];
            let target = table.ty().ids()[record.index as usize].second();
            depth += 1;

            let Some(next) = self.entities.get(target).and_then(|r| r.table) else {
                return depth;
            };
            if visited.contains(&next) {
                return -1;
            }
            visited.push(next);
            cur = next;
        }
    }

    /// Adjust a table's traversable-entity count; used by event
    /// propagation to early-out of tables nothing traverses into.
    pub fn traversable_add(&mut self, table_id: TableId, value: i32) {
        self.table_mut(table_id).traversable_add(value);
    }

    /// Register a table-event observer.
    pub fn observe<F: Fn(&event::TableEvent) + 'static>(&mut self, kind: Kind, observer: F) {
        self.events.observe(kind, observer);
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Destruct remaining rows; the entity index goes away with the
        // store, so records stay untouched.
        for slot in 0..self.tables.len() {
            if let Some(table) = self.tables[slot].as_mut() {
                table.data.fini(&mut self.entities, false, false);
            }
        }
    }
}

impl Store {
    /// All tables discoverable through an id. A plain id also resolves
    /// through its wildcard aggregates, so a relationship or target used
    /// in pairs finds the pair tables.
    pub fn tables_with(&self, id: Id) -> Vec<TableId> {
        let mut candidates = vec![id];
        if id.is_plain() && id != id::NULL {
            candidates.push(Id::pair(id, id::WILDCARD));
            candidates.push(Id::pair(id::WILDCARD, id));
        }

        let mut result: Vec<TableId> = Vec::new();
        for candidate in candidates {
            if let Some(record) = self.ids.get(candidate) {
                for (table, _) in record.tables() {
                    if !result.contains(&table) {
                        result.push(table);
                    }
                }
            }
        }
        result.sort_by_key(|t| t.index());
        result
    }
}

#[cfg(test)]
mod tests {
    use std::alloc::Layout;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::ecs::component::{HookContext, Hooks, TypeInfo};

    use super::*;

    const POS: Id = Id(1000);
    const VEL: Id = Id(1001);
    const TAG: Id = Id(1002);

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    fn store() -> Store {
        let store = Store::new();
        store.components.register(TypeInfo::trivial::<Position>(POS));
        store.components.register(TypeInfo::trivial::<Velocity>(VEL));
        store
    }

    fn e(n: u64) -> Entity {
        Entity::new(10_000 + n)
    }

    fn write_pos(store: &Store, table: TableId, row: usize, value: Position) {
        let ptr = store.get_id_ptr(table, POS, row);
        assert!(!ptr.is_null());
        unsafe { (ptr as *mut Position).write(value) };
    }

    fn read_pos(store: &Store, table: TableId, row: usize) -> Position {
        let ptr = store.get_id_ptr(table, POS, row);
        assert!(!ptr.is_null());
        unsafe { (ptr as *const Position).read() }
    }

    #[test]
    fn empty_to_nonempty_signalled_exactly_once() {
        // Given - S1: a table with change tracking and a fill observer
        let mut store = store();
        let table = store.table_ensure(vec![POS]);

        let fills = Rc::new(Cell::new(0));
        let seen = fills.clone();
        store.observe(Kind::Fill, move |_| seen.set(seen.get() + 1));

        assert_eq!(store.dirty_state(table), &[1, 1]);

        // When
        store.append(table, e(1), true, false);

        // Then - one fill, one dirty increment on the entity vector
        assert_eq!(fills.get(), 1);
        assert_eq!(store.dirty_state(table), &[2, 1]);

        // When - a second append is not a transition
        store.append(table, e(2), true, false);

        // Then
        assert_eq!(fills.get(), 1);
    }

    #[test]
    fn delete_mid_row_runs_one_dtor_and_patches_moved_record() {
        // Given - S2: a component whose move_dtor releases the
        // overwritten value and whose dtor covers the in-place paths
        static DTORED: Mutex<Vec<u64>> = Mutex::new(Vec::new());

        unsafe fn tracked_dtor(ptr: *mut u8, count: usize, _ti: &TypeInfo) {
            for i in 0..count {
                let value = unsafe { (ptr as *const u64).add(i).read() };
                DTORED.lock().unwrap().push(value);
            }
        }

        unsafe fn tracked_move_dtor(dst: *mut u8, src: *mut u8, count: usize, _ti: &TypeInfo) {
            // Release the destination value, then move the source in.
            unsafe { tracked_dtor(dst, count, _ti) };
            unsafe { std::ptr::copy_nonoverlapping(src, dst, count * 8) };
        }

        const TRACKED: Id = Id(1100);
        let mut store = store();
        store.components.register(TypeInfo::new(
            TRACKED,
            Layout::new::<u64>(),
            Hooks {
                dtor: Some(tracked_dtor),
                move_dtor: Some(tracked_move_dtor),
                ..Hooks::default()
            },
        ));

        let table = store.table_ensure(vec![TRACKED]);
        for (i, value) in [10u64, 20, 30].iter().enumerate() {
            store.append(table, e(i as u64 + 1), true, false);
            let ptr = store.get_id_ptr(table, TRACKED, i);
            unsafe { (ptr as *mut u64).write(*value) };
        }

        // When
        store.delete(table, 1, true);

        // Then - exactly one dtor, for the deleted value
        assert_eq!(*DTORED.lock().unwrap(), vec![20]);

        // The last entity moved into row 1 and its record follows
        assert_eq!(store.table(table).entities(), &[e(1), e(3)]);
        let record = store.entities.get(e(3)).unwrap();
        assert_eq!(record.table, Some(table));
        assert_eq!(record.row(), 1);

        // The deleted entity lost its location
        assert_eq!(store.entities.get(e(2)).unwrap().table, None);

        let ptr = store.get_id_ptr(table, TRACKED, 1);
        assert_eq!(unsafe { (ptr as *const u64).read() }, 30);
    }

    #[test]
    fn move_constructs_added_column_and_fires_on_add_once() {
        // Given - S3: source [M], destination [M, GADGET]
        static ON_ADDS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn gadget_ctor(ptr: *mut u8, count: usize, _ti: &TypeInfo) {
            for i in 0..count {
                unsafe { (ptr as *mut u64).add(i).write(42) };
            }
        }

        fn gadget_on_add(ctx: &HookContext) {
            assert_eq!(ctx.count, 1);
            ON_ADDS.fetch_add(1, Ordering::SeqCst);
        }

        const M: Id = Id(1200);
        const GADGET: Id = Id(1201);
        let mut store = store();
        store
            .components
            .register(TypeInfo::new(M, Layout::new::<u64>(), Hooks::of::<u64>()));
        store.components.register(TypeInfo::new(
            GADGET,
            Layout::new::<u64>(),
            Hooks {
                ctor: Some(gadget_ctor),
                on_add: Some(gadget_on_add),
                ..Hooks::default()
            },
        ));

        let src = store.table_ensure(vec![M]);
        let dst = store.table_ensure_from(vec![M, GADGET], Some(src));

        store.append(src, e(1), true, false);
        let ptr = store.get_id_ptr(src, M, 0);
        unsafe { (ptr as *mut u64).write(77) };

        // When
        let row = store.migrate(e(1), dst);

        // Then - M's bytes survived the move, GADGET was constructed,
        // and exactly one on_add fired
        assert_eq!(row, 0);
        let m = store.get_id_ptr(dst, M, 0);
        assert_eq!(unsafe { (m as *const u64).read() }, 77);
        let g = store.get_id_ptr(dst, GADGET, 0);
        assert_eq!(unsafe { (g as *const u64).read() }, 42);
        assert_eq!(ON_ADDS.load(Ordering::SeqCst), 1);

        // Source is empty, index points at the destination
        assert_eq!(store.count(src), 0);
        let record = store.entities.get(e(1)).unwrap();
        assert_eq!(record.table, Some(dst));
        assert_eq!(record.row(), 0);
    }

    #[test]
    fn merge_appends_all_source_rows_in_order() {
        // Given - S4: src [P] with 3 entities, dst [P] with 2. The types
        // must differ for two tables to exist, so dst carries a tag.
        let mut store = store();
        let src = store.table_ensure(vec![POS]);
        let dst = store.table_ensure(vec![POS, TAG]);

        let empties = Rc::new(Cell::new(0));
        let seen = empties.clone();
        store.observe(Kind::Empty, move |_| seen.set(seen.get() + 1));

        for i in 0..2 {
            store.append(dst, e(i), true, false);
            write_pos(&store, dst, i as usize, Position { x: i as f32, y: 0.0 });
        }
        for i in 0..3 {
            store.append(src, e(10 + i), true, false);
            write_pos(&store, src, i as usize, Position { x: 0.0, y: i as f32 });
        }

        // When
        store.merge(dst, src);

        // Then - multiset union, source order appended
        assert_eq!(
            store.table(dst).entities(),
            &[e(0), e(1), e(10), e(11), e(12)]
        );
        assert_eq!(store.count(src), 0);
        assert_eq!(empties.get(), 1);

        for (i, entity) in [e(10), e(11), e(12)].iter().enumerate() {
            let record = store.entities.get(*entity).unwrap();
            assert_eq!(record.table, Some(dst));
            assert_eq!(record.row(), 2 + i);
        }

        // Component data moved with the rows
        assert_eq!(read_pos(&store, dst, 3), Position { x: 0.0, y: 1.0 });
    }

    #[test]
    fn pair_table_registers_with_all_wildcard_records() {
        // Given - S5
        const EATS: Id = Id(1300);
        const APPLES: Id = Id(1301);
        let mut store = store();

        // When
        let table = store.table_ensure(vec![Id::pair(EATS, APPLES)]);

        // Then - discoverable through the pair and every wildcard form
        for probe in [
            Id::pair(EATS, APPLES),
            Id::pair(EATS, id::WILDCARD),
            Id::pair(id::WILDCARD, APPLES),
            Id::pair(id::WILDCARD, id::WILDCARD),
            id::ANY,
        ] {
            assert!(
                store.ids.get_table(probe, table).is_some(),
                "not discoverable via {}",
                probe
            );
        }

        // Plain relationship and target resolve through their aggregates
        assert_eq!(store.tables_with(EATS), vec![table]);
        assert_eq!(store.tables_with(APPLES), vec![table]);

        // Every record of the table is in its id record's cache, at the
        // slot the cache claims
        for (slot, record) in store.table(table).records().iter().enumerate() {
            assert_eq!(store.ids.get_table(record.cache, table), Some(slot));
        }
    }

    #[test]
    #[should_panic(expected = "mutation of a locked table")]
    fn append_to_locked_table_panics() {
        // Given - S6
        let mut store = store();
        let table = store.table_ensure(vec![POS]);
        store.lock(table);

        // When - aborts
        store.append(table, e(1), true, false);
    }

    #[test]
    fn append_succeeds_after_unlock() {
        // Given - S6, the recovery half
        let mut store = store();
        let table = store.table_ensure(vec![POS]);
        store.lock(table);
        store.unlock(table);

        // When
        let row = store.append(table, e(1), true, false);

        // Then
        assert_eq!(row, 0);
        assert_eq!(store.count(table), 1);
    }

    #[test]
    fn append_then_delete_returns_to_prior_len() {
        // Given
        let mut store = store();
        let table = store.table_ensure(vec![POS, VEL]);
        store.append(table, e(1), true, false);
        store.append(table, e(2), true, false);

        // When
        store.delete(table, 1, true);

        // Then - lengths return exactly; capacity is allowed to linger
        let table_ref = store.table(table);
        assert_eq!(table_ref.count(), 1);
        for i in 0..table_ref.column_count() {
            assert_eq!(table_ref.column(i).unwrap().len(), 1);
        }
    }

    #[test]
    fn roundtrip_move_preserves_data_with_move_hooks_only() {
        // Given - a component with move hooks but no ctor/copy
        const M: Id = Id(1400);
        let mut store = store();
        store.components.register(TypeInfo::new(
            M,
            Layout::new::<u64>(),
            Hooks {
                move_: Hooks::of::<u64>().move_,
                move_ctor: Hooks::of::<u64>().move_ctor,
                move_dtor: Hooks::of::<u64>().move_dtor,
                ctor_move_dtor: Hooks::of::<u64>().ctor_move_dtor,
                ..Hooks::default()
            },
        ));

        let a = store.table_ensure(vec![M]);
        let b = store.table_ensure(vec![M, TAG]);

        store.append(a, e(1), true, false);
        let ptr = store.get_id_ptr(a, M, 0);
        unsafe { (ptr as *mut u64).write(0xC0FFEE) };

        // When - there and back again
        store.migrate(e(1), b);
        store.migrate(e(1), a);

        // Then
        let ptr = store.get_id_ptr(a, M, 0);
        assert_eq!(unsafe { (ptr as *const u64).read() }, 0xC0FFEE);
    }

    #[test]
    fn swap_is_an_involution() {
        // Given - a table with data and a toggle bitset
        let toggled = Id(TAG.raw() | id::TOGGLE);
        let mut store = store();
        let table = store.table_ensure(vec![POS, toggled]);

        for i in 0..3 {
            store.append(table, e(i), true, false);
            write_pos(&store, table, i as usize, Position { x: i as f32, y: 0.0 });
        }
        store.tables[table.index()]
            .as_mut()
            .unwrap()
            .data
            .bitsets[0]
            .data
            .set(0, true);

        // When
        store.swap(table, 0, 2);
        store.swap(table, 0, 2);

        // Then - entities, rows, data and bits all back in place
        assert_eq!(store.table(table).entities(), &[e(0), e(1), e(2)]);
        for i in 0..3 {
            assert_eq!(store.entities.get(e(i)).unwrap().row(), i as usize);
            assert_eq!(
                read_pos(&store, table, i as usize),
                Position { x: i as f32, y: 0.0 }
            );
        }
        let bits = &store.table(table).data.bitsets[0].data;
        assert!(bits.get(0));
        assert!(!bits.get(1));
        assert!(!bits.get(2));
    }

    #[test]
    fn hook_order_add_and_remove() {
        // Given - every lifecycle hook logs its call
        static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

        unsafe fn log_ctor(_ptr: *mut u8, _count: usize, _ti: &TypeInfo) {
            LOG.lock().unwrap().push("ctor");
        }
        unsafe fn log_dtor(_ptr: *mut u8, _count: usize, _ti: &TypeInfo) {
            LOG.lock().unwrap().push("dtor");
        }
        fn log_on_add(_ctx: &HookContext) {
            LOG.lock().unwrap().push("on_add");
        }
        fn log_on_remove(_ctx: &HookContext) {
            LOG.lock().unwrap().push("on_remove");
        }

        const H: Id = Id(1500);
        let mut store = store();
        store.components.register(TypeInfo::new(
            H,
            Layout::new::<u64>(),
            Hooks {
                ctor: Some(log_ctor),
                dtor: Some(log_dtor),
                on_add: Some(log_on_add),
                on_remove: Some(log_on_remove),
                ..Hooks::default()
            },
        ));
        let table = store.table_ensure(vec![H]);

        // When - add path
        store.append(table, e(1), true, true);

        // Then - ctor strictly before on_add
        assert_eq!(*LOG.lock().unwrap(), vec!["ctor", "on_add"]);

        // When - remove path
        LOG.lock().unwrap().clear();
        store.delete(table, 0, true);

        // Then - on_remove strictly before dtor
        assert_eq!(*LOG.lock().unwrap(), vec!["on_remove", "dtor"]);
    }

    #[test]
    fn dtor_all_finishes_on_removes_before_any_dtor() {
        // Given - two hooked components in one table
        static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

        unsafe fn dtor_a(_ptr: *mut u8, _count: usize, _ti: &TypeInfo) {
            LOG.lock().unwrap().push("dtor_a");
        }
        unsafe fn dtor_b(_ptr: *mut u8, _count: usize, _ti: &TypeInfo) {
            LOG.lock().unwrap().push("dtor_b");
        }
        fn on_remove_a(_ctx: &HookContext) {
            LOG.lock().unwrap().push("on_remove_a");
        }
        fn on_remove_b(_ctx: &HookContext) {
            LOG.lock().unwrap().push("on_remove_b");
        }

        const A: Id = Id(1600);
        const B: Id = Id(1601);
        let mut store = store();
        store.components.register(TypeInfo::new(
            A,
            Layout::new::<u64>(),
            Hooks {
                dtor: Some(dtor_a),
                on_remove: Some(on_remove_a),
                ..Hooks::default()
            },
        ));
        store.components.register(TypeInfo::new(
            B,
            Layout::new::<u64>(),
            Hooks {
                dtor: Some(dtor_b),
                on_remove: Some(on_remove_b),
                ..Hooks::default()
            },
        ));

        let table = store.table_ensure(vec![A, B]);
        store.append(table, e(1), true, false);
        store.append(table, e(2), true, false);

        // When
        store.clear_entities(table);

        // Then - all on_removes complete before the first dtor
        assert_eq!(
            *LOG.lock().unwrap(),
            vec!["on_remove_a", "on_remove_b", "dtor_a", "dtor_b"]
        );

        // Records were cleared, not deleted
        let record = store.entities.get(e(1)).unwrap();
        assert_eq!(record.table, None);
    }

    #[test]
    fn delete_entities_removes_index_records() {
        // Given
        let mut store = store();
        let table = store.table_ensure(vec![POS]);
        store.append(table, e(1), true, false);
        store.append(table, e(2), true, false);

        // When
        store.delete_entities(table);

        // Then
        assert_eq!(store.count(table), 0);
        assert!(store.entities.get(e(1)).is_none());
        assert!(store.entities.get(e(2)).is_none());
    }

    #[test]
    fn merge_with_disjoint_columns_constructs_and_destructs() {
        // Given - src has a column dst lacks and vice versa
        static CTORS: AtomicUsize = AtomicUsize::new(0);
        static DTORS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn count_ctor(_ptr: *mut u8, count: usize, _ti: &TypeInfo) {
            CTORS.fetch_add(count, Ordering::SeqCst);
        }
        unsafe fn count_dtor(_ptr: *mut u8, count: usize, _ti: &TypeInfo) {
            DTORS.fetch_add(count, Ordering::SeqCst);
        }

        const DST_ONLY: Id = Id(1700);
        const SRC_ONLY: Id = Id(1701);
        let mut store = store();
        store.components.register(TypeInfo::new(
            DST_ONLY,
            Layout::new::<u64>(),
            Hooks {
                ctor: Some(count_ctor),
                ..Hooks::default()
            },
        ));
        store.components.register(TypeInfo::new(
            SRC_ONLY,
            Layout::new::<u64>(),
            Hooks {
                dtor: Some(count_dtor),
                ..Hooks::default()
            },
        ));

        let src = store.table_ensure(vec![POS, SRC_ONLY]);
        let dst = store.table_ensure(vec![POS, DST_ONLY]);
        for i in 0..3 {
            store.append(src, e(i), true, false);
        }
        CTORS.store(0, Ordering::SeqCst);
        DTORS.store(0, Ordering::SeqCst);

        // When
        store.merge(dst, src);

        // Then - the added range was constructed, the dropped column
        // destructed, row count transferred
        assert_eq!(store.count(dst), 3);
        assert_eq!(store.count(src), 0);
        assert_eq!(CTORS.load(Ordering::SeqCst), 3);
        assert_eq!(DTORS.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn appendn_fills_rows_without_on_add() {
        // Given
        static ON_ADDS: AtomicUsize = AtomicUsize::new(0);

        fn counting_on_add(_ctx: &HookContext) {
            ON_ADDS.fetch_add(1, Ordering::SeqCst);
        }

        const N: Id = Id(1800);
        let mut store = store();
        store.components.register(TypeInfo::new(
            N,
            Layout::new::<u64>(),
            Hooks {
                ctor: Hooks::of::<u64>().ctor,
                on_add: Some(counting_on_add),
                ..Hooks::default()
            },
        ));
        let table = store.table_ensure(vec![N]);

        let fills = Rc::new(Cell::new(0));
        let seen = fills.clone();
        store.observe(Kind::Fill, move |_| seen.set(seen.get() + 1));

        // When
        let ids = [e(1), e(2), e(3), e(4)];
        let first = store.appendn(table, 4, Some(&ids));

        // Then - entities placed, slots constructed, no on_add, one fill
        assert_eq!(first, 0);
        assert_eq!(store.table(table).entities(), &ids);
        assert_eq!(ON_ADDS.load(Ordering::SeqCst), 0);
        assert_eq!(fills.get(), 1);
        for row in 0..4 {
            let ptr = store.get_id_ptr(table, N, row);
            assert_eq!(unsafe { (ptr as *const u64).read() }, 0);
        }

        // Record keys stay unset until rows are committed
        assert!(store.table(table).data.records.iter().all(Option::is_none));
    }

    #[test]
    fn shrink_reclaims_capacity() {
        // Given
        let mut store = store();
        let table = store.table_ensure(vec![POS]);
        for i in 0..8 {
            store.append(table, e(i), true, false);
        }
        store.delete(table, 7, true);
        store.delete(table, 6, true);

        // When
        let had_payload = store.shrink(table);

        // Then
        assert!(had_payload);
        let table_ref = store.table(table);
        assert_eq!(table_ref.count(), 6);
        assert_eq!(table_ref.column(0).unwrap().capacity(), 6);
    }

    #[test]
    fn mark_dirty_bumps_the_component_column() {
        // Given
        let mut store = store();
        let table = store.table_ensure(vec![POS, VEL]);
        store.append(table, e(1), true, false);

        // Dirty tracking off: marking is a no-op
        store.mark_dirty(table, POS);
        assert!(store.table(table).data.dirty_state().is_none());

        let baseline = store.dirty_state(table).to_vec();

        // When
        store.mark_dirty(table, POS);
        store.mark_dirty(table, TAG); // unknown id: ignored

        // Then - exactly one slot moved
        let after = store.dirty_state(table).to_vec();
        let pos_column = store.column_index(table, POS) as usize;
        for (i, (before, now)) in baseline.iter().zip(after.iter()).enumerate() {
            if i == pos_column + 1 {
                assert_eq!(*now, before + 1);
            } else {
                assert_eq!(now, before);
            }
        }
    }

    #[test]
    fn free_unregisters_from_id_caches() {
        // Given
        const EATS: Id = Id(1900);
        const APPLES: Id = Id(1901);
        let mut store = store();
        let pair = Id::pair(EATS, APPLES);
        let table = store.table_ensure(vec![POS, pair]);
        assert!(store.ids.get_table(pair, table).is_some());
        let tables_before = store.info.table_count;

        // When
        store.table_free(table);

        // Then - every cache entry is gone and the type can be rebuilt
        assert!(store.ids.get_table(pair, table).is_none());
        assert!(store.ids.get_table(POS, table).is_none());
        assert_eq!(store.info.table_count, tables_before - 1);
        assert_eq!(store.info.table_delete_total, 1);

        let again = store.table_ensure(vec![POS, pair]);
        assert_eq!(store.count(again), 0);
    }

    #[test]
    fn get_depth_walks_childof_chains() {
        // Given - parent <- child <- grandchild
        let mut store = store();
        let root = store.table_ensure(vec![POS]);
        let parent = e(1);
        store.append(root, parent, true, false);

        let child_table = store.table_ensure(vec![Id::pair(id::CHILD_OF, parent)]);
        let child = e(2);
        store.append(child_table, child, true, false);

        let grandchild_table = store.table_ensure(vec![Id::pair(id::CHILD_OF, child)]);
        store.append(grandchild_table, e(3), true, false);

        // Then
        assert_eq!(store.get_depth(root, id::CHILD_OF), 0);
        assert_eq!(store.get_depth(child_table, id::CHILD_OF), 1);
        assert_eq!(store.get_depth(grandchild_table, id::CHILD_OF), 2);

        // Invalid relations return the sentinel
        assert_eq!(store.get_depth(root, id::NULL), -1);
        assert_eq!(store.get_depth(root, Id::pair(id::CHILD_OF, parent)), -1);
    }

    #[test]
    fn get_depth_detects_cycles() {
        // Given - two entities childof each other
        const REL: Id = id::CHILD_OF;
        let mut store = store();
        let a = e(1);
        let b = e(2);

        let table_a = store.table_ensure(vec![Id::pair(REL, b)]);
        store.append(table_a, a, true, false);
        let table_b = store.table_ensure(vec![Id::pair(REL, a)]);
        store.append(table_b, b, true, false);

        // Then
        assert_eq!(store.get_depth(table_a, REL), -1);
    }

    #[test]
    fn empty_and_fill_track_the_transition_exactly() {
        // Given
        let mut store = store();
        let table = store.table_ensure(vec![POS]);

        let fills = Rc::new(Cell::new(0));
        let empties = Rc::new(Cell::new(0));
        let seen = fills.clone();
        store.observe(Kind::Fill, move |_| seen.set(seen.get() + 1));
        let seen = empties.clone();
        store.observe(Kind::Empty, move |_| seen.set(seen.get() + 1));

        // When - fill, drain, fill again
        store.append(table, e(1), true, false);
        store.append(table, e(2), true, false);
        store.delete(table, 1, true);
        store.delete(table, 0, true);
        store.append(table, e(3), true, false);

        // Then
        assert_eq!(fills.get(), 2);
        assert_eq!(empties.get(), 1);
    }

    #[test]
    fn ensure_from_ancestor_builds_the_same_table() {
        // Given
        let mut store = store();
        let base = store.table_ensure(vec![POS]);

        // When - derived through the ancestor fast path
        let derived = store.table_ensure_from(vec![POS, VEL], Some(base));

        // Then - same registrations as a cold build
        assert_eq!(store.type_index(derived, POS), 0);
        assert_eq!(store.type_index(derived, VEL), 1);
        assert_eq!(store.column_index(derived, POS), 0);
        assert_eq!(store.column_index(derived, VEL), 1);

        // Ensuring the same type again returns the same table
        assert_eq!(store.table_ensure(vec![VEL, POS]), derived);
    }

    #[test]
    fn toggle_bits_follow_swap_remove() {
        // Given - rows 0..3 with the bit set on row 2
        let toggled = Id(TAG.raw() | id::TOGGLE);
        let mut store = store();
        let table = store.table_ensure(vec![POS, toggled]);
        for i in 0..3 {
            store.append(table, e(i), true, false);
        }
        store.tables[table.index()]
            .as_mut()
            .unwrap()
            .data
            .bitsets[0]
            .data
            .set(2, true);

        // When - delete row 0; row 2 swaps in
        store.delete(table, 0, true);

        // Then
        let bits = &store.table(table).data.bitsets[0].data;
        assert_eq!(bits.count(), 2);
        assert!(bits.get(0));
        assert!(!bits.get(1));
    }

    #[test]
    fn randomized_swaps_keep_index_consistent() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        // Given
        let mut store = store();
        let table = store.table_ensure(vec![POS]);
        let count = 16;
        for i in 0..count {
            store.append(table, e(i), true, false);
            write_pos(&store, table, i as usize, Position { x: i as f32, y: 0.0 });
        }

        // When - a pile of random swaps
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let a = rng.gen_range(0..count) as usize;
            let b = rng.gen_range(0..count) as usize;
            store.swap(table, a, b);
        }

        // Then - every record row agrees with the table, and the data
        // travelled with its entity
        for i in 0..count {
            let record = store.entities.get(e(i)).unwrap();
            let row = record.row();
            assert_eq!(store.table(table).entities()[row], e(i));
            assert_eq!(read_pos(&store, table, row).x, i as f32);
        }
    }

    #[test]
    fn store_counters_track_lifecycle() {
        // Given
        let mut store = store();
        assert_eq!(store.info.table_count, 0);

        // When
        let table = store.table_ensure(vec![POS]);

        // Then
        assert_eq!(store.info.table_count, 1);
        assert_eq!(store.info.empty_table_count, 1);

        store.append(table, e(1), true, false);
        assert_eq!(store.info.empty_table_count, 0);

        store.delete(table, 0, true);
        assert_eq!(store.info.empty_table_count, 1);

        store.table_free(table);
        assert_eq!(store.info.table_count, 0);
        assert_eq!(store.info.empty_table_count, 0);
    }

    #[test]
    fn tag_only_tables_have_no_columns() {
        // Given
        let mut store = store();

        // When
        let table = store.table_ensure(vec![TAG]);
        store.append(table, e(1), true, false);

        // Then
        let table_ref = store.table(table);
        assert_eq!(table_ref.column_count(), 0);
        assert_eq!(table_ref.type_to_column_index(0), -1);
        assert_eq!(store.column_index(table, TAG), -1);
        assert_eq!(store.type_index(table, TAG), 0);
        assert!(store.get_id_ptr(table, TAG, 0).is_null());
    }

    #[test]
    fn accessor_sentinels_on_invalid_input() {
        // Given
        let mut store = store();
        let table = store.table_ensure(vec![POS]);

        // Then
        assert_eq!(store.type_index(table, id::NULL), -1);
        assert_eq!(store.column_index(table, VEL), -1);
        assert_eq!(store.table(table).column_to_type_index(5), -1);
        assert_eq!(store.table(table).column_size(5), 0);
        assert!(store.table(table).column_ptr(0, 0).is_null());
        assert!(!store.has_id(table, VEL));
    }
}
