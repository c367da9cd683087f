//! Tables: the unique storage for all entities sharing a type.
//!
//! A table's schema is immutable once created: the sorted [`Type`] vector,
//! the flags summary, the column map and the record array that registers
//! the table with every id record it matches. Entities move between
//! tables; tables never change shape.
//!
//! Besides registering with the id record of every id in its type, a
//! table registers with wildcard id records. A table containing
//! `(Eats, Apples)` is discoverable through `(Eats, *)`, `(*, Apples)`
//! and `(*, *)`, which is what lets wildcard queries find it without
//! scanning.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use log::debug;

use crate::ecs::component::Registry;
use crate::ecs::entity::Entity;
use crate::ecs::id::{self, Id};
use crate::ecs::id_index::{IdIndex, NameIndex};
use crate::ecs::storage::bitset::BitsetColumn;
use crate::ecs::storage::column::Column;
use crate::ecs::storage::data::TableData;
use crate::ecs::storage::flags::{self, TableFlags};
use crate::ecs::storage::record::TableRecord;

/// The identifier of a table in the store's table set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(u32);

impl TableId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        TableId(id)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A table's type: its sorted, deduplicated id vector with a cached
/// content hash. Two tables are the same table iff their types are equal;
/// the store keeps at most one live table per type.
#[derive(Debug, Clone)]
pub struct Type {
    ids: Box<[Id]>,
    hash: u64,
}

impl Type {
    /// Construct a type from ids; they are sorted and deduplicated.
    pub fn new(ids: impl Into<Vec<Id>>) -> Self {
        let mut ids = ids.into();
        ids.sort();
        ids.dedup();

        let mut hasher = DefaultHasher::new();
        ids.hash(&mut hasher);
        let hash = hasher.finish();

        Self {
            ids: ids.into_boxed_slice(),
            hash,
        }
    }

    /// The ids, sorted ascending.
    #[inline]
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    /// The number of ids.
    #[inline]
    pub fn count(&self) -> usize {
        self.ids.len()
    }

    /// The cached content hash.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The slot of an id in the type, if present.
    #[inline]
    pub fn search(&self, id: Id) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// A table: immutable schema plus mutable [`TableData`].
pub struct Table {
    id: TableId,
    ty: Type,
    pub flags: TableFlags,
    /// Maps type slot → column slot (first `type.count` entries, -1 for
    /// dataless ids) and column slot → type slot (the remaining
    /// `column_count` entries). Empty when the table has no columns.
    column_map: Box<[i32]>,
    /// The flattened per-id and per-wildcard records; each one is cached
    /// in its id record.
    records: Box<[TableRecord]>,
    pub data: TableData,
    bs_offset: usize,
    ft_offset: usize,
    traversable_count: i32,
    name_index: Option<NameIndex>,
}

/// Compute the flags summary, the first-toggle offset and the
/// first-target offset for a type.
fn init_flags(ids: &[Id]) -> (TableFlags, usize, usize) {
    let mut table_flags: TableFlags = 0;
    let mut bs_offset = 0;
    let mut ft_offset = 0;

    for (i, &cur) in ids.iter().enumerate() {
        if cur.is_builtin() {
            table_flags |= flags::HAS_BUILTINS;
        }

        if cur == id::MODULE {
            table_flags |= flags::HAS_BUILTINS | flags::HAS_MODULE;
        } else if cur == id::PREFAB {
            table_flags |= flags::IS_PREFAB;
        } else if cur == id::DISABLED {
            table_flags |= flags::IS_DISABLED;
        } else if cur.is_pair() {
            table_flags |= flags::HAS_PAIRS;

            let rel = cur.first();
            if rel == id::IS_A {
                table_flags |= flags::HAS_IS_A;
            } else if rel == id::CHILD_OF {
                table_flags |= flags::HAS_CHILD_OF;
            } else if cur == Id::pair(id::IDENTIFIER, id::NAME) {
                table_flags |= flags::HAS_NAME;
            } else if rel == id::TARGET {
                if table_flags & flags::HAS_TARGET == 0 {
                    ft_offset = i;
                }
                table_flags |= flags::HAS_TARGET;
            } else if rel == id::POLY {
                table_flags |= flags::HAS_BUILTINS;
            }
        } else {
            if cur.has_role(id::TOGGLE) {
                if table_flags & flags::HAS_TOGGLE == 0 {
                    bs_offset = i;
                }
                table_flags |= flags::HAS_TOGGLE;
            }
            if cur.has_role(id::OVERRIDE) {
                table_flags |= flags::HAS_OVERRIDES;
            }
        }
    }

    (table_flags, bs_offset, ft_offset)
}

/// Append a record for `extra` (a flag or target-wildcard id), or bump the
/// run length if this table already has one. New records are cached
/// immediately with their scratch position; the registration pass patches
/// the final slot in.
fn append_to_records(
    ids_index: &mut IdIndex,
    registry: &Registry,
    table: TableId,
    records: &mut Vec<TableRecord>,
    extra: Id,
    column: usize,
) {
    ids_index.ensure(extra, registry);
    match ids_index.get_table(extra, table) {
        Some(slot) => records[slot].count += 1,
        None => {
            records.push(TableRecord::new(extra, column as i32, 1));
            ids_index.cache_insert(extra, table, records.len() - 1);
        }
    }
}

impl Table {
    /// Build a table for a type, registering it with every id record it
    /// matches. `from` is an ancestor table used to amortise id-record
    /// lookups over the shared prefix of the two types.
    pub fn init(
        table_id: TableId,
        ty: Type,
        from: Option<&Table>,
        ids_index: &mut IdIndex,
        registry: &Registry,
    ) -> Table {
        let ids = ty.ids();
        let dst_count = ids.len();

        let (mut table_flags, bs_offset, ft_offset) = init_flags(ids);

        // Scan for the boundaries of regular ids, pairs and role ids.
        let mut last_id: i32 = -1;
        let mut first_pair: i32 = -1;
        let mut first_role: i32 = -1;
        for (i, &cur) in ids.iter().enumerate() {
            if first_pair == -1 && cur.is_pair() {
                first_pair = i as i32;
            }
            if cur.is_plain() {
                last_id = i as i32;
            } else if first_role == -1 && !cur.is_pair() {
                first_role = i as i32;
            }
        }

        let mut records: Vec<TableRecord> = Vec::with_capacity(dst_count);

        // One record per id in the type. When an ancestor is given, ids it
        // shares with this type already have live id records and skip the
        // ensure.
        let src_ids: &[Id] = from.map(|t| t.ty.ids()).unwrap_or(&[]);
        let mut dst_i = 0;
        let mut src_i = 0;
        while dst_i < dst_count && src_i < src_ids.len() {
            let dst_id = ids[dst_i];
            let src_id = src_ids[src_i];

            if dst_id <= src_id {
                if dst_id < src_id {
                    ids_index.ensure(dst_id, registry);
                }
                records.push(TableRecord::new(dst_id, dst_i as i32, 1));
            }

            if dst_id <= src_id {
                dst_i += 1;
            }
            if dst_id >= src_id {
                src_i += 1;
            }
        }
        while dst_i < dst_count {
            let dst_id = ids[dst_i];
            ids_index.ensure(dst_id, registry);
            records.push(TableRecord::new(dst_id, dst_i as i32, 1));
            dst_i += 1;
        }

        // Upper bound for the full record array: the regular prefix, three
        // records per flag/pair id, the three wildcard records and the
        // (ChildOf, 0) record. Exceeding it at the end means a miscount.
        let start = match (first_role, first_pair) {
            (-1, -1) => -1,
            (-1, p) => p,
            (r, -1) => r,
            (r, p) => r.min(p),
        };
        let mut record_bound = usize::MAX;
        if start != -1 {
            let flag_id_count = dst_count - start as usize;
            record_bound = start as usize + 3 * flag_id_count + 3 + 1;
            records.reserve(record_bound.saturating_sub(records.len()));
        }

        // Records for role-flagged ids, keyed on synthetic (FLAG, x)
        // pairs; used by cleanup logic to find tables by flagged id.
        if first_role != -1 {
            for i in first_role as usize..dst_count {
                let cur = ids[i];
                if cur.is_pair() {
                    continue;
                }
                let (first, second) = if cur.has_role(id::PAIR) {
                    (cur.first(), cur.second())
                } else {
                    (cur.strip_roles(), id::NULL)
                };
                if first != id::NULL {
                    append_to_records(
                        ids_index,
                        registry,
                        table_id,
                        &mut records,
                        Id::pair(id::FLAG, first),
                        i,
                    );
                }
                if second != id::NULL {
                    append_to_records(
                        ids_index,
                        registry,
                        table_id,
                        &mut records,
                        Id::pair(id::FLAG, second),
                        i,
                    );
                }
            }
        }

        // One (R, *) record per distinct relationship, run-length counted
        // over the pair group, plus one (*, T) record per pair.
        let mut last_pair: i32 = -1;
        let has_childof = table_flags & flags::HAS_CHILD_OF != 0;
        let mut childof_scope: Option<Id> = None;
        if first_pair != -1 {
            let mut rel = id::NULL;
            let mut wc_slot = 0;
            let mut i = first_pair as usize;
            while i < dst_count && ids[i].is_pair() {
                let cur = ids[i];
                if rel != cur.first() {
                    rel = cur.first();
                    if rel == id::CHILD_OF {
                        childof_scope = Some(cur);
                    }
                    let parent = ids_index
                        .ensure(cur, registry)
                        .parent
                        .unwrap_or_else(|| panic!("pair {} has no wildcard parent", cur));
                    records.push(TableRecord::new(parent, i as i32, 0));
                    wc_slot = records.len() - 1;
                }
                records[wc_slot].count += 1;
                i += 1;
            }
            last_pair = i as i32;

            // Type ids sort relationship-first, so target records cannot
            // be grouped in one scan; dedupe through the cache instead.
            for i in first_pair as usize..last_pair as usize {
                let target_wc = Id::pair(id::WILDCARD, ids[i].second());
                append_to_records(ids_index, registry, table_id, &mut records, target_wc, i);
            }
        }

        // All-wildcard records: `*` over the regular ids, `(*, *)` over
        // the pair group, `_` for any non-empty type, and a (ChildOf, 0)
        // root record when no explicit ChildOf pair exists.
        if last_id >= 0 {
            ids_index.ensure(id::WILDCARD, registry);
            records.push(TableRecord::new(id::WILDCARD, 0, last_id + 1));
        }
        if first_pair != -1 && last_pair > first_pair {
            let wc_wc = Id::pair(id::WILDCARD, id::WILDCARD);
            ids_index.ensure(wc_wc, registry);
            records.push(TableRecord::new(wc_wc, first_pair, last_pair - first_pair));
        }
        if dst_count > 0 {
            ids_index.ensure(id::ANY, registry);
            records.push(TableRecord::new(id::ANY, 0, 1));
        }
        if dst_count > 0 && !has_childof {
            let childof_0 = Id::pair(id::CHILD_OF, id::NULL);
            ids_index.ensure(childof_0, registry);
            records.push(TableRecord::new(childof_0, 0, 1));
            childof_scope = Some(childof_0);
        }

        assert!(
            records.len() <= record_bound,
            "table record count {} exceeds pre-size bound {}",
            records.len(),
            record_bound
        );

        // Register every record with its id record. Records cached during
        // the scan now live at a different slot; patch those in place.
        let mut records = records.into_boxed_slice();
        let mut column_count = 0;
        for slot in 0..records.len() {
            let cache_id = records[slot].cache;

            if ids_index.get_table(cache_id, table_id).is_some() {
                ids_index.cache_replace(cache_id, table_id, slot);
            } else {
                ids_index.cache_insert(cache_id, table_id, slot);
            }

            // Claimed so the id record outlives every registered table.
            ids_index.claim(cache_id);

            let idr = ids_index
                .get(cache_id)
                .unwrap_or_else(|| panic!("id record {} vanished during init", cache_id));
            table_flags |= idr.event_flags & flags::EVENT_MASK;

            records[slot].column = -1;

            if slot < dst_count && idr.type_info.is_some() {
                column_count += 1;
            }
        }

        // Column construction: assign type↔column slots both ways and
        // patch the parent wildcard record of data-carrying pairs.
        let mut column_map = if column_count > 0 {
            vec![-1i32; dst_count + column_count].into_boxed_slice()
        } else {
            Box::default()
        };
        let mut columns = Vec::with_capacity(column_count);
        let mut cur = 0;
        for i in 0..dst_count {
            let cache_id = records[i].cache;
            let Some(ti) = ids_index.get(cache_id).and_then(|idr| idr.type_info) else {
                continue;
            };

            column_map[i] = cur as i32;
            column_map[dst_count + cur] = i as i32;
            records[i].column = cur as i32;

            columns.push(Column::new(ids[i], ti));

            if ids[i].is_pair() {
                let parent = ids_index
                    .get(cache_id)
                    .and_then(|idr| idr.parent)
                    .unwrap_or_else(|| panic!("pair {} has no wildcard parent", ids[i]));
                if let Some(wc_slot) = ids_index.get_table(parent, table_id) {
                    if records[wc_slot].index == records[i].index {
                        records[wc_slot].column = records[i].column;
                    }
                }
            }

            table_flags |= flags::type_info_flags(&ti);
            cur += 1;
        }
        debug_assert_eq!(cur, column_count);

        // One bitset column per TOGGLE-flagged id, scanned from the first
        // toggle offset.
        let mut bitsets = Vec::new();
        if table_flags & flags::HAS_TOGGLE != 0 {
            for &cur in &ids[bs_offset..] {
                if cur.has_role(id::TOGGLE) {
                    bitsets.push(BitsetColumn::new(cur));
                }
            }
            debug_assert!(!bitsets.is_empty());
        }

        let data = TableData::new(
            columns.into_boxed_slice(),
            bitsets.into_boxed_slice(),
            table_flags,
        );

        let name_index = if table_flags & flags::HAS_NAME != 0 {
            let scope = childof_scope.expect("named table without a ChildOf scope");
            Some(ids_index.name_index_ensure(scope, registry))
        } else {
            None
        };

        debug!(
            "table {:?} created with {} ids, {} records, {} columns",
            table_id,
            dst_count,
            records.len(),
            column_count
        );

        Table {
            id: table_id,
            ty,
            flags: table_flags,
            column_map,
            records,
            data,
            bs_offset,
            ft_offset,
            traversable_count: 0,
            name_index,
        }
    }

    /// Unregister this table from every id record it was cached in and
    /// release the claims taken at init.
    pub fn unregister(&self, ids_index: &mut IdIndex) {
        for record in self.records.iter() {
            debug_assert!(ids_index.get_table(record.cache, self.id).is_some());
            ids_index.cache_remove(record.cache, self.id);
            ids_index.release(record.cache);
        }
    }

    /// The table identifier.
    #[inline]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// The table's type.
    #[inline]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// The number of rows.
    #[inline]
    pub fn count(&self) -> usize {
        self.data.count()
    }

    /// Check if the table has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.count() == 0
    }

    /// The entities, one per row.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.data.entities
    }

    /// The flattened record array.
    #[inline]
    pub fn records(&self) -> &[TableRecord] {
        &self.records
    }

    /// Determine if all given flag bits are set.
    #[inline]
    pub fn has_flags(&self, check: TableFlags) -> bool {
        self.flags & check == check
    }

    /// The number of component columns.
    #[inline]
    pub fn column_count(&self) -> usize {
        self.data.columns.len()
    }

    /// Map a type slot to its column slot, or -1 for dataless ids and
    /// out-of-range input.
    pub fn type_to_column_index(&self, index: usize) -> i32 {
        if index >= self.ty.count() || self.column_map.is_empty() {
            return -1;
        }
        self.column_map[index]
    }

    /// Map a column slot back to its type slot, or -1 for out-of-range
    /// input.
    pub fn column_to_type_index(&self, index: usize) -> i32 {
        if index >= self.column_count() {
            return -1;
        }
        self.column_map[self.ty.count() + index]
    }

    /// The column at a column slot.
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.data.columns.get(index)
    }

    /// The element size of a column, or 0 for out-of-range input.
    pub fn column_size(&self, index: usize) -> usize {
        self.data.columns.get(index).map_or(0, |c| c.size())
    }

    /// Pointer to a column's data at `offset` elements in, or null for
    /// out-of-range input.
    pub fn column_ptr(&self, index: usize, offset: usize) -> *mut u8 {
        match self.data.columns.get(index) {
            Some(column) if offset < column.len() => column.el(offset),
            Some(_) | None => std::ptr::null_mut(),
        }
    }

    /// Offset of the first toggle id in the type.
    #[inline]
    pub fn bs_offset(&self) -> usize {
        self.bs_offset
    }

    /// Offset of the first Target pair in the type.
    #[inline]
    pub fn ft_offset(&self) -> usize {
        self.ft_offset
    }

    /// The number of entities in this table referenced through
    /// traversable relationships.
    #[inline]
    pub fn traversable_count(&self) -> i32 {
        self.traversable_count
    }

    /// Adjust the traversable count, maintaining the flag bit on the 0↔n
    /// transitions.
    pub fn traversable_add(&mut self, value: i32) {
        let result = self.traversable_count + value;
        assert!(result >= 0, "traversable count underflow");
        self.traversable_count = result;
        if result == 0 {
            self.flags &= !flags::HAS_TRAVERSABLE;
        } else if result == value {
            self.flags |= flags::HAS_TRAVERSABLE;
        }
    }

    /// The name index for tables with a Name component.
    #[inline]
    pub fn name_index(&self) -> Option<&NameIndex> {
        self.name_index.as_ref()
    }

    /// Verify the storage invariants: parallel array lengths, column
    /// length and capacity synchronization, bitset counts and a valid
    /// column map.
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        let count = self.data.entities.len();
        let capacity = self.data.entities.capacity();

        assert_eq!(count, self.data.records.len());

        for (i, column) in self.data.columns.iter().enumerate() {
            assert_eq!(column.len(), count, "column {} length mismatch", i);
            assert_eq!(column.capacity(), capacity, "column {} capacity mismatch", i);
        }

        for bitset in self.data.bitsets.iter() {
            assert_eq!(bitset.data.count(), count);
        }

        let type_count = self.ty.count();
        for i in 0..type_count {
            let column = self.type_to_column_index(i);
            assert!(column == -1 || (column as usize) < self.column_count());
        }
        for j in 0..self.column_count() {
            let type_index = self.column_to_type_index(j);
            assert!(type_index >= 0 && (type_index as usize) < type_count);
        }
    }
}
