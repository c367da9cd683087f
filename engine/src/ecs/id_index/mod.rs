//! The id-record index: per-id bookkeeping shared across tables.
//!
//! Every id that appears in any table has one [`IdRecord`]. The record
//! owns a table cache (which tables contain the id, and where the table's
//! [`TableRecord`](crate::ecs::storage::TableRecord) for it lives), a
//! claim counter that keeps the record alive while tables reference it,
//! and, for concrete pairs, a link to the `(R, *)` wildcard parent that
//! aggregates the relationship. Wildcard caches are what let queries find
//! tables by partial id.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ecs::component::{Registry, TypeInfo};
use crate::ecs::entity::Entity;
use crate::ecs::id::{self, Id};
use crate::ecs::storage::flags::TableFlags;
use crate::ecs::storage::TableId;

/// Shared name→entity lookup, scoped to one ChildOf id record.
pub type NameIndex = Rc<RefCell<HashMap<String, Entity>>>;

/// Per-id index entry.
pub struct IdRecord {
    id: Id,
    /// Claim count; one per registered table plus external claims.
    refs: u32,
    /// table → slot of the table's record for this id.
    cache: HashMap<TableId, usize>,
    /// For a concrete pair `(R, T)`: the `(R, *)` aggregate.
    pub parent: Option<Id>,
    /// Present iff the id carries data.
    pub type_info: Option<TypeInfo>,
    /// Event bits merged into the flags of every table that registers.
    pub event_flags: TableFlags,
    name_index: Option<NameIndex>,
}

impl IdRecord {
    /// The id this record describes.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// The current claim count.
    #[inline]
    pub fn refs(&self) -> u32 {
        self.refs
    }

    /// The slot of `table`'s record for this id, if the table is cached.
    #[inline]
    pub fn get_table(&self, table: TableId) -> Option<usize> {
        self.cache.get(&table).copied()
    }

    /// The number of tables cached under this id.
    #[inline]
    pub fn table_count(&self) -> usize {
        self.cache.len()
    }

    /// Iterate the cached tables and their record slots.
    pub fn tables(&self) -> impl Iterator<Item = (TableId, usize)> + '_ {
        self.cache.iter().map(|(&t, &slot)| (t, slot))
    }
}

/// The world-wide id → id-record map.
#[derive(Default)]
pub struct IdIndex {
    records: HashMap<Id, IdRecord>,
}

impl IdIndex {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Get the record for an id, creating it (and, for pairs, its wildcard
    /// parents) on first use. Type info is resolved from the registry: a
    /// pair takes its relationship's descriptor, falling back to the
    /// target's; role-flagged ids are dataless.
    pub fn ensure(&mut self, id: Id, registry: &Registry) -> &mut IdRecord {
        if !self.records.contains_key(&id) {
            let parent = if id.is_pair() && id.second() != id::WILDCARD {
                let parent = Id::pair(id.first(), id::WILDCARD);
                self.ensure(parent, registry);
                Some(parent)
            } else {
                None
            };

            let type_info = if id.is_pair() {
                registry
                    .get(id.first())
                    .or_else(|| registry.get(id.second()))
            } else if id.has_any_role() {
                None
            } else {
                registry.get(id)
            };

            self.records.insert(
                id,
                IdRecord {
                    id,
                    refs: 0,
                    cache: HashMap::new(),
                    parent,
                    type_info,
                    event_flags: 0,
                    name_index: None,
                },
            );
        }

        self.records.get_mut(&id).expect("id record just ensured")
    }

    /// Get the record for an id, if it exists.
    pub fn get(&self, id: Id) -> Option<&IdRecord> {
        self.records.get(&id)
    }

    /// Get a mutable record for an id, if it exists.
    pub fn get_mut(&mut self, id: Id) -> Option<&mut IdRecord> {
        self.records.get_mut(&id)
    }

    /// Claim an id record, keeping it alive.
    ///
    /// # Panics
    /// Panics if the record does not exist.
    pub fn claim(&mut self, id: Id) {
        let record = self
            .records
            .get_mut(&id)
            .unwrap_or_else(|| panic!("claim of unknown id record {}", id));
        record.refs += 1;
    }

    /// Release a claim. The record is dropped once no claims and no cached
    /// tables remain.
    ///
    /// # Panics
    /// Panics if the record does not exist or has no claims.
    pub fn release(&mut self, id: Id) {
        let record = self
            .records
            .get_mut(&id)
            .unwrap_or_else(|| panic!("release of unknown id record {}", id));
        assert!(record.refs > 0, "release of unclaimed id record {}", id);
        record.refs -= 1;
        if record.refs == 0 && record.cache.is_empty() {
            self.records.remove(&id);
        }
    }

    /// Cache a table's record slot under an id.
    ///
    /// # Panics
    /// Panics if the table is already cached; re-registration goes through
    /// [`IdIndex::cache_replace`].
    pub fn cache_insert(&mut self, id: Id, table: TableId, slot: usize) {
        let record = self
            .records
            .get_mut(&id)
            .unwrap_or_else(|| panic!("cache insert into unknown id record {}", id));
        let previous = record.cache.insert(table, slot);
        assert!(
            previous.is_none(),
            "table {:?} already cached under id {}",
            table,
            id
        );
    }

    /// Replace the cached slot for a table whose record moved.
    ///
    /// # Panics
    /// Panics if the table is not cached.
    pub fn cache_replace(&mut self, id: Id, table: TableId, slot: usize) {
        let record = self
            .records
            .get_mut(&id)
            .unwrap_or_else(|| panic!("cache replace in unknown id record {}", id));
        let entry = record
            .cache
            .get_mut(&table)
            .unwrap_or_else(|| panic!("table {:?} not cached under id {}", table, id));
        *entry = slot;
    }

    /// Remove a table from an id's cache.
    pub fn cache_remove(&mut self, id: Id, table: TableId) {
        if let Some(record) = self.records.get_mut(&id) {
            record.cache.remove(&table);
        }
    }

    /// The slot of `table`'s record under `id`, if cached.
    pub fn get_table(&self, id: Id, table: TableId) -> Option<usize> {
        self.records.get(&id).and_then(|r| r.get_table(table))
    }

    /// Get (or create) the name index scoped to an id record.
    pub fn name_index_ensure(&mut self, id: Id, registry: &Registry) -> NameIndex {
        let record = self.ensure(id, registry);
        record
            .name_index
            .get_or_insert_with(|| Rc::new(RefCell::new(HashMap::new())))
            .clone()
    }

    /// Merge event bits into an id record; tables registering with the id
    /// pick them up in their flags.
    pub fn add_event_flags(&mut self, id: Id, flags: TableFlags, registry: &Registry) {
        self.ensure(id, registry).event_flags |= flags;
    }
}
