use crate::ecs::id::Id;

/// One entry in a table's record array, describing a single id's position
/// in the table. Every record is registered in exactly one id record's
/// table cache; `cache` names that id record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRecord {
    /// The id record this record is cached under.
    pub cache: Id,
    /// Slot in the table's type vector (for wildcard records, the first
    /// covered slot).
    pub index: i32,
    /// Slot in the column array, or -1 for dataless ids.
    pub column: i32,
    /// Run length for wildcard aggregation; 1 for concrete ids.
    pub count: i32,
}

impl TableRecord {
    pub fn new(cache: Id, index: i32, count: i32) -> Self {
        Self {
            cache,
            index,
            column: -1,
            count,
        }
    }
}
