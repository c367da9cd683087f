//! Table flags: a bitset summary of a table's type.
//!
//! Flags are computed once at table creation and used everywhere else to
//! early-out of expensive paths without re-inspecting the type vector.

use crate::ecs::component::TypeInfo;

pub type TableFlags = u32;

pub const HAS_BUILTINS: TableFlags = 1 << 0;
pub const IS_PREFAB: TableFlags = 1 << 1;
pub const IS_DISABLED: TableFlags = 1 << 2;
pub const HAS_MODULE: TableFlags = 1 << 3;
pub const HAS_PAIRS: TableFlags = 1 << 4;
pub const HAS_IS_A: TableFlags = 1 << 5;
pub const HAS_CHILD_OF: TableFlags = 1 << 6;
pub const HAS_NAME: TableFlags = 1 << 7;
pub const HAS_TARGET: TableFlags = 1 << 8;
pub const HAS_TOGGLE: TableFlags = 1 << 9;
pub const HAS_OVERRIDES: TableFlags = 1 << 10;

pub const HAS_CTORS: TableFlags = 1 << 11;
pub const HAS_DTORS: TableFlags = 1 << 12;
pub const HAS_COPY: TableFlags = 1 << 13;
pub const HAS_MOVE: TableFlags = 1 << 14;
pub const HAS_TRAVERSABLE: TableFlags = 1 << 15;

pub const HAS_ON_ADD: TableFlags = 1 << 16;
pub const HAS_ON_REMOVE: TableFlags = 1 << 17;
pub const HAS_ON_SET: TableFlags = 1 << 18;
pub const HAS_UN_SET: TableFlags = 1 << 19;

/// Event bits an id record may carry; merged into the table flags when the
/// table registers with the id record.
pub const EVENT_MASK: TableFlags = HAS_ON_ADD | HAS_ON_REMOVE | HAS_ON_SET | HAS_UN_SET;

/// Tables with any of these bits take the hook-dispatching slow paths.
pub const COMPLEX: TableFlags = HAS_CTORS | HAS_DTORS | HAS_COPY | HAS_MOVE | HAS_TOGGLE;

/// The flag bits contributed by one component's hook table.
pub fn type_info_flags(ti: &TypeInfo) -> TableFlags {
    let mut flags = 0;
    if ti.hooks.ctor.is_some() || ti.hooks.on_add.is_some() {
        flags |= HAS_CTORS;
    }
    if ti.hooks.dtor.is_some() || ti.hooks.on_remove.is_some() {
        flags |= HAS_DTORS;
    }
    if ti.hooks.copy.is_some() {
        flags |= HAS_COPY;
    }
    if ti.hooks.move_.is_some() {
        flags |= HAS_MOVE;
    }
    flags
}
