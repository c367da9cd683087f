//! Archetype table storage engine.
//!
//! An ECS world stores a large, dynamic population of entities, each
//! carrying typed components and untyped tags. Entities that share the
//! same set of ids live together in one table whose component data is
//! laid out as parallel columns; adding or removing an id moves the
//! entity between tables rather than reallocating per entity.
//!
//! This crate implements the table subsystem: table creation and
//! teardown, type-erased column storage, the id-indexed lookup caches
//! (including wildcard-pair indexing), and the row operations (append,
//! delete, move, swap, merge, shrink) together with the lifecycle hook
//! protocol (ctor, dtor, on_add, on_remove and the move/copy variants).

pub mod ecs;

pub use ecs::{Entity, Id, Store, Table, TableId, Type};
