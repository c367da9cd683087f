//! Shared fixtures for the storage benchmarks.

use archetable::ecs::component::TypeInfo;
use archetable::{Entity, Store};

/// Well-known component ids used across benchmark scenarios.
pub mod ids {
    use archetable::Id;

    pub const POSITION: Id = Id(1000);
    pub const VELOCITY: Id = Id(1001);
    pub const ROTATION: Id = Id(1002);
    pub const HEALTH: Id = Id(1003);
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
    pub dz: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Rotation {
    pub quat: [f32; 4],
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Health {
    pub value: i32,
}

/// A store with the benchmark components registered.
pub fn bench_store() -> Store {
    let store = Store::new();
    store.components.register(TypeInfo::trivial::<Position>(ids::POSITION));
    store.components.register(TypeInfo::trivial::<Velocity>(ids::VELOCITY));
    store.components.register(TypeInfo::trivial::<Rotation>(ids::ROTATION));
    store.components.register(TypeInfo::trivial::<Health>(ids::HEALTH));
    store
}

/// Entities with ids above the benchmark component range.
pub fn entity(n: u64) -> Entity {
    Entity::new(10_000 + n)
}
