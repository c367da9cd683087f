use dashmap::DashMap;

use crate::ecs::component::TypeInfo;
use crate::ecs::id::Id;

/// Central registry of component type descriptors, keyed by id.
///
/// Registration takes `&self` so descriptors can be added while the
/// registry is shared. Descriptors are copied out on lookup; hooks must be
/// in place before the first table that uses the id is created.
#[derive(Default)]
pub struct Registry {
    infos: DashMap<Id, TypeInfo>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            infos: DashMap::new(),
        }
    }

    /// Register a descriptor for its id. Re-registering an id replaces the
    /// previous descriptor.
    pub fn register(&self, info: TypeInfo) -> Id {
        let id = info.id();
        self.infos.insert(id, info);
        id
    }

    /// Get the descriptor for an id, if the id carries data.
    pub fn get(&self, id: Id) -> Option<TypeInfo> {
        self.infos.get(&id).map(|entry| *entry.value())
    }

    /// Determine if the id is registered as a component.
    pub fn contains(&self, id: Id) -> bool {
        self.infos.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        // Given
        let registry = Registry::new();

        // When
        let id = registry.register(TypeInfo::of::<u32>(Id::new(100)));

        // Then
        assert_eq!(id, Id::new(100));
        let info = registry.get(id).unwrap();
        assert_eq!(info.size(), 4);
        assert!(registry.contains(id));
    }

    #[test]
    fn get_unregistered_returns_none() {
        let registry = Registry::new();

        assert!(registry.get(Id::new(999)).is_none());
        assert!(!registry.contains(Id::new(999)));
    }

    #[test]
    fn register_through_shared_reference() {
        // Given
        let registry = Registry::new();
        let shared = &registry;

        // When - registration does not need a unique reference
        shared.register(TypeInfo::of::<u32>(Id::new(1000)));
        shared.register(TypeInfo::of::<f64>(Id::new(1001)));

        // Then
        assert_eq!(shared.get(Id::new(1000)).unwrap().size(), 4);
        assert_eq!(shared.get(Id::new(1001)).unwrap().size(), 8);
    }
}
