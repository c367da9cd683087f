//! Table lifecycle events and the observer broker.
//!
//! The store owns a [`Broker`]; queries and other collaborators register
//! observers for the event kinds they care about. `Fill`/`Empty` fire
//! exactly once per empty↔nonempty transition; `Create`/`Delete` fire on
//! table lifecycle boundaries when someone is listening.

use crate::ecs::storage::TableId;

/// The kinds of events the engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A table was created.
    Create,
    /// A table is being deleted.
    Delete,
    /// A table went from empty to nonempty.
    Fill,
    /// A table went from nonempty to empty.
    Empty,
    /// A component was added to entities.
    OnAdd,
    /// A component was removed from entities.
    OnRemove,
    /// A component value was set.
    OnSet,
    /// A component value was unset.
    UnSet,
}

impl Kind {
    #[inline]
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// A table event delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEvent {
    pub kind: Kind,
    pub table: TableId,
}

type Observer = Box<dyn Fn(&TableEvent)>;

/// Central registry of table-event observers.
#[derive(Default)]
pub struct Broker {
    observers: Vec<(Kind, Observer)>,
    mask: u32,
}

impl Broker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            mask: 0,
        }
    }

    /// Register an observer for one event kind.
    pub fn observe<F: Fn(&TableEvent) + 'static>(&mut self, kind: Kind, observer: F) {
        self.mask |= kind.bit();
        self.observers.push((kind, Box::new(observer)));
    }

    /// Determine if any observer is registered for the kind. Used by the
    /// engine to skip event construction entirely.
    #[inline]
    pub fn has(&self, kind: Kind) -> bool {
        self.mask & kind.bit() != 0
    }

    /// Deliver an event to every observer of its kind.
    pub fn emit(&self, event: TableEvent) {
        if !self.has(event.kind) {
            return;
        }
        for (kind, observer) in &self.observers {
            if *kind == event.kind {
                observer(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn emit_reaches_matching_observers_only() {
        // Given
        let mut broker = Broker::new();
        let fills = Rc::new(Cell::new(0));
        let empties = Rc::new(Cell::new(0));

        let fills_seen = fills.clone();
        broker.observe(Kind::Fill, move |_| fills_seen.set(fills_seen.get() + 1));
        let empties_seen = empties.clone();
        broker.observe(Kind::Empty, move |_| empties_seen.set(empties_seen.get() + 1));

        // When
        broker.emit(TableEvent {
            kind: Kind::Fill,
            table: TableId::new(0),
        });

        // Then
        assert_eq!(fills.get(), 1);
        assert_eq!(empties.get(), 0);
    }

    #[test]
    fn has_tracks_registration() {
        let mut broker = Broker::new();

        assert!(!broker.has(Kind::Create));

        broker.observe(Kind::Create, |_| {});

        assert!(broker.has(Kind::Create));
        assert!(!broker.has(Kind::Delete));
    }

    #[test]
    fn emit_without_observers_is_a_noop() {
        let broker = Broker::new();

        broker.emit(TableEvent {
            kind: Kind::Delete,
            table: TableId::new(9),
        });
    }
}
