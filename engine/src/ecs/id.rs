//! 64-bit ids: plain ids, relationship pairs and role flags.
//!
//! Every key in a table's type is an [`Id`]. The 64 bits are laid out as:
//!
//! ```text
//! bit 63        PAIR     id encodes a (first, second) relationship pair
//! bit 62        TOGGLE   id has a per-entity enable bit (bitset column)
//! bit 61        OVERRIDE id is marked as an override
//! bit 60        reserved
//! bits 32..=59  pair first  (relationship), when PAIR is set
//! bits  0..=31  pair second (target), when PAIR is set
//! bits  0..=59  plain id value, when PAIR is not set
//! ```
//!
//! Ordering is purely numeric on the raw value, which is what keeps a
//! table's type vector sorted and unique.

use std::fmt;

/// Role flag marking an id as a relationship pair.
pub const PAIR: u64 = 1 << 63;

/// Role flag marking an id as toggleable (backed by a bitset column).
pub const TOGGLE: u64 = 1 << 62;

/// Role flag marking an id as an override.
pub const OVERRIDE: u64 = 1 << 61;

/// All role flag bits.
pub const ROLE_MASK: u64 = 0xF << 60;

/// The id value bits, with all role flags stripped.
pub const COMPONENT_MASK: u64 = !ROLE_MASK;

const PAIR_FIRST_MASK: u64 = 0x0FFF_FFFF;
const PAIR_SECOND_MASK: u64 = 0xFFFF_FFFF;

/// A 64-bit id. Plain ids name components and tags; pair ids express
/// relationships; role flags modify either.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u64);

/// The null id.
pub const NULL: Id = Id(0);

// Builtin ids occupy a small reserved range at the bottom of the id space.
pub const MODULE: Id = Id(1);
pub const PREFAB: Id = Id(2);
pub const DISABLED: Id = Id(3);
pub const CHILD_OF: Id = Id(4);
pub const IS_A: Id = Id(5);
pub const IDENTIFIER: Id = Id(6);
pub const NAME: Id = Id(7);
pub const TARGET: Id = Id(8);
pub const POLY: Id = Id(9);
pub const FLAG: Id = Id(10);

/// The `*` wildcard: matches any single id.
pub const WILDCARD: Id = Id(11);

/// The `_` wildcard: matches anything.
pub const ANY: Id = Id(12);

/// Upper bound of the builtin id range.
pub const LAST_INTERNAL: Id = Id(31);

impl Id {
    /// Construct an id from a raw 64-bit value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        Id(value)
    }

    /// Construct a pair id from a relationship and a target.
    #[inline]
    pub const fn pair(first: Id, second: Id) -> Self {
        Id(PAIR | ((first.0 & PAIR_FIRST_MASK) << 32) | (second.0 & PAIR_SECOND_MASK))
    }

    /// Get the raw 64-bit value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Determine if this id is a pair without any other role flags.
    #[inline]
    pub const fn is_pair(self) -> bool {
        (self.0 & ROLE_MASK) == PAIR
    }

    /// The relationship element of a pair id.
    #[inline]
    pub const fn first(self) -> Id {
        Id((self.0 >> 32) & PAIR_FIRST_MASK)
    }

    /// The target element of a pair id.
    #[inline]
    pub const fn second(self) -> Id {
        Id(self.0 & PAIR_SECOND_MASK)
    }

    /// Determine if the given role flag is set.
    #[inline]
    pub const fn has_role(self, role: u64) -> bool {
        (self.0 & role) != 0
    }

    /// Determine if any role flag is set.
    #[inline]
    pub const fn has_any_role(self) -> bool {
        (self.0 & ROLE_MASK) != 0
    }

    /// The id with all role flags stripped.
    #[inline]
    pub const fn strip_roles(self) -> Id {
        Id(self.0 & COMPONENT_MASK)
    }

    /// Determine if this is a plain id: no roles, no pair encoding.
    #[inline]
    pub const fn is_plain(self) -> bool {
        (self.0 & COMPONENT_MASK) == self.0
    }

    /// Determine if this id is, or contains, a wildcard.
    #[inline]
    pub fn is_wildcard(self) -> bool {
        if self == WILDCARD || self == ANY {
            return true;
        }
        self.is_pair() && (self.first() == WILDCARD || self.second() == WILDCARD)
    }

    /// Determine if this id is in the builtin range.
    #[inline]
    pub const fn is_builtin(self) -> bool {
        self.0 != 0 && self.0 <= LAST_INTERNAL.0
    }

    /// The dense index used to key the entity index.
    #[inline]
    pub const fn index(self) -> usize {
        (self.0 & PAIR_SECOND_MASK) as usize
    }
}

impl From<u64> for Id {
    #[inline]
    fn from(value: u64) -> Self {
        Id(value)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pair() {
            write!(f, "({}, {})", self.first().0, self.second().0)
        } else if self.has_any_role() {
            write!(f, "#{:x}|{}", self.0 & ROLE_MASK, self.strip_roles().0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_roundtrip() {
        // Given
        let eats = Id::new(100);
        let apples = Id::new(200);

        // When
        let pair = Id::pair(eats, apples);

        // Then
        assert!(pair.is_pair());
        assert_eq!(pair.first(), eats);
        assert_eq!(pair.second(), apples);
    }

    #[test]
    fn plain_id_is_not_pair() {
        let id = Id::new(42);

        assert!(!id.is_pair());
        assert!(id.is_plain());
        assert!(!id.has_any_role());
    }

    #[test]
    fn role_flags() {
        // Given
        let id = Id::new(Id::new(42).raw() | TOGGLE);

        // Then
        assert!(id.has_role(TOGGLE));
        assert!(!id.has_role(OVERRIDE));
        assert!(!id.is_pair());
        assert!(!id.is_plain());
        assert_eq!(id.strip_roles(), Id::new(42));
    }

    #[test]
    fn ordering_is_numeric() {
        // Plain ids sort below pair ids, which carry the high PAIR bit.
        let a = Id::new(1);
        let b = Id::new(2);
        let p = Id::pair(Id::new(1), Id::new(1));

        assert!(a < b);
        assert!(b < p);
    }

    #[test]
    fn wildcard_detection() {
        assert!(WILDCARD.is_wildcard());
        assert!(ANY.is_wildcard());
        assert!(Id::pair(WILDCARD, Id::new(5)).is_wildcard());
        assert!(Id::pair(Id::new(5), WILDCARD).is_wildcard());
        assert!(!Id::pair(Id::new(5), Id::new(6)).is_wildcard());
        assert!(!Id::new(5).is_wildcard());
    }

    #[test]
    fn pair_second_is_truncated_to_32_bits() {
        // Targets are stored in the low 32 bits; anything above is dropped.
        let wide = Id::new(0x1_0000_0001);
        let pair = Id::pair(CHILD_OF, wide);

        assert_eq!(pair.second(), Id::new(1));
    }

    #[test]
    fn builtin_range() {
        assert!(CHILD_OF.is_builtin());
        assert!(ANY.is_builtin());
        assert!(!Id::new(100).is_builtin());
        assert!(!NULL.is_builtin());
    }
}
