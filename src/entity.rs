//! Typed identifiers for domain records
//!
//! Every record in the engine carries an [`EntityId<T>`] where `T` is a
//! zero-sized marker type. Clause ids, tariff ids, and event ids are all
//! UUIDs underneath, but the phantom parameter keeps them from being mixed
//! up at compile time — a `ClauseId` cannot be passed where a `TariffId`
//! is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use uuid::Uuid;

/// A typed entity ID using phantom types for type safety
///
/// IDs are globally unique and persistent. Marker types for each record
/// kind live in [`crate::identifiers`].
///
/// # Examples
///
/// ```rust
/// use ppa_settlement::{ClauseId, TariffId};
///
/// let clause_id = ClauseId::new();
/// let tariff_id = TariffId::new();
///
/// // These are different types - won't compile if mixed up:
/// // let _: ClauseId = tariff_id; // ERROR!
/// # let _ = (clause_id, tariff_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId<T> {
    id: Uuid,
    #[serde(skip)]
    _phantom: PhantomData<T>,
}

impl<T> EntityId<T> {
    /// Create a new random entity ID
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            _phantom: PhantomData,
        }
    }

    /// Create an entity ID from a UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.id
    }
}

impl<T> fmt::Display for EntityId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl<T> Default for EntityId<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<EntityId<T>> for Uuid {
    fn from(id: EntityId<T>) -> Self {
        id.id
    }
}

impl<T> From<&EntityId<T>> for Uuid {
    fn from(id: &EntityId<T>) -> Self {
        id.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct Widget;

    #[test]
    fn test_ids_are_unique() {
        let a = EntityId::<Widget>::new();
        let b = EntityId::<Widget>::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_uuid_round_trip() {
        let uuid = Uuid::new_v4();
        let id = EntityId::<Widget>::from_uuid(uuid);
        assert_eq!(*id.as_uuid(), uuid);
        assert_eq!(Uuid::from(id), uuid);
        assert_eq!(id.to_string(), uuid.to_string());
    }

    #[test]
    fn test_serde_round_trip() {
        let id = EntityId::<Widget>::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: EntityId<Widget> = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
