//! Entity identifiers.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest valid entity id (2^52), the range a double can represent exactly.
pub const MAX_ENTITY_ID: u64 = 1 << 52;

/// Identifier of an entity within its entity type.
///
/// Ids are unique per `(type domain, entity type)`, not globally, and lie
/// in `1 ..= 2^52`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct EntityId(u64);

impl EntityId {
    /// Creates an id, validating its range.
    pub fn new(raw: u64) -> CoreResult<Self> {
        if raw == 0 || raw > MAX_ENTITY_ID {
            return Err(CoreError::InvalidEntityId(raw));
        }
        Ok(Self(raw))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for EntityId {
    type Error = CoreError;

    fn try_from(raw: u64) -> CoreResult<Self> {
        EntityId::new(raw)
    }
}

impl From<EntityId> for u64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-wide handle of an entity: its type index plus its id.
///
/// Wired references resolve to keys; the store maps keys to entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Index of the entity type.
    pub type_index: usize,
    /// Entity id.
    pub id: EntityId,
}

impl EntityKey {
    /// Creates a key.
    pub const fn new(type_index: usize, id: EntityId) -> Self {
        Self { type_index, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_index, self.id)
    }
}
