//! Entity types and storage.

mod id;
mod store;
mod wire;

pub use id::{EntityId, EntityKey, MAX_ENTITY_ID};
pub use store::EntityStore;
pub use wire::wire;

use crate::error::{CoreError, CoreResult};
use crate::schema::{EntityType, Property};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// An unwired entity: reference slots hold raw target ids that have not yet
/// been checked against any store. This is the over-the-wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityValue {
    /// Index of the entity type.
    pub type_index: usize,
    /// Entity id.
    pub id: EntityId,
    /// One value per property, in property index order.
    pub values: Vec<Value>,
}

impl EntityValue {
    /// Creates an entity value.
    pub fn new(type_index: usize, id: EntityId, values: Vec<Value>) -> Self {
        Self {
            type_index,
            id,
            values,
        }
    }

    /// Returns the store key.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.type_index, self.id)
    }
}

/// A wired entity.
///
/// Entities can only be produced by [`wire`], so every `Reference` slot of
/// an `Entity` named an entity that existed when it was wired; the store
/// keeps that true by nulling slots whose target is removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    key: EntityKey,
    values: Vec<Value>,
}

impl Entity {
    /// Returns the store key.
    pub fn key(&self) -> EntityKey {
        self.key
    }

    /// Index of the entity type.
    pub fn type_index(&self) -> usize {
        self.key.type_index
    }

    /// Entity id.
    pub fn id(&self) -> EntityId {
        self.key.id
    }

    /// All slot values, in property index order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Slot value by property index.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Converts back to the unwired form.
    pub fn to_value(&self) -> EntityValue {
        EntityValue::new(self.key.type_index, self.key.id, self.values.clone())
    }
}

/// Read-only view of an update to one entity's slots.
///
/// Complete values declare every slot; diffs declare only changed slots.
pub trait EntityUpdate {
    /// Entity being updated.
    fn key(&self) -> EntityKey;

    /// Value declared for the given property, if any.
    fn declared(&self, index: usize) -> Option<&Value>;
}

impl EntityUpdate for EntityValue {
    fn key(&self) -> EntityKey {
        EntityValue::key(self)
    }

    fn declared(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Checks one slot against its property declaration.
pub(crate) fn check_slot(key: EntityKey, property: &Property, value: &Value) -> CoreResult<()> {
    match value.type_code() {
        // Reference slots may always be null: removing a target nulls them.
        None if property.is_nullable() || property.is_reference() => Ok(()),
        None => Err(CoreError::value_type(
            key,
            property.name(),
            property.type_code(),
            "null in non-nullable slot",
        )),
        Some(code) if code == property.type_code() => Ok(()),
        Some(code) => Err(CoreError::value_type(
            key,
            property.name(),
            property.type_code(),
            format!("{code:?}"),
        )),
    }
}

/// Checks a complete value list against an entity type.
pub(crate) fn check_values(
    key: EntityKey,
    entity_type: &EntityType,
    values: &[Value],
) -> CoreResult<()> {
    if values.len() != entity_type.property_count() {
        return Err(CoreError::ArityMismatch {
            entity: key,
            expected: entity_type.property_count(),
            actual: values.len(),
        });
    }
    entity_type
        .properties()
        .iter()
        .zip(values)
        .try_for_each(|(property, value)| check_slot(key, property, value))
}
