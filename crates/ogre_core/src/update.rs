//! Change-sets: diffs, deletes and whole graph updates.

use crate::entity::{EntityId, EntityKey, EntityUpdate, EntityValue};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A sparse update naming only the changed slots of one entity.
///
/// `values[i]` is `Some` exactly when property `i` changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDiff {
    /// Index of the entity type.
    pub type_index: usize,
    /// Entity id.
    pub id: EntityId,
    /// Changed slots, one entry per property.
    pub values: Vec<Option<Value>>,
}

impl EntityDiff {
    /// Creates a diff with no changed slots.
    pub fn new(key: EntityKey, property_count: usize) -> Self {
        Self {
            type_index: key.type_index,
            id: key.id,
            values: vec![None; property_count],
        }
    }

    /// Returns the store key.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.type_index, self.id)
    }

    /// Marks a slot as changed. Indices past the end grow the diff.
    pub fn set(&mut self, index: usize, value: Value) {
        if index >= self.values.len() {
            self.values.resize(index + 1, None);
        }
        self.values[index] = Some(value);
    }

    /// Whether the slot at `index` changed.
    pub fn is_changed(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(Some(_)))
    }

    /// Iterates over `(property index, new value)` pairs.
    pub fn changes(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (i, v)))
    }

    /// Whether no slot changed.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

impl EntityUpdate for EntityDiff {
    fn key(&self) -> EntityKey {
        EntityDiff::key(self)
    }

    fn declared(&self, index: usize) -> Option<&Value> {
        self.values.get(index)?.as_ref()
    }
}

/// Identifies an entity to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReference {
    /// Index of the entity type.
    pub type_index: usize,
    /// Entity id.
    pub id: EntityId,
}

impl EntityReference {
    /// Creates a delete reference.
    pub fn new(key: EntityKey) -> Self {
        Self {
            type_index: key.type_index,
            id: key.id,
        }
    }

    /// Returns the store key.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.type_index, self.id)
    }
}

/// The replication unit: creates, updates and deletes against one object
/// graph, plus version information.
///
/// `data_version` increases monotonically per object graph.
/// `data_version_scheme` is chosen once per data-source instance so that a
/// replica can tell when it is talking to a new incarnation whose version
/// counter restarted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphUpdate {
    /// Target type domain.
    pub type_domain_id: String,
    /// Target object graph.
    pub object_graph_id: String,
    /// Version of the graph after this update.
    pub data_version: u32,
    /// Version counter incarnation.
    pub data_version_scheme: u32,
    /// Entities to create.
    pub creates: Vec<EntityValue>,
    /// Partial updates to existing entities.
    pub updates: Vec<EntityDiff>,
    /// Entities to delete.
    pub deletes: Vec<EntityReference>,
}

impl GraphUpdate {
    /// Creates an empty update for the given target.
    pub fn new(type_domain_id: impl Into<String>, object_graph_id: impl Into<String>) -> Self {
        Self {
            type_domain_id: type_domain_id.into(),
            object_graph_id: object_graph_id.into(),
            data_version: 0,
            data_version_scheme: 0,
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Sets version and scheme.
    pub fn with_version(mut self, data_version: u32, data_version_scheme: u32) -> Self {
        self.data_version = data_version;
        self.data_version_scheme = data_version_scheme;
        self
    }

    /// Whether the update carries no changes.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of changes.
    pub fn change_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}
