//! In-memory entity store with referential-integrity maintenance.

use super::{check_slot, Entity, EntityId, EntityKey, EntityUpdate, EntityValue};
use crate::error::{CoreError, CoreResult};
use crate::schema::TypeDomain;
use crate::update::GraphUpdate;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Indexed container of wired entities for one type domain.
///
/// The store holds one bucket per entity type, keyed by entity id. It owns
/// its entities; removing one also nulls every reference to it held by the
/// entities that remain.
#[derive(Clone)]
pub struct EntityStore {
    domain: Arc<TypeDomain>,
    buckets: Vec<BTreeMap<EntityId, Entity>>,
}

impl EntityStore {
    /// Creates an empty store for the given domain.
    pub fn new(domain: Arc<TypeDomain>) -> Self {
        let buckets = vec![BTreeMap::new(); domain.entity_types().len()];
        Self { domain, buckets }
    }

    /// The domain this store holds entities of.
    pub fn domain(&self) -> &Arc<TypeDomain> {
        &self.domain
    }

    /// Gets an entity by key.
    pub fn get(&self, key: EntityKey) -> Option<&Entity> {
        self.buckets.get(key.type_index)?.get(&key.id)
    }

    /// Checks if an entity exists.
    pub fn contains(&self, key: EntityKey) -> bool {
        self.get(key).is_some()
    }

    /// Follows a reference slot of `entity` to the live target.
    pub fn resolve(&self, entity: &Entity, property_index: usize) -> Option<&Entity> {
        let property = self
            .domain
            .entity_type(entity.type_index())
            .ok()?
            .property(property_index)?;
        let target_index = property.target_index()?;
        let target_id = entity.value(property_index)?.as_reference()?;
        self.get(EntityKey::new(target_index, target_id))
    }

    /// Adds a wired entity.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateEntity` if the key is already taken. Existing
    /// entities are never replaced; use [`update`](Self::update) for that.
    pub fn add(&mut self, entity: Entity) -> CoreResult<()> {
        let key = entity.key();
        let bucket = self.bucket_mut(key.type_index)?;
        if bucket.contains_key(&key.id) {
            return Err(CoreError::DuplicateEntity(key));
        }
        bucket.insert(key.id, entity);
        Ok(())
    }

    /// Adds a batch of wired entities, or none of them.
    pub fn add_all(&mut self, entities: Vec<Entity>) -> CoreResult<()> {
        let mut seen = std::collections::HashSet::with_capacity(entities.len());
        for entity in &entities {
            let key = entity.key();
            self.domain.entity_type(key.type_index)?;
            if self.contains(key) || !seen.insert(key) {
                return Err(CoreError::DuplicateEntity(key));
            }
        }
        for entity in entities {
            self.add(entity)?;
        }
        Ok(())
    }

    /// Overwrites every slot the update declares a value for.
    ///
    /// Declared values are type-checked and references must name entities
    /// present in the store. Nothing is written unless every declared slot
    /// passes.
    pub fn update<U: EntityUpdate + ?Sized>(&mut self, update: &U) -> CoreResult<()> {
        let key = update.key();
        let entity_type = self.domain.entity_type(key.type_index)?;
        if !self.contains(key) {
            return Err(CoreError::EntityNotFound(key));
        }

        let mut writes = Vec::new();
        for property in entity_type.properties() {
            let Some(value) = update.declared(property.index()) else {
                continue;
            };
            check_slot(key, property, value)?;
            if let (Some(target_index), Some(target_id)) =
                (property.target_index(), value.as_reference())
            {
                let target = EntityKey::new(target_index, target_id);
                if !self.contains(target) {
                    return Err(CoreError::dangling(key, property.name(), target));
                }
            }
            writes.push((property.index(), value.clone()));
        }

        let entity = self
            .buckets
            .get_mut(key.type_index)
            .and_then(|b| b.get_mut(&key.id))
            .ok_or(CoreError::EntityNotFound(key))?;
        for (index, value) in writes {
            entity.values[index] = value;
        }
        Ok(())
    }

    /// Removes an entity and nulls every reference slot that pointed at it.
    ///
    /// Only buckets of entity types declaring a reference property that
    /// targets the removed entity's type are scanned.
    pub fn remove(&mut self, key: EntityKey) -> Option<Entity> {
        let removed = self.buckets.get_mut(key.type_index)?.remove(&key.id)?;

        let referrers = self
            .domain
            .entity_type(key.type_index)
            .map(|t| t.referrers().to_vec())
            .unwrap_or_default();
        let target = Value::Reference(key.id);
        for referrer in referrers {
            let Some(bucket) = self.buckets.get_mut(referrer.type_index) else {
                continue;
            };
            for entity in bucket.values_mut() {
                let slot = &mut entity.values[referrer.property_index];
                if *slot == target {
                    trace!(entity = %entity.key, property = referrer.property_index, removed = %key, "nulling reference");
                    *slot = Value::Null;
                }
            }
        }
        Some(removed)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(BTreeMap::len).sum()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(BTreeMap::is_empty)
    }

    /// Iterates over all entities, by type index then id.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.buckets.iter().flat_map(BTreeMap::values)
    }

    /// Iterates over the entities of one type, by id.
    pub fn entities_of(&self, type_index: usize) -> impl Iterator<Item = &Entity> {
        self.buckets.get(type_index).into_iter().flat_map(BTreeMap::values)
    }

    /// Removes every entity.
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(BTreeMap::clear);
    }

    /// Builds an update whose creates are the full current contents.
    pub fn snapshot(
        &self,
        object_graph_id: impl Into<String>,
        data_version: u32,
        data_version_scheme: u32,
    ) -> GraphUpdate {
        let mut update = GraphUpdate::new(self.domain.id(), object_graph_id)
            .with_version(data_version, data_version_scheme);
        update.creates = self.iter().map(Entity::to_value).collect::<Vec<EntityValue>>();
        update
    }

    fn bucket_mut(&mut self, type_index: usize) -> CoreResult<&mut BTreeMap<EntityId, Entity>> {
        let count = self.buckets.len();
        self.buckets
            .get_mut(type_index)
            .ok_or(CoreError::EntityTypeIndexOutOfRange {
                index: type_index,
                count,
            })
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("domain", &self.domain.id())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
