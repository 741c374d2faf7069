//! Resolution of raw reference ids into wired entities.

use super::{check_values, Entity, EntityKey, EntityStore, EntityValue};
use crate::error::{CoreError, CoreResult};
use std::collections::HashSet;

/// Wires a batch of raw entity values against a store.
///
/// Every non-null reference slot is looked up first in `store`, then in
/// `batch` itself, so a batch may describe entities that reference each
/// other in any order. Slots are also type-checked against the schema.
/// The store is not modified.
///
/// # Errors
///
/// Returns `DanglingReference` naming the property, the source entity and
/// the missing target if a reference resolves nowhere; `ValueTypeMismatch`
/// or `ArityMismatch` if a value does not fit its entity type.
pub fn wire(store: &EntityStore, batch: &[EntityValue]) -> CoreResult<Vec<Entity>> {
    let domain = store.domain();
    let batch_keys: HashSet<EntityKey> = batch.iter().map(EntityValue::key).collect();

    batch
        .iter()
        .map(|raw| {
            let key = raw.key();
            let entity_type = domain.entity_type(raw.type_index)?;
            check_values(key, entity_type, &raw.values)?;

            for (property, value) in entity_type.properties().iter().zip(&raw.values) {
                let (Some(target_index), Some(target_id)) =
                    (property.target_index(), value.as_reference())
                else {
                    continue;
                };
                let target = EntityKey::new(target_index, target_id);
                if !store.contains(target) && !batch_keys.contains(&target) {
                    return Err(CoreError::dangling(key, property.name(), target));
                }
            }

            Ok(Entity {
                key,
                values: raw.values.clone(),
            })
        })
        .collect()
}
