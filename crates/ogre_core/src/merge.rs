//! Building and applying change-sets.

use crate::entity::{wire, Entity, EntityKey, EntityStore, EntityValue};
use crate::error::{CoreError, CoreResult};
use crate::update::{EntityDiff, GraphUpdate};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// Builds the diff that turns `from` into `to`.
///
/// Returns `Ok(None)` when every slot is equivalent.
///
/// # Errors
///
/// Returns `TypeMismatch` if the entities are of different types.
pub fn build_diff(from: &Entity, to: &Entity) -> CoreResult<Option<EntityDiff>> {
    if from.type_index() != to.type_index() {
        return Err(CoreError::TypeMismatch {
            left: from.type_index(),
            right: to.type_index(),
        });
    }

    let mut diff = EntityDiff::new(to.key(), to.values().len());
    for (index, (old, new)) in from.values().iter().zip(to.values()).enumerate() {
        if !old.equivalent(new) {
            diff.set(index, new.clone());
        }
    }
    Ok((!diff.is_empty()).then_some(diff))
}

/// A problem during merge that skipped one change but not the update.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeWarning {
    /// A diff targeted an entity that is not in the store.
    MissingUpdateTarget(EntityKey),
    /// A delete targeted an entity that is not in the store.
    MissingDeleteTarget(EntityKey),
    /// A diff was rejected (bad value type or unresolvable reference).
    RejectedUpdate {
        /// Target of the diff.
        key: EntityKey,
        /// Why it was rejected.
        error: CoreError,
    },
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeWarning::MissingUpdateTarget(key) => write!(f, "update for unknown entity {key}"),
            MergeWarning::MissingDeleteTarget(key) => write!(f, "delete for unknown entity {key}"),
            MergeWarning::RejectedUpdate { key, error } => {
                write!(f, "update for {key} rejected: {error}")
            }
        }
    }
}

/// Outcome of a successful merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Entities created.
    pub created: usize,
    /// Diffs applied.
    pub updated: usize,
    /// Entities deleted.
    pub deleted: usize,
    /// Skipped changes.
    pub warnings: Vec<MergeWarning>,
    /// Why the creates batch was refused, if it was. Nothing from a refused
    /// batch is in the store.
    pub creates_rejected: Option<CoreError>,
}

impl MergeReport {
    /// Whether every change applied.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.creates_rejected.is_none()
    }

    /// Whether the merge wrote anything to the store.
    pub fn changed_store(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// Merges a graph update into a store.
///
/// Change-sets apply in a fixed order: creates, then updates, then deletes,
/// so one update may create an entity and also diff or delete another
/// entity referencing it.
///
/// Creates are all-or-nothing. A create whose key is already present (in
/// the store or earlier in the same batch) is a protocol violation, as is a
/// reference that cannot be wired; either refuses the whole batch and is
/// recorded in [`MergeReport::creates_rejected`]. The diffs and deletes of
/// the same update are applied regardless. Diffs and deletes that target
/// unknown entities are skipped with a [`MergeWarning`].
///
/// # Errors
///
/// `InvalidSchema` when the update targets a different type domain; the
/// store is untouched.
pub fn merge(store: &mut EntityStore, update: &GraphUpdate) -> CoreResult<MergeReport> {
    if update.type_domain_id != store.domain().id() {
        return Err(CoreError::invalid_schema(format!(
            "update targets type domain '{}', store holds '{}'",
            update.type_domain_id,
            store.domain().id()
        )));
    }

    let mut report = MergeReport::default();

    match add_creates(store, &update.creates) {
        Ok(created) => report.created = created,
        Err(error) => {
            warn!(%error, count = update.creates.len(), "creates batch rejected");
            report.creates_rejected = Some(error);
        }
    }

    for diff in &update.updates {
        let key = diff.key();
        if !store.contains(key) {
            warn!(entity = %key, "skipping update for unknown entity");
            report.warnings.push(MergeWarning::MissingUpdateTarget(key));
            continue;
        }
        match store.update(diff) {
            Ok(()) => report.updated += 1,
            Err(error) => {
                warn!(entity = %key, %error, "skipping rejected update");
                report.warnings.push(MergeWarning::RejectedUpdate { key, error });
            }
        }
    }

    for delete in &update.deletes {
        let key = delete.key();
        if store.remove(key).is_some() {
            report.deleted += 1;
        } else {
            warn!(entity = %key, "skipping delete for unknown entity");
            report.warnings.push(MergeWarning::MissingDeleteTarget(key));
        }
    }

    debug!(
        type_domain = %update.type_domain_id,
        object_graph = %update.object_graph_id,
        version = update.data_version,
        created = report.created,
        updated = report.updated,
        deleted = report.deleted,
        warnings = report.warnings.len(),
        "merged graph update"
    );
    Ok(report)
}

fn add_creates(store: &mut EntityStore, creates: &[EntityValue]) -> CoreResult<usize> {
    if creates.is_empty() {
        return Ok(0);
    }
    let mut seen = HashSet::with_capacity(creates.len());
    for raw in creates {
        let key = raw.key();
        if store.contains(key) || !seen.insert(key) {
            return Err(CoreError::DuplicateEntity(key));
        }
    }
    let wired = wire(store, creates)?;
    let created = wired.len();
    store.add_all(wired)?;
    Ok(created)
}
