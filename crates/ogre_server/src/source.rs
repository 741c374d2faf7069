//! Data sources: the authoritative side of an object graph.

use crate::error::ServerResult;
use ogre_core::{
    merge, EntityDiff, EntityKey, EntityReference, EntityStore, EntityValue, GraphUpdate,
    MergeReport, TypeDomain,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback invoked with every update a data source produces.
pub type ChangeListener = Box<dyn Fn(GraphUpdate) + Send + Sync>;

/// An authoritative provider of one object graph.
///
/// A data source exposes exactly one `(TypeDomain, object graph id)` pair.
/// The type domain is handed out as an `Arc` so the server can tell two
/// sources that share one schema instance from two sources that merely
/// share an id.
pub trait DataSource: Send + Sync {
    /// The schema of the object graph.
    fn type_domain(&self) -> Arc<TypeDomain>;

    /// Id of the object graph.
    fn object_graph_id(&self) -> &str;

    /// Full current contents as an update of creates.
    fn create_snapshot(&self) -> GraphUpdate;

    /// Installs the callback for subsequent changes, replacing any earlier
    /// one. The callback runs synchronously on the mutating thread.
    fn set_change_listener(&self, listener: ChangeListener);
}

/// A batch of changes to apply to a [`MemoryDataSource`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Entities to create.
    pub creates: Vec<EntityValue>,
    /// Partial updates.
    pub updates: Vec<EntityDiff>,
    /// Entities to delete.
    pub deletes: Vec<EntityReference>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a create.
    pub fn create(mut self, entity: EntityValue) -> Self {
        self.creates.push(entity);
        self
    }

    /// Adds a partial update.
    pub fn update(mut self, diff: EntityDiff) -> Self {
        self.updates.push(diff);
        self
    }

    /// Adds a delete.
    pub fn delete(mut self, key: EntityKey) -> Self {
        self.deletes.push(EntityReference::new(key));
        self
    }

    /// Whether the change set is empty.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

struct SourceState {
    store: EntityStore,
    data_version: u32,
    data_version_scheme: u32,
}

impl SourceState {
    /// Version and scheme for the next update. Past `u32::MAX` the counter
    /// restarts at 1 under a fresh scheme, which replicas treat as a new
    /// sequence rather than as stale.
    fn next_version(&self) -> (u32, u32) {
        match self.data_version.checked_add(1) {
            Some(next) => (next, self.data_version_scheme),
            None => {
                let mut scheme = rand::random();
                while scheme == self.data_version_scheme {
                    scheme = rand::random();
                }
                (1, scheme)
            }
        }
    }
}

/// A data source backed by an in-memory [`EntityStore`].
///
/// Every applied [`ChangeSet`] bumps `data_version` by one. The
/// `data_version_scheme` is drawn at random once per instance, so a replica
/// can tell that a restarted source began counting again. It is redrawn
/// when the version counter runs out.
pub struct MemoryDataSource {
    domain: Arc<TypeDomain>,
    object_graph_id: String,
    state: Mutex<SourceState>,
    listener: RwLock<Option<ChangeListener>>,
}

impl MemoryDataSource {
    /// Creates an empty data source.
    pub fn new(domain: Arc<TypeDomain>, object_graph_id: impl Into<String>) -> Self {
        Self::with_scheme(domain, object_graph_id, rand::random())
    }

    /// Creates an empty data source with a fixed version scheme.
    pub fn with_scheme(
        domain: Arc<TypeDomain>,
        object_graph_id: impl Into<String>,
        data_version_scheme: u32,
    ) -> Self {
        let store = EntityStore::new(Arc::clone(&domain));
        Self {
            domain,
            object_graph_id: object_graph_id.into(),
            state: Mutex::new(SourceState {
                store,
                data_version: 0,
                data_version_scheme,
            }),
            listener: RwLock::new(None),
        }
    }

    /// Applies a change set and notifies the change listener.
    ///
    /// The listener runs before this returns, while the source is still
    /// locked, so listeners observe updates in version order.
    ///
    /// Refused creates do not block the diffs and deletes of the same change
    /// set. When the store did change, the published update leaves the
    /// refused creates out and the report carries the reason in
    /// [`MergeReport::creates_rejected`].
    ///
    /// # Errors
    ///
    /// Fails if the creates are rejected by the store (duplicate id or
    /// dangling reference) and nothing else applied; the version is then
    /// unchanged and no update is published.
    pub fn apply(&self, changes: ChangeSet) -> ServerResult<MergeReport> {
        let mut state = self.state.lock();
        let (version, scheme) = state.next_version();
        let mut update = GraphUpdate::new(self.domain.id(), &self.object_graph_id)
            .with_version(version, scheme);
        update.creates = changes.creates;
        update.updates = changes.updates;
        update.deletes = changes.deletes;

        let report = merge(&mut state.store, &update)?;
        if let Some(error) = &report.creates_rejected {
            if !report.changed_store() {
                return Err(error.clone().into());
            }
            warn!(
                object_graph = %self.object_graph_id,
                %error,
                "publishing change set without its creates"
            );
            update.creates.clear();
        }
        if scheme != state.data_version_scheme {
            info!(
                object_graph = %self.object_graph_id,
                scheme,
                "data version exhausted, new scheme"
            );
        }
        state.data_version = version;
        state.data_version_scheme = scheme;
        debug!(
            object_graph = %self.object_graph_id,
            version = update.data_version,
            changes = update.change_count(),
            "applied change set"
        );

        if let Some(listener) = self.listener.read().as_ref() {
            listener(update);
        }
        Ok(report)
    }

    /// Current data version.
    pub fn data_version(&self) -> u32 {
        self.state.lock().data_version
    }

    /// Version scheme of this instance.
    pub fn data_version_scheme(&self) -> u32 {
        self.state.lock().data_version_scheme
    }

    /// Runs `f` with read access to the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&EntityStore) -> R) -> R {
        f(&self.state.lock().store)
    }
}

impl DataSource for MemoryDataSource {
    fn type_domain(&self) -> Arc<TypeDomain> {
        Arc::clone(&self.domain)
    }

    fn object_graph_id(&self) -> &str {
        &self.object_graph_id
    }

    fn create_snapshot(&self) -> GraphUpdate {
        let state = self.state.lock();
        state
            .store
            .snapshot(&self.object_graph_id, state.data_version, state.data_version_scheme)
    }

    fn set_change_listener(&self, listener: ChangeListener) {
        info!(object_graph = %self.object_graph_id, "change listener installed");
        *self.listener.write() = Some(listener);
    }
}

impl std::fmt::Debug for MemoryDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDataSource")
            .field("type_domain", &self.domain.id())
            .field("object_graph_id", &self.object_graph_id)
            .field("data_version_scheme", &self.data_version_scheme())
            .finish_non_exhaustive()
    }
}
