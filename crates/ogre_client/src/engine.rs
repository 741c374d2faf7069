//! Client engine: keeps a local replica of one object graph.

use crate::error::{ClientError, ClientResult};
use crate::transport::{ReplicaTransport, Subscription, UpdateSubscriber};
use ogre_core::{merge, EntityStore, GraphUpdate, MergeReport};
use ogre_protocol::RequestTarget;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a [`ClientEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Some collaborator or id is still missing.
    Unconfigured,
    /// Everything is set; `initialise` may be called.
    Configured,
    /// `initialise` is running.
    Initialising,
    /// The replica is live.
    Ready,
}

impl EngineState {
    /// Whether setters are still accepted.
    pub fn is_configurable(&self) -> bool {
        matches!(self, EngineState::Unconfigured | EngineState::Configured)
    }
}

/// What happened to one update received on the live stream.
#[derive(Debug)]
pub enum ReplicaEvent {
    /// The update was merged.
    Applied {
        /// Version after the update.
        data_version: u32,
        /// Versions of the same scheme skipped between the previous update
        /// and this one. Non-zero means the replica may have diverged and
        /// should be initialised afresh.
        missed: u32,
        /// Merge outcome, including skipped changes and refused creates.
        report: MergeReport,
    },
    /// The update was older than the replica and was ignored.
    Stale {
        /// Version carried by the update.
        data_version: u32,
    },
    /// The update was rejected as a whole; the replica is unchanged.
    Rejected(ClientError),
    /// The live stream ended. No further events follow.
    Disconnected(ClientError),
}

/// Callback run on the subscription thread after each live update.
pub type UpdateListener = Arc<dyn Fn(&ReplicaEvent) + Send + Sync>;

/// Counters for the live stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    /// Updates merged.
    pub updates_applied: u64,
    /// Updates skipped as stale.
    pub updates_stale: u64,
    /// Updates rejected by merge.
    pub updates_rejected: u64,
    /// Applied updates whose creates batch was refused.
    pub creates_rejected: u64,
    /// Applied updates that arrived after a gap in versions.
    pub version_gaps: u64,
    /// Changes skipped inside otherwise applied updates.
    pub warnings: u64,
}

#[derive(Default)]
struct Settings {
    transport: Option<Arc<dyn ReplicaTransport>>,
    subscriber: Option<Arc<dyn UpdateSubscriber>>,
    type_domain_id: Option<String>,
    object_graph_id: Option<String>,
}

impl Settings {
    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.transport.is_none() {
            missing.push("transport");
        }
        if self.subscriber.is_none() {
            missing.push("update subscriber");
        }
        if self.type_domain_id.is_none() {
            missing.push("type domain id");
        }
        if self.object_graph_id.is_none() {
            missing.push("object graph id");
        }
        missing
    }
}

struct Replica {
    store: EntityStore,
    object_graph_id: String,
    data_version: u32,
    data_version_scheme: u32,
}

/// State shared with the subscription thread.
#[derive(Default)]
struct Shared {
    replica: Mutex<Option<Replica>>,
    /// Updates received while `initialise` is still fetching the snapshot.
    /// `Some` only during bootstrap; taken under the replica lock.
    backlog: Mutex<Option<Vec<GraphUpdate>>>,
    listener: RwLock<Option<UpdateListener>>,
    stats: Mutex<ReplicaStats>,
}

/// Replicates one object graph from a server into a local [`EntityStore`].
///
/// Configure the engine with the four setters, then call
/// [`initialise`](Self::initialise): it fetches the type domain, subscribes
/// to live updates and then builds the store from a snapshot. Live updates
/// are merged on the subscription's own thread; read the store through
/// [`with_store`](Self::with_store), which locks it against concurrent
/// merges.
///
/// # Example
///
/// ```no_run
/// use ogre_client::{ClientConfig, ClientEngine, TcpTransport};
/// use std::sync::Arc;
///
/// # fn run() -> ogre_client::ClientResult<()> {
/// let transport = Arc::new(TcpTransport::new(ClientConfig::new("127.0.0.1:7070".parse().unwrap())));
/// let engine = ClientEngine::new();
/// engine.set_transport(transport.clone())?;
/// engine.set_update_subscriber(transport)?;
/// engine.set_type_domain_id("social")?;
/// engine.set_object_graph_id("main")?;
/// engine.initialise()?;
///
/// let people = engine.with_store(|store| store.entities_of(0).count())?;
/// println!("{people} people");
/// # Ok(())
/// # }
/// ```
pub struct ClientEngine {
    state: RwLock<EngineState>,
    settings: Mutex<Settings>,
    shared: Arc<Shared>,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
}

impl ClientEngine {
    /// Creates an unconfigured engine.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState::Unconfigured),
            settings: Mutex::new(Settings::default()),
            shared: Arc::new(Shared::default()),
            subscription: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Sets the transport used for fetches.
    pub fn set_transport(&self, transport: Arc<dyn ReplicaTransport>) -> ClientResult<()> {
        self.configure("transport", |s| s.transport = Some(transport))
    }

    /// Sets the source of live updates.
    pub fn set_update_subscriber(&self, subscriber: Arc<dyn UpdateSubscriber>) -> ClientResult<()> {
        self.configure("update subscriber", |s| s.subscriber = Some(subscriber))
    }

    /// Sets the type domain to replicate.
    pub fn set_type_domain_id(&self, id: impl Into<String>) -> ClientResult<()> {
        let id = id.into();
        self.configure("type domain id", |s| s.type_domain_id = Some(id))
    }

    /// Sets the object graph to replicate.
    pub fn set_object_graph_id(&self, id: impl Into<String>) -> ClientResult<()> {
        let id = id.into();
        self.configure("object graph id", |s| s.object_graph_id = Some(id))
    }

    /// Registers a callback for live updates, replacing any earlier one.
    ///
    /// The callback runs on the subscription thread after the store lock
    /// has been released, so it may call [`with_store`](Self::with_store).
    /// May be called in any state.
    pub fn set_update_listener(&self, listener: impl Fn(&ReplicaEvent) + Send + Sync + 'static) {
        *self.shared.listener.write() = Some(Arc::new(listener));
    }

    /// Fetches the type domain, subscribes to live updates and builds the
    /// store from a snapshot.
    ///
    /// Updates that arrive before the snapshot is merged are held back and
    /// replayed on top of it; those the snapshot already covers are stale.
    /// Their events reach the listener before this returns.
    ///
    /// Calling this again once the engine is ready is a no-op. If any step
    /// fails the engine returns to `Configured` and may be initialised
    /// again.
    ///
    /// # Errors
    ///
    /// - `Configuration` if a collaborator or id is missing, or another
    ///   call is already initialising
    /// - `NotFound` if the server lacks the type domain or object graph
    /// - transport, protocol or merge errors from the fetches
    pub fn initialise(&self) -> ClientResult<()> {
        let (transport, subscriber, target) = {
            let mut state = self.state.write();
            match *state {
                EngineState::Ready => return Ok(()),
                EngineState::Initialising => {
                    return Err(ClientError::configuration("initialise already in progress"))
                }
                EngineState::Unconfigured => {
                    let missing = self.settings.lock().missing().join(", ");
                    return Err(ClientError::configuration(format!(
                        "cannot initialise, missing: {missing}"
                    )));
                }
                EngineState::Configured => {}
            }
            let settings = self.settings.lock();
            let (Some(transport), Some(subscriber), Some(td), Some(og)) = (
                settings.transport.clone(),
                settings.subscriber.clone(),
                settings.type_domain_id.clone(),
                settings.object_graph_id.clone(),
            ) else {
                return Err(ClientError::configuration("engine is not fully configured"));
            };
            *state = EngineState::Initialising;
            (transport, subscriber, RequestTarget::new(td, og))
        };

        match self.bootstrap(transport.as_ref(), subscriber.as_ref(), &target) {
            Ok((subscription, replayed)) => {
                *self.subscription.lock() = Some(subscription);
                *self.state.write() = EngineState::Ready;
                info!(target = %target, replayed = replayed.len(), "replica ready");
                for event in &replayed {
                    self.shared.notify(event);
                }
                Ok(())
            }
            Err(e) => {
                let mut replica = self.shared.replica.lock();
                *replica = None;
                *self.shared.backlog.lock() = None;
                drop(replica);
                *self.state.write() = EngineState::Configured;
                warn!(target = %target, error = %e, "initialise failed");
                Err(e)
            }
        }
    }

    fn bootstrap(
        &self,
        transport: &dyn ReplicaTransport,
        subscriber: &dyn UpdateSubscriber,
        target: &RequestTarget,
    ) -> ClientResult<(Box<dyn Subscription>, Vec<ReplicaEvent>)> {
        let domain = transport.fetch_type_domain(&target.type_domain_id)?;
        if domain.id() != target.type_domain_id {
            return Err(ClientError::configuration(format!(
                "server returned type domain '{}' for '{}'",
                domain.id(),
                target.type_domain_id
            )));
        }
        debug!(
            type_domain = domain.id(),
            entity_types = domain.entity_types().len(),
            "type domain fetched"
        );

        *self.shared.backlog.lock() = Some(Vec::new());
        let shared = Arc::clone(&self.shared);
        let subscription = subscriber.subscribe(
            target,
            Box::new(move |item| shared.handle_live(item)),
        )?;

        let snapshot = transport.fetch_snapshot(target)?;
        let mut store = EntityStore::new(Arc::new(domain));
        let report = merge(&mut store, &snapshot)?;
        if let Some(error) = report.creates_rejected {
            return Err(error.into());
        }
        debug!(
            entities = report.created,
            version = snapshot.data_version,
            "snapshot merged"
        );

        let mut guard = self.shared.replica.lock();
        let replica = guard.insert(Replica {
            store,
            object_graph_id: target.object_graph_id.clone(),
            data_version: snapshot.data_version,
            data_version_scheme: snapshot.data_version_scheme,
        });
        let backlog = self.shared.backlog.lock().take().unwrap_or_default();
        let replayed = backlog
            .iter()
            .map(|update| self.shared.apply_to(replica, update))
            .collect();
        Ok((subscription, replayed))
    }

    /// Runs `f` with the store locked against live merges.
    ///
    /// # Errors
    ///
    /// `Configuration` if the engine is not ready.
    pub fn with_store<R>(&self, f: impl FnOnce(&EntityStore) -> R) -> ClientResult<R> {
        let replica = self.shared.replica.lock();
        match replica.as_ref() {
            Some(replica) if self.state() == EngineState::Ready => Ok(f(&replica.store)),
            _ => Err(ClientError::configuration("engine is not initialised")),
        }
    }

    /// A point-in-time update whose creates are the full store contents.
    pub fn create_snapshot(&self) -> ClientResult<GraphUpdate> {
        let replica = self.shared.replica.lock();
        match replica.as_ref() {
            Some(r) if self.state() == EngineState::Ready => Ok(r.store.snapshot(
                &r.object_graph_id,
                r.data_version,
                r.data_version_scheme,
            )),
            _ => Err(ClientError::configuration("engine is not initialised")),
        }
    }

    /// Last applied `(data_version_scheme, data_version)`.
    pub fn data_version(&self) -> Option<(u32, u32)> {
        self.shared
            .replica
            .lock()
            .as_ref()
            .map(|r| (r.data_version_scheme, r.data_version))
    }

    /// Live stream counters.
    pub fn stats(&self) -> ReplicaStats {
        self.shared.stats.lock().clone()
    }

    /// Whether the live stream is still open.
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(|s| s.is_active())
    }

    /// Closes the live stream. The store keeps its last contents.
    ///
    /// Waits for a listener that is running on the subscription thread to
    /// return; the listener may call back into the engine meanwhile.
    pub fn close(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(mut subscription) = subscription {
            subscription.close();
            info!("replica subscription closed");
        }
    }

    fn configure(&self, what: &str, apply: impl FnOnce(&mut Settings)) -> ClientResult<()> {
        let mut state = self.state.write();
        if !state.is_configurable() {
            return Err(ClientError::configuration(format!(
                "cannot set {what} once initialisation has begun"
            )));
        }
        let mut settings = self.settings.lock();
        apply(&mut settings);
        *state = if settings.missing().is_empty() {
            EngineState::Configured
        } else {
            EngineState::Unconfigured
        };
        Ok(())
    }
}

impl Default for ClientEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClientEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn handle_live(&self, item: ClientResult<GraphUpdate>) {
        let event = match item {
            Ok(update) => {
                if let Some(backlog) = self.backlog.lock().as_mut() {
                    debug!(
                        version = update.data_version,
                        "holding update until snapshot is merged"
                    );
                    backlog.push(update);
                    return;
                }
                self.apply(&update)
            }
            Err(e) => {
                warn!(error = %e, "live update stream ended");
                ReplicaEvent::Disconnected(e)
            }
        };
        self.notify(&event);
    }

    fn notify(&self, event: &ReplicaEvent) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }

    fn apply(&self, update: &GraphUpdate) -> ReplicaEvent {
        let mut guard = self.replica.lock();
        match guard.as_mut() {
            Some(replica) => self.apply_to(replica, update),
            None => ReplicaEvent::Rejected(ClientError::configuration("replica not initialised")),
        }
    }

    fn apply_to(&self, replica: &mut Replica, update: &GraphUpdate) -> ReplicaEvent {
        let mut missed = 0;
        if update.data_version_scheme == replica.data_version_scheme {
            if update.data_version <= replica.data_version {
                debug!(
                    version = update.data_version,
                    current = replica.data_version,
                    "skipping stale update"
                );
                self.stats.lock().updates_stale += 1;
                return ReplicaEvent::Stale {
                    data_version: update.data_version,
                };
            }
            missed = update.data_version - replica.data_version - 1;
            if missed > 0 {
                warn!(
                    expected = replica.data_version + 1,
                    received = update.data_version,
                    missed,
                    "gap in update versions"
                );
            }
        } else {
            info!(
                old_scheme = replica.data_version_scheme,
                new_scheme = update.data_version_scheme,
                "data version scheme changed, server restarted"
            );
        }

        match merge(&mut replica.store, update) {
            Ok(report) => {
                replica.data_version = update.data_version;
                replica.data_version_scheme = update.data_version_scheme;
                let mut stats = self.stats.lock();
                stats.updates_applied += 1;
                stats.warnings += report.warnings.len() as u64;
                if report.creates_rejected.is_some() {
                    stats.creates_rejected += 1;
                }
                if missed > 0 {
                    stats.version_gaps += 1;
                }
                ReplicaEvent::Applied {
                    data_version: update.data_version,
                    missed,
                    report,
                }
            }
            Err(e) => {
                warn!(version = update.data_version, error = %e, "update rejected");
                self.stats.lock().updates_rejected += 1;
                ReplicaEvent::Rejected(e.into())
            }
        }
    }
}
