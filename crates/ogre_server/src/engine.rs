//! Server engine: aggregates data sources and forwards their updates.

use crate::error::{ServerError, ServerResult};
use crate::source::DataSource;
use ogre_core::{GraphUpdate, TypeDomain};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Outbound side of the server: receives every update produced by any
/// data source, for fan-out to subscribers.
pub trait UpdatePublisher: Send + Sync {
    /// Publishes one update.
    fn publish(&self, update: &GraphUpdate);
}

/// Aggregates data sources and answers type-domain and snapshot lookups.
///
/// Configure with [`add_data_source`](Self::add_data_source) and
/// [`set_publisher`](Self::set_publisher), then call
/// [`initialise`](Self::initialise). Lookups fail with `NotFound` until the
/// engine is initialised.
pub struct ServerEngine {
    sources: Vec<Arc<dyn DataSource>>,
    publisher: Option<Arc<dyn UpdatePublisher>>,
    domains: HashMap<String, Arc<TypeDomain>>,
    graphs: HashMap<(String, String), Arc<dyn DataSource>>,
    initialised: bool,
}

impl ServerEngine {
    /// Creates an engine with no data sources.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            publisher: None,
            domains: HashMap::new(),
            graphs: HashMap::new(),
            initialised: false,
        }
    }

    /// Adds a data source.
    pub fn add_data_source(&mut self, source: Arc<dyn DataSource>) -> ServerResult<()> {
        self.ensure_configurable("add_data_source")?;
        self.sources.push(source);
        Ok(())
    }

    /// Sets the publisher that receives every update.
    pub fn set_publisher(&mut self, publisher: Arc<dyn UpdatePublisher>) -> ServerResult<()> {
        self.ensure_configurable("set_publisher")?;
        self.publisher = Some(publisher);
        Ok(())
    }

    /// Indexes the data sources and connects them to the publisher.
    ///
    /// Calling this again after success is a no-op.
    ///
    /// # Errors
    ///
    /// - `Configuration` if no publisher is set
    /// - `SchemaCollision` if two sources return different type domain
    ///   instances under the same id
    /// - `DuplicateObjectGraph` if two sources serve the same graph
    pub fn initialise(&mut self) -> ServerResult<()> {
        if self.initialised {
            return Ok(());
        }
        let publisher = self
            .publisher
            .clone()
            .ok_or_else(|| ServerError::configuration("no update publisher set"))?;

        let mut domains: HashMap<String, Arc<TypeDomain>> = HashMap::new();
        let mut graphs = HashMap::new();
        for source in &self.sources {
            let domain = source.type_domain();
            let domain_id = domain.id().to_string();
            if let Some(existing) = domains.get(&domain_id) {
                if !Arc::ptr_eq(existing, &domain) {
                    return Err(ServerError::SchemaCollision(domain_id));
                }
            } else {
                domains.insert(domain_id.clone(), domain);
            }

            let graph_key = (domain_id, source.object_graph_id().to_string());
            if graphs.contains_key(&graph_key) {
                return Err(ServerError::DuplicateObjectGraph {
                    type_domain_id: graph_key.0,
                    object_graph_id: graph_key.1,
                });
            }
            graphs.insert(graph_key, Arc::clone(source));
        }

        for source in &self.sources {
            let publisher = Arc::clone(&publisher);
            source.set_change_listener(Box::new(move |update| publisher.publish(&update)));
        }

        info!(
            type_domains = domains.len(),
            object_graphs = graphs.len(),
            "server engine initialised"
        );
        self.domains = domains;
        self.graphs = graphs;
        self.initialised = true;
        Ok(())
    }

    /// Whether [`initialise`](Self::initialise) has succeeded.
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Looks up a type domain by id.
    pub fn type_domain(&self, type_domain_id: &str) -> ServerResult<Arc<TypeDomain>> {
        self.domains
            .get(type_domain_id)
            .cloned()
            .ok_or_else(|| ServerError::NotFound(format!("type domain '{type_domain_id}'")))
    }

    /// Returns a fresh snapshot of an object graph.
    pub fn object_graph(
        &self,
        type_domain_id: &str,
        object_graph_id: &str,
    ) -> ServerResult<GraphUpdate> {
        let source = self.source(type_domain_id, object_graph_id)?;
        let snapshot = source.create_snapshot();
        debug!(
            type_domain = type_domain_id,
            object_graph = object_graph_id,
            entities = snapshot.creates.len(),
            version = snapshot.data_version,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Whether an object graph is served.
    pub fn has_object_graph(&self, type_domain_id: &str, object_graph_id: &str) -> bool {
        self.source(type_domain_id, object_graph_id).is_ok()
    }

    fn source(
        &self,
        type_domain_id: &str,
        object_graph_id: &str,
    ) -> ServerResult<&Arc<dyn DataSource>> {
        self.graphs
            .get(&(type_domain_id.to_string(), object_graph_id.to_string()))
            .ok_or_else(|| {
                ServerError::NotFound(format!(
                    "object graph '{type_domain_id}/{object_graph_id}'"
                ))
            })
    }

    fn ensure_configurable(&self, operation: &str) -> ServerResult<()> {
        if self.initialised {
            return Err(ServerError::configuration(format!(
                "{operation} called after initialise"
            )));
        }
        Ok(())
    }
}

impl Default for ServerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChangeSet, MemoryDataSource};
    use ogre_core::{EntityId, EntityTypeDef, EntityValue, PropertyDef, TypeCode, TypeDomainDef};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        updates: Mutex<Vec<GraphUpdate>>,
    }

    impl UpdatePublisher for RecordingPublisher {
        fn publish(&self, update: &GraphUpdate) {
            self.updates.lock().push(update.clone());
        }
    }

    fn domain(id: &str) -> Arc<TypeDomain> {
        Arc::new(
            TypeDomainDef::new(id)
                .with_entity_type(
                    EntityTypeDef::new("Person")
                        .with_property(PropertyDef::new("name", TypeCode::String)),
                )
                .build()
                .unwrap(),
        )
    }

    fn engine_with(
        sources: Vec<Arc<dyn DataSource>>,
    ) -> (ServerEngine, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut engine = ServerEngine::new();
        for source in sources {
            engine.add_data_source(source).unwrap();
        }
        engine.set_publisher(publisher.clone()).unwrap();
        (engine, publisher)
    }

    #[test]
    fn lookups_after_initialise() {
        let social = domain("social");
        let main = Arc::new(MemoryDataSource::new(Arc::clone(&social), "main"));
        let archive = Arc::new(MemoryDataSource::new(Arc::clone(&social), "archive"));
        let (mut engine, _) = engine_with(vec![main, archive]);

        assert!(engine.type_domain("social").unwrap_err().is_not_found());
        engine.initialise().unwrap();

        assert!(Arc::ptr_eq(&engine.type_domain("social").unwrap(), &social));
        assert!(engine.type_domain("other").unwrap_err().is_not_found());
        assert_eq!(engine.object_graph("social", "archive").unwrap().object_graph_id, "archive");
        assert!(engine.object_graph("social", "nope").unwrap_err().is_not_found());
        assert!(engine.has_object_graph("social", "main"));
    }

    #[test]
    fn schema_collision_is_rejected() {
        let a = Arc::new(MemoryDataSource::new(domain("social"), "a"));
        let b = Arc::new(MemoryDataSource::new(domain("social"), "b"));
        let (mut engine, _) = engine_with(vec![a, b]);

        let err = engine.initialise().unwrap_err();
        assert!(matches!(err, ServerError::SchemaCollision(id) if id == "social"));
        assert!(!engine.is_initialised());
    }

    #[test]
    fn duplicate_object_graph_is_rejected() {
        let social = domain("social");
        let a = Arc::new(MemoryDataSource::new(Arc::clone(&social), "main"));
        let b = Arc::new(MemoryDataSource::new(social, "main"));
        let (mut engine, _) = engine_with(vec![a, b]);
        assert!(matches!(
            engine.initialise(),
            Err(ServerError::DuplicateObjectGraph { .. })
        ));
    }

    #[test]
    fn initialise_requires_publisher() {
        let mut engine = ServerEngine::new();
        assert!(matches!(
            engine.initialise(),
            Err(ServerError::Configuration(_))
        ));
    }

    #[test]
    fn configuration_is_frozen_after_initialise() {
        let (mut engine, publisher) = engine_with(Vec::new());
        engine.initialise().unwrap();
        engine.initialise().unwrap();

        let late = Arc::new(MemoryDataSource::new(domain("late"), "g"));
        assert!(matches!(
            engine.add_data_source(late),
            Err(ServerError::Configuration(_))
        ));
        assert!(matches!(
            engine.set_publisher(publisher),
            Err(ServerError::Configuration(_))
        ));
    }

    #[test]
    fn updates_are_forwarded_verbatim() {
        let source = Arc::new(MemoryDataSource::with_scheme(domain("social"), "main", 3));
        let (mut engine, publisher) = engine_with(vec![source.clone()]);
        engine.initialise().unwrap();

        let alice = EntityValue::new(0, EntityId::new(1).unwrap(), vec!["Alice".into()]);
        source.apply(ChangeSet::new().create(alice.clone())).unwrap();

        let updates = publisher.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].object_graph_id, "main");
        assert_eq!(updates[0].data_version, 1);
        assert_eq!(updates[0].data_version_scheme, 3);
        assert_eq!(updates[0].creates, vec![alice]);
    }
}
