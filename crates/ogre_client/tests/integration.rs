//! Integration tests for the client engine against a real server.

use ogre_client::{
    ClientConfig, ClientEngine, ClientError, ReplicaEvent, ReplicaTransport, TcpTransport,
};
use ogre_core::{
    EntityDiff, EntityId, EntityKey, EntityTypeDef, EntityValue, PropertyDef, TypeCode,
    TypeDomain, TypeDomainDef, Value,
};
use ogre_protocol::{CborCodec, RequestTarget};
use ogre_server::{
    ChangeSet, DataSource, MemoryDataSource, ReplicationServer, ServerConfig, ServerEngine,
    ServerHandle, SubscriptionHub,
};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

const TIMEOUT: Duration = Duration::from_secs(10);

fn social() -> Arc<TypeDomain> {
    Arc::new(
        TypeDomainDef::new("social")
            .with_entity_type(
                EntityTypeDef::new("Person")
                    .with_property(PropertyDef::new("name", TypeCode::String)),
            )
            .with_entity_type(
                EntityTypeDef::new("Likes")
                    .with_property(PropertyDef::reference("from", "Person"))
                    .with_property(PropertyDef::reference("to", "Person")),
            )
            .build()
            .unwrap(),
    )
}

fn id(n: u64) -> EntityId {
    EntityId::new(n).unwrap()
}

fn person(n: u64, name: &str) -> EntityValue {
    EntityValue::new(0, id(n), vec![name.into()])
}

/// A running server plus handles to poke it.
struct Fixture {
    runtime: Runtime,
    handle: Option<ServerHandle>,
    hub: Arc<SubscriptionHub>,
    source: Arc<MemoryDataSource>,
}

impl Fixture {
    fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let source = Arc::new(MemoryDataSource::new(social(), "main"));
        source
            .apply(
                ChangeSet::new()
                    .create(person(1, "Alice"))
                    .create(person(2, "Bob"))
                    .create(EntityValue::new(
                        1,
                        id(1),
                        vec![Value::Reference(id(1)), Value::Reference(id(2))],
                    )),
            )
            .unwrap();

        let hub = Arc::new(SubscriptionHub::new(Arc::new(CborCodec)));
        let mut engine = ServerEngine::new();
        engine.add_data_source(source.clone()).unwrap();
        engine.set_publisher(hub.clone()).unwrap();
        engine.initialise().unwrap();

        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let handle = runtime
            .block_on(ReplicationServer::new(config, engine, Arc::clone(&hub)).start())
            .unwrap();

        Self {
            runtime,
            handle: Some(handle),
            hub,
            source,
        }
    }

    fn transport(&self) -> Arc<TcpTransport> {
        let addr = self.handle.as_ref().map(|h| h.local_addr()).unwrap();
        Arc::new(TcpTransport::new(
            ClientConfig::new(addr).with_read_timeout(TIMEOUT),
        ))
    }

    fn client(&self, object_graph_id: &str) -> ClientEngine {
        let transport = self.transport();
        let engine = ClientEngine::new();
        engine.set_transport(transport.clone()).unwrap();
        engine.set_update_subscriber(transport).unwrap();
        engine.set_type_domain_id("social").unwrap();
        engine.set_object_graph_id(object_graph_id).unwrap();
        engine
    }

    fn wait_for_subscribers(&self, count: usize) {
        let deadline = Instant::now() + TIMEOUT;
        while self.hub.subscriber_count() < count {
            assert!(Instant::now() < deadline, "subscriber never registered");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.runtime.block_on(handle.shutdown());
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forwards every replica event to a channel.
fn events(engine: &ClientEngine) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    engine.set_update_listener(move |event| {
        let label = match event {
            ReplicaEvent::Applied { data_version, .. } => format!("applied {data_version}"),
            ReplicaEvent::Stale { data_version } => format!("stale {data_version}"),
            ReplicaEvent::Rejected(e) => format!("rejected {e}"),
            ReplicaEvent::Disconnected(_) => "disconnected".to_string(),
        };
        let _ = tx.send(label);
    });
    rx
}

#[test]
fn initial_replica_matches_server() {
    let fixture = Fixture::start();
    let client = fixture.client("main");
    client.initialise().unwrap();

    let expected = fixture.source.create_snapshot().creates;
    let replica = client.create_snapshot().unwrap();
    assert_eq!(replica.creates, expected);

    client
        .with_store(|store| {
            let likes = store.get(EntityKey::new(1, id(1))).unwrap();
            let from = store.resolve(likes, 0).unwrap();
            assert_eq!(from.value(0).and_then(Value::as_str), Some("Alice"));
        })
        .unwrap();
}

#[test]
fn live_updates_reach_the_replica() {
    let fixture = Fixture::start();
    let client = fixture.client("main");
    let events = events(&client);
    client.initialise().unwrap();
    fixture.wait_for_subscribers(1);

    fixture
        .source
        .apply(ChangeSet::new().create(person(3, "Carol")))
        .unwrap();
    let mut rename = EntityDiff::new(EntityKey::new(0, id(1)), 1);
    rename.set(0, "Alicia".into());
    fixture
        .source
        .apply(
            ChangeSet::new()
                .update(rename)
                .delete(EntityKey::new(0, id(2))),
        )
        .unwrap();

    assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), "applied 2");
    assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), "applied 3");

    client
        .with_store(|store| {
            assert_eq!(store.entities_of(0).count(), 2);
            let alice = store.get(EntityKey::new(0, id(1))).unwrap();
            assert_eq!(alice.value(0).and_then(Value::as_str), Some("Alicia"));
            let likes = store.get(EntityKey::new(1, id(1))).unwrap();
            assert_eq!(likes.value(1), Some(&Value::Null));
        })
        .unwrap();

    let server_view = fixture.source.create_snapshot().creates;
    assert_eq!(client.create_snapshot().unwrap().creates, server_view);
}

#[test]
fn several_clients_see_the_same_stream() {
    let fixture = Fixture::start();
    let a = fixture.client("main");
    let b = fixture.client("main");
    let events_a = events(&a);
    let events_b = events(&b);
    a.initialise().unwrap();
    b.initialise().unwrap();
    fixture.wait_for_subscribers(2);

    for n in 10..15 {
        fixture
            .source
            .apply(ChangeSet::new().create(person(n, "x")))
            .unwrap();
    }
    for events in [&events_a, &events_b] {
        for version in 2..=6 {
            assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), format!("applied {version}"));
        }
    }
    assert_eq!(a.with_store(|s| s.len()).unwrap(), 8);
    assert_eq!(b.with_store(|s| s.len()).unwrap(), 8);
}

#[test]
fn unknown_ids_are_not_found() {
    let fixture = Fixture::start();

    let client = fixture.client("missing");
    let err = client.initialise().unwrap_err();
    assert!(err.is_not_found(), "{err}");

    let transport = fixture.transport();
    assert!(transport.fetch_type_domain("nope").unwrap_err().is_not_found());
    assert!(transport
        .fetch_snapshot(&RequestTarget::new("nope", "main"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn server_shutdown_disconnects_clients() {
    let mut fixture = Fixture::start();
    let client = fixture.client("main");
    let events = events(&client);
    client.initialise().unwrap();
    fixture.wait_for_subscribers(1);

    fixture.shutdown();

    assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), "disconnected");
    // the replica keeps its last contents
    assert_eq!(client.with_store(|s| s.len()).unwrap(), 3);
}

#[test]
fn closing_the_client_unsubscribes() {
    let fixture = Fixture::start();
    let client = fixture.client("main");
    client.initialise().unwrap();
    fixture.wait_for_subscribers(1);

    client.close();
    assert!(!client.is_subscribed());

    // The server notices on its next read or write.
    fixture
        .source
        .apply(ChangeSet::new().create(person(3, "Carol")))
        .unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while fixture.hub.subscriber_count() > 0 {
        assert!(Instant::now() < deadline, "server kept the subscriber");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn close_while_listener_calls_back_into_engine() {
    let fixture = Fixture::start();
    let client = Arc::new(fixture.client("main"));
    let (entered_tx, entered) = mpsc::channel();
    let weak: Weak<ClientEngine> = Arc::downgrade(&client);
    client.set_update_listener(move |event| {
        if let ReplicaEvent::Applied { .. } = event {
            let _ = entered_tx.send(());
            thread::sleep(Duration::from_millis(200));
            if let Some(engine) = weak.upgrade() {
                let _ = engine.is_subscribed();
                let _ = engine.with_store(|s| s.len());
            }
        }
    });
    client.initialise().unwrap();
    fixture.wait_for_subscribers(1);

    fixture
        .source
        .apply(ChangeSet::new().create(person(3, "Carol")))
        .unwrap();
    entered.recv_timeout(TIMEOUT).unwrap();

    let (done_tx, done) = mpsc::channel();
    let closer = Arc::clone(&client);
    thread::spawn(move || {
        closer.close();
        let _ = done_tx.send(closer.is_subscribed());
    });
    assert_eq!(done.recv_timeout(TIMEOUT), Ok(false));
}

#[test]
fn connection_refused_leaves_engine_configured() {
    let mut fixture = Fixture::start();
    let client = fixture.client("main");
    fixture.shutdown();

    let err = client.initialise().unwrap_err();
    assert!(matches!(err, ClientError::Io(_)), "{err}");
    assert!(err.is_retryable());
    assert_eq!(client.state(), ogre_client::EngineState::Configured);
}
