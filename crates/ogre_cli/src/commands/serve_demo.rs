//! Serve-demo command implementation.

use ogre_core::{
    EntityDiff, EntityId, EntityKey, EntityStore, EntityTypeDef, EntityValue, PropertyDef,
    TypeCode, TypeDomain, TypeDomainDef, Value,
};
use ogre_protocol::CborCodec;
use ogre_server::{
    ChangeSet, MemoryDataSource, ReplicationServer, ServerConfig, ServerEngine, SubscriptionHub,
};
use rand::seq::IteratorRandom;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Type domain served by the demo.
pub const TYPE_DOMAIN_ID: &str = "social";
/// Object graph served by the demo.
pub const OBJECT_GRAPH_ID: &str = "demo";

const PERSON: usize = 0;
const LIKES: usize = 1;

const NAMES: &[&str] = &[
    "Alice", "Bob", "Carol", "Dave", "Erin", "Frank", "Grace", "Heidi", "Ivan", "Judy",
];

/// Runs the serve-demo command until interrupted.
pub fn run(bind: SocketAddr, interval_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(bind, Duration::from_millis(interval_ms.max(1))))
}

async fn serve(bind: SocketAddr, interval: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let source = Arc::new(MemoryDataSource::new(
        Arc::new(demo_domain()?),
        OBJECT_GRAPH_ID,
    ));
    source.apply(seed())?;

    let hub = Arc::new(SubscriptionHub::new(Arc::new(CborCodec)));
    let mut engine = ServerEngine::new();
    engine.add_data_source(source.clone())?;
    engine.set_publisher(hub.clone())?;
    engine.initialise()?;

    let handle = ReplicationServer::new(ServerConfig::new(bind), engine, Arc::clone(&hub))
        .start()
        .await?;
    info!(
        addr = %handle.local_addr(),
        type_domain = TYPE_DOMAIN_ID,
        object_graph = OBJECT_GRAPH_ID,
        "demo graph ready"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut next_id = 100u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let changes = source.with_store(|store| mutate(store, &mut next_id));
                match changes {
                    Some(changes) => match source.apply(changes) {
                        Ok(report) => info!(
                            version = source.data_version(),
                            created = report.created,
                            updated = report.updated,
                            deleted = report.deleted,
                            subscribers = hub.subscriber_count(),
                            "graph mutated"
                        ),
                        Err(e) => warn!(error = %e, "mutation rejected"),
                    },
                    None => continue,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// `Person { name, age? }` and `Likes { from -> Person, to -> Person }`.
pub fn demo_domain() -> Result<TypeDomain, ogre_core::CoreError> {
    TypeDomainDef::new(TYPE_DOMAIN_ID)
        .with_entity_type(
            EntityTypeDef::new("Person")
                .with_property(PropertyDef::new("name", TypeCode::String))
                .with_property(PropertyDef::new("age", TypeCode::Int32).nullable(true)),
        )
        .with_entity_type(
            EntityTypeDef::new("Likes")
                .with_property(PropertyDef::reference("from", "Person"))
                .with_property(PropertyDef::reference("to", "Person")),
        )
        .build()
}

fn seed() -> ChangeSet {
    let mut changes = ChangeSet::new();
    for (n, name) in NAMES.iter().take(3).enumerate() {
        if let Ok(id) = EntityId::new(n as u64 + 1) {
            changes = changes.create(person(id, name, Some(30 + n as i32)));
        }
    }
    if let (Ok(one), Ok(two)) = (EntityId::new(1), EntityId::new(2)) {
        changes = changes.create(likes(one, one, two));
    }
    changes
}

fn person(id: EntityId, name: &str, age: Option<i32>) -> EntityValue {
    EntityValue::new(PERSON, id, vec![name.into(), age.into()])
}

fn likes(id: EntityId, from: EntityId, to: EntityId) -> EntityValue {
    EntityValue::new(LIKES, id, vec![from.into(), to.into()])
}

/// Picks one random change against the current contents.
fn mutate(store: &EntityStore, next_id: &mut u64) -> Option<ChangeSet> {
    let mut rng = rand::thread_rng();
    let people: Vec<EntityId> = store.entities_of(PERSON).map(|e| e.id()).collect();
    let id = EntityId::new(*next_id).ok()?;

    let choice = if people.len() < 2 { 0 } else { rng.gen_range(0..4) };
    let changes = match choice {
        0 => {
            let name = NAMES[rng.gen_range(0..NAMES.len())];
            let age = rng.gen_bool(0.7).then(|| rng.gen_range(18..90));
            *next_id += 1;
            ChangeSet::new().create(person(id, name, age))
        }
        1 => {
            let pair: Vec<EntityId> = people.iter().copied().choose_multiple(&mut rng, 2);
            *next_id += 1;
            ChangeSet::new().create(likes(id, pair[0], pair[1]))
        }
        2 => {
            let target = *people.iter().choose(&mut rng)?;
            let mut diff = EntityDiff::new(EntityKey::new(PERSON, target), 2);
            diff.set(1, Value::Int32(rng.gen_range(18..90)));
            ChangeSet::new().update(diff)
        }
        _ => {
            let target = *people.iter().choose(&mut rng)?;
            ChangeSet::new().delete(EntityKey::new(PERSON, target))
        }
    };
    Some(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogre_core::merge;

    #[test]
    fn seed_applies_to_demo_domain() {
        let source = MemoryDataSource::new(Arc::new(demo_domain().unwrap()), OBJECT_GRAPH_ID);
        let report = source.apply(seed()).unwrap();
        assert_eq!(report.created, 4);
        assert!(report.is_clean());
    }

    #[test]
    fn mutations_always_merge() {
        let mut store = EntityStore::new(Arc::new(demo_domain().unwrap()));
        let mut seed_update = ogre_core::GraphUpdate::new(TYPE_DOMAIN_ID, OBJECT_GRAPH_ID);
        seed_update.creates = seed().creates;
        merge(&mut store, &seed_update).unwrap();

        let mut next_id = 100;
        for _ in 0..200 {
            let Some(changes) = mutate(&store, &mut next_id) else {
                continue;
            };
            let mut update = ogre_core::GraphUpdate::new(TYPE_DOMAIN_ID, OBJECT_GRAPH_ID);
            update.creates = changes.creates;
            update.updates = changes.updates;
            update.deletes = changes.deletes;
            let report = merge(&mut store, &update).unwrap();
            assert!(report.is_clean());
        }
    }
}
