//! Watch command implementation.

use ogre_client::{ClientConfig, ClientEngine, ReplicaEvent, TcpTransport};
use ogre_core::{EntityStore, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{info, warn};

/// A printable view of a replica.
#[derive(Debug, Serialize)]
pub struct GraphView {
    /// Type domain id.
    pub type_domain: String,
    /// Object graph id.
    pub object_graph: String,
    /// Last applied data version.
    pub data_version: u32,
    /// Entities in type order.
    pub entities: Vec<EntityView>,
}

/// One entity of a [`GraphView`].
#[derive(Debug, Serialize)]
pub struct EntityView {
    /// Entity type name.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Entity id.
    pub id: u64,
    /// Property values by name.
    pub values: BTreeMap<String, serde_json::Value>,
}

enum Notice {
    Changed,
    Disconnected(String),
}

/// Runs the watch command until the server goes away.
pub fn run(
    server: SocketAddr,
    type_domain: &str,
    graph: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !matches!(format, "text" | "json") {
        return Err(format!("Unknown format: {format}").into());
    }

    let transport = Arc::new(TcpTransport::new(ClientConfig::new(server)));
    let engine = ClientEngine::new();
    engine.set_transport(transport.clone())?;
    engine.set_update_subscriber(transport)?;
    engine.set_type_domain_id(type_domain)?;
    engine.set_object_graph_id(graph)?;

    let (tx, rx) = mpsc::channel();
    engine.set_update_listener(move |event| {
        let notice = match event {
            ReplicaEvent::Applied { missed, .. } => {
                if *missed > 0 {
                    warn!(missed, "updates missed, replica may lag the server");
                }
                Notice::Changed
            }
            ReplicaEvent::Stale { .. } | ReplicaEvent::Rejected(_) => return,
            ReplicaEvent::Disconnected(e) => Notice::Disconnected(e.to_string()),
        };
        let _ = tx.send(notice);
    });

    engine.initialise()?;
    info!(%server, type_domain, graph, "watching");
    print(&engine, type_domain, graph, format)?;

    for notice in rx {
        match notice {
            Notice::Changed => print(&engine, type_domain, graph, format)?,
            Notice::Disconnected(reason) => {
                warn!(%reason, "replica disconnected");
                return Err(reason.into());
            }
        }
    }
    Ok(())
}

fn print(
    engine: &ClientEngine,
    type_domain: &str,
    graph: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let data_version = engine.data_version().map_or(0, |(_, v)| v);
    let view = engine.with_store(|store| GraphView {
        type_domain: type_domain.to_string(),
        object_graph: graph.to_string(),
        data_version,
        entities: entity_views(store),
    })?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&view)?),
        _ => print_text(&view),
    }
    Ok(())
}

fn print_text(view: &GraphView) {
    println!(
        "=== {}/{} @ v{} ({} entities) ===",
        view.type_domain,
        view.object_graph,
        view.data_version,
        view.entities.len()
    );
    for entity in &view.entities {
        let fields: Vec<String> = entity
            .values
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        println!("  {}#{} {}", entity.entity_type, entity.id, fields.join(" "));
    }
}

/// Flattens a store into views, resolving names from its type domain.
pub fn entity_views(store: &EntityStore) -> Vec<EntityView> {
    let domain = store.domain();
    store
        .iter()
        .filter_map(|entity| {
            let entity_type = domain.entity_type(entity.type_index()).ok()?;
            let values = entity_type
                .properties()
                .iter()
                .zip(entity.values())
                .map(|(property, value)| (property.name().to_string(), to_json(value)))
                .collect();
            Some(EntityView {
                entity_type: entity_type.name().to_string(),
                id: entity.id().get(),
                values,
            })
        })
        .collect()
}

fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Int32(n) => Json::from(*n),
        Value::Int64(n) => Json::from(*n),
        Value::Float32(n) => Json::from(f64::from(*n)),
        Value::Float64(n) => Json::from(*n),
        Value::String(s) => Json::from(s.as_str()),
        Value::Bytes(b) => Json::from(b.clone()),
        Value::Reference(id) => serde_json::json!({ "ref": id.get() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::serve_demo::demo_domain;
    use ogre_core::{merge, EntityId, EntityValue, GraphUpdate};

    #[test]
    fn views_use_schema_names() {
        let mut store = EntityStore::new(Arc::new(demo_domain().unwrap()));
        let one = EntityId::new(1).unwrap();
        let two = EntityId::new(2).unwrap();
        let mut update = GraphUpdate::new("social", "demo");
        update.creates.push(EntityValue::new(0, one, vec!["Alice".into(), Value::Null]));
        update.creates.push(EntityValue::new(0, two, vec!["Bob".into(), Value::Int32(41)]));
        update
            .creates
            .push(EntityValue::new(1, one, vec![one.into(), two.into()]));
        merge(&mut store, &update).unwrap();

        let views = entity_views(&store);
        assert_eq!(views.len(), 3);
        assert_eq!(views[0].entity_type, "Person");
        assert_eq!(views[0].values["name"], serde_json::json!("Alice"));
        assert_eq!(views[0].values["age"], serde_json::Value::Null);
        assert_eq!(views[1].values["age"], serde_json::json!(41));
        assert_eq!(views[2].entity_type, "Likes");
        assert_eq!(views[2].values["to"], serde_json::json!({ "ref": 2 }));
    }

    #[test]
    fn float_values_survive_json() {
        assert_eq!(to_json(&Value::Float64(1.5)), serde_json::json!(1.5));
        assert_eq!(to_json(&Value::Float64(f64::NAN)), serde_json::Value::Null);
        assert_eq!(to_json(&Value::Bytes(vec![1, 2])), serde_json::json!([1, 2]));
    }
}
