//! # OGRE Core
//!
//! Schema model, entity store and diff/merge protocol for OGRE object-graph
//! replication.
//!
//! This crate provides:
//! - `TypeDomain` / `EntityType` / `Property` schema model with two-phase
//!   reference resolution (cyclic and self-referencing types are allowed)
//! - `EntityStore` with referential-integrity maintenance on delete
//! - Wiring of raw `EntityValue`s into `Entity`s
//! - `build_diff` and `merge` over `GraphUpdate` change-sets
//!
//! This is a pure crate with no I/O operations.
//!
//! ## Example
//!
//! ```
//! use ogre_core::{
//!     merge, EntityId, EntityKey, EntityStore, EntityTypeDef, EntityValue, GraphUpdate,
//!     PropertyDef, TypeCode, TypeDomainDef,
//! };
//! use std::sync::Arc;
//!
//! let domain = TypeDomainDef::new("social")
//!     .with_entity_type(
//!         EntityTypeDef::new("Person").with_property(PropertyDef::new("name", TypeCode::String)),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let mut store = EntityStore::new(Arc::new(domain));
//! let alice = EntityId::new(1).unwrap();
//! let mut update = GraphUpdate::new("social", "main");
//! update.creates.push(EntityValue::new(0, alice, vec!["Alice".into()]));
//!
//! let report = merge(&mut store, &update).unwrap();
//! assert_eq!(report.created, 1);
//! assert!(store.contains(EntityKey::new(0, alice)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod merge;
mod schema;
mod update;
mod value;

pub use entity::{
    wire, Entity, EntityId, EntityKey, EntityStore, EntityUpdate, EntityValue, MAX_ENTITY_ID,
};
pub use error::{CoreError, CoreResult};
pub use merge::{build_diff, merge, MergeReport, MergeWarning};
pub use schema::{
    EntityType, EntityTypeDef, Property, PropertyDef, PropertyRef, TypeCode, TypeDomain,
    TypeDomainDef,
};
pub use update::{EntityDiff, EntityReference, GraphUpdate};
pub use value::Value;
