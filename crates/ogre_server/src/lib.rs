//! # OGRE Server
//!
//! The authoritative side of OGRE replication.
//!
//! This crate provides:
//! - The [`DataSource`] contract and an in-memory implementation
//!   ([`MemoryDataSource`]) that stamps every change with a data version
//! - [`ServerEngine`], which aggregates data sources, answers type-domain
//!   and snapshot lookups, and forwards every update to one
//!   [`UpdatePublisher`]
//! - [`SubscriptionHub`], the publisher that fans updates out to subscribe
//!   connections
//! - [`ReplicationServer`], a tokio TCP listener speaking the request
//!   protocol from `ogre_protocol`
//!
//! # Concurrency
//!
//! Each accepted connection runs as its own task. Updates are produced
//! synchronously on whatever thread mutates a data source; the hub encodes
//! each update once and pushes the frame onto every matching subscriber's
//! unbounded queue. There is no backpressure beyond the socket buffers.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod engine;
mod error;
mod hub;
mod server;
mod source;

pub use config::ServerConfig;
pub use engine::{ServerEngine, UpdatePublisher};
pub use error::{ServerError, ServerResult};
pub use hub::{Frame, SubscriptionHub};
pub use server::{ReplicationServer, ServerHandle};
pub use source::{ChangeListener, ChangeSet, DataSource, MemoryDataSource};
