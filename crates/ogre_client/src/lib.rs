//! # OGRE Client
//!
//! Keeps a local, live replica of one object graph served by an OGRE
//! replication server.
//!
//! This crate provides:
//! - [`ClientEngine`], the replica lifecycle (configure, initialise, live)
//! - The collaborator traits [`ReplicaTransport`] and [`UpdateSubscriber`]
//! - [`TcpTransport`], a blocking implementation of both over TCP
//! - [`MockTransport`] for tests
//!
//! # Threading
//!
//! `initialise` blocks the calling thread while it fetches. Live updates
//! arrive on a thread owned by the subscription and are merged there. The
//! store sits behind a lock: read it with [`ClientEngine::with_store`], or
//! from inside the callback registered with
//! [`ClientEngine::set_update_listener`].
//!
//! Nothing here retries. A failed fetch is returned to the caller and a
//! closed stream is reported to the listener as
//! [`ReplicaEvent::Disconnected`]; reconnecting is up to the application.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod engine;
mod error;
mod tcp;
mod transport;

pub use config::ClientConfig;
pub use engine::{ClientEngine, EngineState, ReplicaEvent, ReplicaStats, UpdateListener};
pub use error::{ClientError, ClientResult};
pub use tcp::TcpTransport;
pub use transport::{MockTransport, ReplicaTransport, Subscription, UpdateSink, UpdateSubscriber};
