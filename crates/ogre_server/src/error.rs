//! Error types for the replication server.

use ogre_core::CoreError;
use ogre_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the replication server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A method was called at the wrong lifecycle stage or a required
    /// collaborator is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No data source serves the requested type domain or object graph.
    #[error("not found: {0}")]
    NotFound(String),

    /// Two data sources hand back different schema instances under one id.
    #[error("type domain '{0}' is provided by data sources with different schemas")]
    SchemaCollision(String),

    /// Two data sources claim the same object graph.
    #[error("object graph '{type_domain_id}/{object_graph_id}' is provided twice")]
    DuplicateObjectGraph {
        /// Type domain id.
        type_domain_id: String,
        /// Object graph id.
        object_graph_id: String,
    },

    /// Framing or codec failure on a connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Change rejected by the entity store.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns true if the error was caused by the remote peer.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServerError::NotFound(_) | ServerError::Protocol(_))
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServerError::NotFound(_))
    }
}
