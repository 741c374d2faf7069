//! Error types for the replicating client.

use ogre_core::CoreError;
use ogre_protocol::ProtocolError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the replicating client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A setter or `initialise` was called at the wrong lifecycle stage, or
    /// a required collaborator is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The server does not serve the requested type domain or object graph.
    #[error("not found: {0}")]
    NotFound(String),

    /// The subscription stream ended.
    #[error("subscription closed by server")]
    SubscriptionClosed,

    /// Framing or codec failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Merge or schema failure.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Connection failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// Returns true for programmer errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Configuration(_))
            || matches!(self, ClientError::Core(e) if e.is_schema_error())
    }

    /// Returns true if the failure came from the connection and a fresh
    /// attempt may succeed. Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) | ClientError::SubscriptionClosed => true,
            ClientError::Protocol(e) => matches!(
                e,
                ProtocolError::Io(_) | ProtocolError::TruncatedStream { .. }
            ),
            _ => false,
        }
    }
}
