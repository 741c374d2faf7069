//! Error types for the protocol crate.

use std::io;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while framing, encoding or decoding messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The envelope did not start with the magic token.
    #[error("bad envelope: expected magic \"OGREv1\", found {found:02x?}")]
    BadEnvelope {
        /// The six bytes found instead.
        found: [u8; 6],
    },

    /// The stream ended in the middle of an envelope.
    #[error("truncated stream: expected {expected} bytes, got {actual}")]
    TruncatedStream {
        /// Bytes required to complete the current part.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },

    /// The declared payload length exceeds the configured limit.
    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Declared length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The first byte of a connection was not a known request code.
    #[error("unknown request code {0:#04x}")]
    UnknownRequestCode(u8),

    /// Payload encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A well-formed message of the wrong kind arrived.
    #[error("unexpected message: expected {expected}, got {found}")]
    UnexpectedMessage {
        /// Kind that was expected.
        expected: &'static str,
        /// Kind that arrived.
        found: &'static str,
    },

    /// Domain error while validating decoded content.
    #[error("core error: {0}")]
    Core(#[from] ogre_core::CoreError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Returns true for errors caused by malformed framing; the connection
    /// that produced them cannot be resynchronised and must be closed.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadEnvelope { .. }
                | ProtocolError::TruncatedStream { .. }
                | ProtocolError::PayloadTooLarge { .. }
                | ProtocolError::UnknownRequestCode(_)
        )
    }
}
