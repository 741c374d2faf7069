//! # OGRE Protocol
//!
//! Wire protocol shared by the OGRE replication server and client.
//!
//! A connection starts with a single [`RequestCode`] byte, followed by an
//! enveloped [`WireMessage::Request`] naming the target. The server answers
//! with one envelope (type domain or snapshot) or, for a subscription, a
//! stream of envelopes that lasts until either side closes the connection.
//!
//! Every envelope is `"OGREv1"`, a big-endian `u32` payload length, then the
//! payload. Payloads are produced by a [`MessageCodec`]; [`CborCodec`] is
//! the default.
//!
//! This crate does no network I/O of its own; the readers and writers work
//! on any `std::io` stream.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod envelope;
mod error;
mod request;

pub use codec::{frame, CborCodec, MessageCodec, WireMessage};
pub use envelope::{
    check_magic, encode_envelope, parse_length, read_envelope, write_envelope, EnvelopeReader,
    DEFAULT_MAX_PAYLOAD_LEN, HEADER_LEN, LENGTH_LEN, MAGIC,
};
pub use error::{ProtocolError, ProtocolResult};
pub use request::{RequestCode, RequestTarget};
