//! Request codes and request addressing.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The single byte a client sends first on a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestCode {
    /// Fetch the schema of a type domain.
    FetchTypeDomain = 1,
    /// Fetch the full current contents of an object graph.
    FetchSnapshot = 2,
    /// Receive a stream of updates to an object graph.
    Subscribe = 3,
}

impl RequestCode {
    /// Short name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            RequestCode::FetchTypeDomain => "fetch-type-domain",
            RequestCode::FetchSnapshot => "fetch-snapshot",
            RequestCode::Subscribe => "subscribe",
        }
    }
}

impl TryFrom<u8> for RequestCode {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            1 => Ok(RequestCode::FetchTypeDomain),
            2 => Ok(RequestCode::FetchSnapshot),
            3 => Ok(RequestCode::Subscribe),
            other => Err(ProtocolError::UnknownRequestCode(other)),
        }
    }
}

impl From<RequestCode> for u8 {
    fn from(code: RequestCode) -> u8 {
        code as u8
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Names the type domain and, where relevant, the object graph a request
/// is about. Sent as an enveloped message right after the request code.
///
/// `object_graph_id` is ignored for `FetchTypeDomain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestTarget {
    /// Type domain id.
    pub type_domain_id: String,
    /// Object graph id.
    pub object_graph_id: String,
}

impl RequestTarget {
    /// Targets an object graph.
    pub fn new(type_domain_id: impl Into<String>, object_graph_id: impl Into<String>) -> Self {
        Self {
            type_domain_id: type_domain_id.into(),
            object_graph_id: object_graph_id.into(),
        }
    }

    /// Targets a type domain only.
    pub fn type_domain(type_domain_id: impl Into<String>) -> Self {
        Self::new(type_domain_id, "")
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.object_graph_id.is_empty() {
            write!(f, "{}", self.type_domain_id)
        } else {
            write!(f, "{}/{}", self.type_domain_id, self.object_graph_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_code_bytes() {
        for code in [
            RequestCode::FetchTypeDomain,
            RequestCode::FetchSnapshot,
            RequestCode::Subscribe,
        ] {
            assert_eq!(RequestCode::try_from(u8::from(code)).unwrap(), code);
        }
        assert_eq!(u8::from(RequestCode::Subscribe), 3);
    }

    #[test]
    fn unknown_request_code() {
        for byte in [0u8, 4, 0xff] {
            assert!(matches!(
                RequestCode::try_from(byte),
                Err(ProtocolError::UnknownRequestCode(b)) if b == byte
            ));
        }
    }

    #[test]
    fn target_display() {
        assert_eq!(RequestTarget::new("social", "main").to_string(), "social/main");
        assert_eq!(RequestTarget::type_domain("social").to_string(), "social");
    }
}
