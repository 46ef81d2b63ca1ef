//! Agent ↔ naming registry messages.
//!
//! One request per connection: the client writes a single JSON line and
//! reads a single JSON line back.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Operations offered by a naming registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NamingRequest {
    /// Bind `name`; fails if already bound
    Bind { name: String, address: SocketAddr },
    /// Bind `name`, replacing any existing entry
    Rebind { name: String, address: SocketAddr },
    Lookup { name: String },
    /// Remove `name`; fails if not bound
    Unbind { name: String },
    List,
}

/// Registry replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NamingResponse {
    Ok,
    Address {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        address: Option<SocketAddr>,
    },
    Names { names: Vec<String> },
    Error { code: String, message: String },
}

impl NamingResponse {
    pub const ALREADY_BOUND: &'static str = "already_bound";
    pub const NOT_BOUND: &'static str = "not_bound";
    pub const BAD_REQUEST: &'static str = "bad_request";

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_wire_format() {
        let req = NamingRequest::Bind {
            name: "rma/ABC_Backup".to_string(),
            address: "127.0.0.1:4000".parse().unwrap(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"op":"bind","name":"rma/ABC_Backup","address":"127.0.0.1:4000"}"#
        );
    }

    #[test]
    fn test_empty_lookup_reply() {
        let parsed: NamingResponse = serde_json::from_str(r#"{"status":"address"}"#).unwrap();
        assert_eq!(parsed, NamingResponse::Address { address: None });
    }
}
