//! Console ↔ agent endpoint messages.

use rma_core::{AttributeInfo, Notification, NodeSnapshot, ResolveError, Value};
use serde::{Deserialize, Serialize};

use crate::version::ProtocolVersion;

/// Requests a console can send to an agent endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake; must be the first message on a connection
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Read the node at `path`, relative to `object` (the application
    /// root when omitted)
    GetAttribute {
        #[serde(skip_serializing_if = "Option::is_none")]
        object: Option<String>,
        path: String,
    },

    /// Write a leaf value at `path`
    SetAttribute {
        #[serde(skip_serializing_if = "Option::is_none")]
        object: Option<String>,
        path: String,
        value: Value,
    },

    /// List the object names bound for this component
    ListObjects,

    /// Describe the attributes of one bound object
    DescribeObject { object: String },

    /// Start receiving notifications
    Subscribe,

    /// Stop receiving notifications
    Unsubscribe,

    Ping { seq: u64 },

    Disconnect,
}

/// Envelope for every console request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn get(object: Option<String>, path: impl Into<String>) -> Self {
        Self::new(MessageType::GetAttribute {
            object,
            path: path.into(),
        })
    }

    pub fn set(object: Option<String>, path: impl Into<String>, value: Value) -> Self {
        Self::new(MessageType::SetAttribute {
            object,
            path: path.into(),
            value,
        })
    }

    pub fn list_objects() -> Self {
        Self::new(MessageType::ListObjects)
    }

    pub fn describe(object: impl Into<String>) -> Self {
        Self::new(MessageType::DescribeObject {
            object: object.into(),
        })
    }

    pub fn subscribe() -> Self {
        Self::new(MessageType::Subscribe)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent by an agent endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Handshake accepted
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
        /// `name/instance` of the exposed component
        component: String,
    },

    /// Handshake refused (version mismatch, missing connect)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    AttributeValue { path: String, node: NodeSnapshot },

    AttributeWritten { path: String },

    /// An intermediate hop of `path` resolved to nothing
    NotFound { path: String, segment: String },

    ObjectList { objects: Vec<String> },

    ObjectDescription {
        object: String,
        type_name: String,
        attributes: Vec<AttributeInfo>,
    },

    Notification { notification: Notification },

    Pong { seq: u64 },

    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl AgentMessage {
    pub fn connected(client_id: String, component: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
            component,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    /// Maps a resolver failure onto an error response carrying its code.
    pub fn resolve_error(err: &ResolveError) -> Self {
        Self::error_with_code(&err.to_string(), err.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_request_wire_format() {
        let msg = ClientMessage::set(None, "Settings/Port", Value::Int(8080));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "set_attribute");
        assert_eq!(json["path"], "Settings/Port");
        assert_eq!(json["value"]["type"], "int");
        assert!(json.get("object").is_none());

        let parsed: ClientMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_request_from_console_text() {
        let line = r#"{"protocol_version":{"major":1,"minor":0},"type":"get_attribute","path":"Requests[2]/Type"}"#;
        let parsed: ClientMessage = serde_json::from_str(line).unwrap();
        assert_eq!(
            parsed.message,
            MessageType::GetAttribute {
                object: None,
                path: "Requests[2]/Type".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_error_response_carries_code() {
        let msg = AgentMessage::resolve_error(&ResolveError::IndexOutOfRange { index: 3, len: 1 });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "index_out_of_range");
    }

    #[test]
    fn test_attribute_value_response() {
        let msg = AgentMessage::AttributeValue {
            path: "Name".to_string(),
            node: NodeSnapshot::Leaf {
                value: Value::from("ABC"),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: AgentMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }
}
