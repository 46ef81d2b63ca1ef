//! The `Agent` object bound for every registered component.

use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rma_core::{AttributeInfo, ManagedObject, Node, Value, ValueKind};

use crate::config::AgentConfig;
use crate::relay::NotificationRelay;

/// Agent-level facts: ports, start time, version, host and the last
/// notification sequence number.
pub struct AgentInfo {
    agent_port: u16,
    configured_port: u16,
    host_address: String,
    host_name: String,
    started_at: DateTime<Utc>,
    endpoint: Mutex<Option<SocketAddr>>,
    relay: NotificationRelay,
}

impl AgentInfo {
    pub fn new(config: &AgentConfig, relay: NotificationRelay) -> Self {
        Self {
            agent_port: config.agent_port,
            configured_port: config.exported_port,
            host_address: config.host.clone(),
            host_name: host_name(),
            started_at: Utc::now(),
            endpoint: Mutex::new(None),
            relay,
        }
    }

    /// Records where the connector ended up listening.
    pub fn set_endpoint(&self, endpoint: Option<SocketAddr>) {
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner) = endpoint;
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl ManagedObject for AgentInfo {
    fn type_name(&self) -> &str {
        "Agent"
    }

    fn attributes(&self) -> Vec<AttributeInfo> {
        vec![
            AttributeInfo::scalar("AgentPort", ValueKind::Int),
            AttributeInfo::scalar("ExportedPort", ValueKind::Int),
            AttributeInfo::scalar("EndpointAddress", ValueKind::Text),
            AttributeInfo::scalar("StartTime", ValueKind::Timestamp),
            AttributeInfo::scalar("Version", ValueKind::Text),
            AttributeInfo::scalar("HostName", ValueKind::Text),
            AttributeInfo::scalar("HostAddress", ValueKind::Text),
            AttributeInfo::scalar("LastSequence", ValueKind::Long),
        ]
    }

    fn get(&self, name: &str) -> Option<Node> {
        let value = match name {
            "AgentPort" => Value::Int(i32::from(self.agent_port)),
            "ExportedPort" => {
                let port = self.endpoint().map_or(self.configured_port, |a| a.port());
                Value::Int(i32::from(port))
            }
            "EndpointAddress" => self
                .endpoint()
                .map_or(Value::Null, |a| Value::Text(a.to_string())),
            "StartTime" => Value::Timestamp(self.started_at),
            "Version" => Value::Text(env!("CARGO_PKG_VERSION").to_string()),
            "HostName" => Value::Text(self.host_name.clone()),
            "HostAddress" => Value::Text(self.host_address.clone()),
            "LastSequence" => match self.relay.next_sequence().checked_sub(1) {
                Some(last) => Value::Long(i64::try_from(last).unwrap_or(i64::MAX)),
                None => Value::Null,
            },
            _ => return None,
        };
        Some(Node::Leaf(value))
    }
}
