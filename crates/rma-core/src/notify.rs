//! Notification payloads and the sink seam used by exposed objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One event delivered to subscribed consoles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Monotonically increasing per relay, starting at 0
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub payload: NotificationPayload,
}

/// Event-specific part of a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationPayload {
    AttributeChange {
        attribute_name: String,
        attribute_type: String,
        old_value: Value,
        new_value: Value,
    },
    Alert {
        source: String,
        severity: String,
    },
}

impl Notification {
    /// Returns the changed attribute name for attribute-change events.
    pub fn attribute_name(&self) -> Option<&str> {
        match &self.payload {
            NotificationPayload::AttributeChange { attribute_name, .. } => Some(attribute_name),
            NotificationPayload::Alert { .. } => None,
        }
    }
}

/// Destination for notifications raised by the exposed graph.
///
/// Implementations assign the sequence number; callers only describe the
/// event.
pub trait NotificationSink: Send + Sync {
    /// Announces an attribute change and returns the sequence number used.
    fn attribute_changed(
        &self,
        message: &str,
        attribute_name: &str,
        attribute_type: &str,
        old_value: Value,
        new_value: Value,
    ) -> u64;

    /// Raises a free-form alert and returns the sequence number used.
    fn alert(&self, source: &str, severity: &str, message: &str) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_format() {
        let n = Notification {
            sequence: 0,
            timestamp: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            message: "Port changed".to_string(),
            payload: NotificationPayload::AttributeChange {
                attribute_name: "Port".to_string(),
                attribute_type: "int".to_string(),
                old_value: Value::Int(1),
                new_value: Value::Int(2),
            },
        };

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["payload"]["kind"], "attribute_change");
        assert_eq!(json["payload"]["attribute_name"], "Port");
        assert_eq!(n.attribute_name(), Some("Port"));

        let parsed: Notification = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, n);
    }
}
