//! Notification fan-out for one session.
//!
//! The relay stamps every event with the next sequence number and hands it
//! to a broadcast channel; connectors forward it to subscribed consoles.
//! Numbering and sending happen under one lock, so subscribers observe
//! events in sequence order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rma_core::{
    AttributeInfo, ManagedObject, Node, Notification, NotificationPayload, NotificationSink,
    Value, ValueKind,
};
use tokio::sync::broadcast;
use tracing::trace;

struct RelayInner {
    sender: broadcast::Sender<Notification>,
    next_sequence: Mutex<u64>,
    sent: AtomicU64,
}

/// Cloneable handle to a session's notification channel.
#[derive(Clone)]
pub struct NotificationRelay {
    inner: Arc<RelayInner>,
}

impl NotificationRelay {
    /// Creates a relay buffering up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(RelayInner {
                sender,
                next_sequence: Mutex::new(0),
                sent: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Number of events published so far.
    pub fn sent(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    /// Sequence number the next event will carry.
    pub fn next_sequence(&self) -> u64 {
        *self
            .inner
            .next_sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes an event and returns its sequence number.
    pub fn publish(&self, message: &str, payload: NotificationPayload) -> u64 {
        let mut next = self
            .inner
            .next_sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let sequence = *next;
        *next = next.wrapping_add(1);

        let notification = Notification {
            sequence,
            timestamp: Utc::now(),
            message: message.to_string(),
            payload,
        };

        // No subscribers is not an error
        let delivered = self.inner.sender.send(notification).unwrap_or(0);
        self.inner.sent.fetch_add(1, Ordering::Relaxed);
        trace!(sequence, delivered, "Published notification");
        sequence
    }

    /// Returns true if both handles refer to the same channel.
    pub fn same_channel(&self, other: &NotificationRelay) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl NotificationSink for NotificationRelay {
    fn attribute_changed(
        &self,
        message: &str,
        attribute_name: &str,
        attribute_type: &str,
        old_value: Value,
        new_value: Value,
    ) -> u64 {
        self.publish(
            message,
            NotificationPayload::AttributeChange {
                attribute_name: attribute_name.to_string(),
                attribute_type: attribute_type.to_string(),
                old_value,
                new_value,
            },
        )
    }

    fn alert(&self, source: &str, severity: &str, message: &str) -> u64 {
        self.publish(
            message,
            NotificationPayload::Alert {
                source: source.to_string(),
                severity: severity.to_string(),
            },
        )
    }
}

impl ManagedObject for NotificationRelay {
    fn type_name(&self) -> &str {
        "Notifications"
    }

    fn attributes(&self) -> Vec<AttributeInfo> {
        vec![
            AttributeInfo::scalar("SentCount", ValueKind::Long),
            AttributeInfo::scalar("SubscriberCount", ValueKind::Int),
            AttributeInfo::scalar("NextSequence", ValueKind::Long),
        ]
    }

    fn get(&self, name: &str) -> Option<Node> {
        let long = |v: u64| Value::Long(i64::try_from(v).unwrap_or(i64::MAX));
        let value = match name {
            "SentCount" => long(self.sent()),
            "SubscriberCount" => {
                Value::Int(i32::try_from(self.subscriber_count()).unwrap_or(i32::MAX))
            }
            "NextSequence" => long(self.next_sequence()),
            _ => return None,
        };
        Some(Node::Leaf(value))
    }
}
