//! Service and connection statistics holders.
//!
//! Each holder is a sequence of per-(interface, api) counters. Host code
//! brackets every transaction with `transaction_started` and
//! `transaction_finished`; consoles read the counters through the graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::node::{AttributeInfo, ManagedList, ManagedObject, Node};
use crate::value::{Value, ValueKind};

/// Counters for one (interface, api) pair.
pub struct TransactionCounter {
    interface_name: String,
    api_name: String,
    total: AtomicU64,
    failed: AtomicU64,
    last: Mutex<LastSeen>,
}

#[derive(Default)]
struct LastSeen {
    failure_description: Option<String>,
    failure_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
}

impl TransactionCounter {
    fn new(interface_name: &str, api_name: &str) -> Self {
        Self {
            interface_name: interface_name.to_string(),
            api_name: api_name.to_string(),
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last: Mutex::new(LastSeen::default()),
        }
    }

    fn matches(&self, interface_name: &str, api_name: &str) -> bool {
        self.interface_name == interface_name && self.api_name == api_name
    }

    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn started(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .start_time = Some(Utc::now());
    }

    fn finished(&self, failed: bool, description: Option<&str>) {
        if !failed {
            return;
        }
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.failure_description = description.map(str::to_string);
        last.failure_time = Some(Utc::now());
    }
}

/// Counters exposed as attributes: `InterfaceName`, `ApiName`,
/// `TotalRequestCount`, `FailedRequestCount`, `LastFailedRequestDescription`,
/// `LastFailedRequestTime`, `LastTransactionStartTime`.
impl ManagedObject for TransactionCounter {
    fn type_name(&self) -> &str {
        "TransactionCounter"
    }

    fn attributes(&self) -> Vec<AttributeInfo> {
        vec![
            AttributeInfo::scalar("InterfaceName", ValueKind::Text),
            AttributeInfo::scalar("ApiName", ValueKind::Text),
            AttributeInfo::scalar("TotalRequestCount", ValueKind::Long),
            AttributeInfo::scalar("FailedRequestCount", ValueKind::Long),
            AttributeInfo::scalar("LastFailedRequestDescription", ValueKind::Text),
            AttributeInfo::scalar("LastFailedRequestTime", ValueKind::Timestamp),
            AttributeInfo::scalar("LastTransactionStartTime", ValueKind::Timestamp),
        ]
    }

    fn get(&self, name: &str) -> Option<Node> {
        let count = |c: &AtomicU64| Value::Long(i64::try_from(c.load(Ordering::Relaxed)).unwrap_or(i64::MAX));
        let value = match name {
            "InterfaceName" => Value::from(self.interface_name.as_str()),
            "ApiName" => Value::from(self.api_name.as_str()),
            "TotalRequestCount" => count(&self.total),
            "FailedRequestCount" => count(&self.failed),
            _ => {
                let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
                match name {
                    "LastFailedRequestDescription" => Value::from(last.failure_description.clone()),
                    "LastFailedRequestTime" => Value::from(last.failure_time),
                    "LastTransactionStartTime" => Value::from(last.start_time),
                    _ => return None,
                }
            }
        };
        Some(Node::Leaf(value))
    }
}

/// A named collection of transaction counters.
pub struct TransactionStats {
    type_name: String,
    counters: Arc<ManagedList>,
    index: Mutex<Vec<Arc<TransactionCounter>>>,
}

impl TransactionStats {
    /// Creates an empty holder; `type_name` distinguishes services from
    /// connections.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            counters: Arc::new(ManagedList::new()),
            index: Mutex::new(Vec::new()),
        }
    }

    /// Returns the counter for the pair, creating it on first use.
    pub fn counter(&self, interface_name: &str, api_name: &str) -> Arc<TransactionCounter> {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = index.iter().find(|c| c.matches(interface_name, api_name)) {
            return Arc::clone(existing);
        }

        let counter = Arc::new(TransactionCounter::new(interface_name, api_name));
        index.push(Arc::clone(&counter));
        self.counters.push(Node::object(Arc::clone(&counter)));
        counter
    }

    pub fn transaction_started(&self, interface_name: &str, api_name: &str) {
        self.counter(interface_name, api_name).started();
    }

    pub fn transaction_finished(
        &self,
        interface_name: &str,
        api_name: &str,
        failed: bool,
        description: Option<&str>,
    ) {
        self.counter(interface_name, api_name)
            .finished(failed, description);
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ManagedObject for TransactionStats {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn attributes(&self) -> Vec<AttributeInfo> {
        vec![
            AttributeInfo::read_only("Counters", crate::node::AttributeKind::Sequence),
            AttributeInfo::scalar("CounterCount", ValueKind::Int),
        ]
    }

    fn get(&self, name: &str) -> Option<Node> {
        match name {
            "Counters" => Some(Node::sequence(Arc::clone(&self.counters))),
            "CounterCount" => Some(Node::Leaf(Value::Int(
                i32::try_from(self.len()).unwrap_or(i32::MAX),
            ))),
            _ => None,
        }
    }
}
