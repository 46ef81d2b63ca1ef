//! What a connector serves: the bound objects of one registered session.
//!
//! The context is built once per registration and shared by every
//! connector the session starts (including watchdog replacements).
//! Resolution never touches session state; writes announce themselves on
//! the session's notification relay. Console writes are serialized per
//! context so each announced old/new pair belongs to one write; changes the
//! host makes directly on its objects are not covered by that ordering.

use std::sync::Arc;

use rma_core::{
    resolve, Access, AttributeInfo, AttributePath, ManagedObject, Node, Notification,
    NotificationSink, ResolveError, Resolution, TransactionStats, Value,
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::objects::ObjectTable;
use crate::relay::NotificationRelay;

/// Interface name under which console requests are counted.
pub const CONSOLE_INTERFACE: &str = "console";

/// Failures of a console request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EndpointError {
    #[error("unknown object: {0}")]
    UnknownObject(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl EndpointError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownObject(_) => "unknown_object",
            Self::Resolve(e) => e.code(),
        }
    }
}

/// Request surface of one registered session.
pub struct EndpointContext {
    component: String,
    application: String,
    names: Vec<String>,
    objects: ObjectTable,
    relay: NotificationRelay,
    connections: Arc<TransactionStats>,
    write_lock: Mutex<()>,
}

impl EndpointContext {
    /// `application` is the default object; `names` limits what consoles
    /// may address.
    pub fn new(
        component: String,
        application: String,
        names: Vec<String>,
        objects: ObjectTable,
        relay: NotificationRelay,
        connections: Arc<TransactionStats>,
    ) -> Self {
        Self {
            component,
            application,
            names,
            objects,
            relay,
            connections,
            write_lock: Mutex::new(()),
        }
    }

    /// `name/instance` of the exposed component.
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn object_names(&self) -> Vec<String> {
        self.names.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.relay.subscribe()
    }

    async fn object(&self, name: Option<&str>) -> Result<Arc<dyn ManagedObject>, EndpointError> {
        let name = name.unwrap_or(&self.application);
        if !self.names.iter().any(|n| n == name) {
            return Err(EndpointError::UnknownObject(name.to_string()));
        }
        self.objects
            .get(name)
            .await
            .ok_or_else(|| EndpointError::UnknownObject(name.to_string()))
    }

    /// Counts one console operation in the session's connection statistics.
    fn track<T>(&self, api: &str, result: &Result<T, EndpointError>) {
        self.connections.transaction_started(CONSOLE_INTERFACE, api);
        let failure = result.as_ref().err().map(ToString::to_string);
        self.connections.transaction_finished(
            CONSOLE_INTERFACE,
            api,
            failure.is_some(),
            failure.as_deref(),
        );
    }

    /// Reads `path` on `object` (the application root when `None`).
    pub async fn read(&self, object: Option<&str>, path: &str) -> Result<Resolution, EndpointError> {
        let result = self.read_untracked(object, path).await;
        self.track("get_attribute", &result);
        result
    }

    async fn read_untracked(
        &self,
        object: Option<&str>,
        path: &str,
    ) -> Result<Resolution, EndpointError> {
        let root = self.object(object).await?;
        Ok(resolve(&root, &AttributePath::parse(path), Access::Read)?)
    }

    /// Writes `value` at `path` and announces the change.
    ///
    /// The notification carries the leaf value before the write and the
    /// value read back afterwards (i.e. after coercion).
    pub async fn write(
        &self,
        object: Option<&str>,
        path: &str,
        value: Value,
    ) -> Result<Resolution, EndpointError> {
        let result = self.write_untracked(object, path, value).await;
        self.track("set_attribute", &result);
        result
    }

    async fn write_untracked(
        &self,
        object: Option<&str>,
        path: &str,
        value: Value,
    ) -> Result<Resolution, EndpointError> {
        let root = self.object(object).await?;
        let path = AttributePath::parse(path);

        let _serialized = self.write_lock.lock().await;
        let before = leaf_of(resolve(&root, &path, Access::Read));
        let outcome = resolve(&root, &path, Access::Write(value))?;

        if matches!(outcome, Resolution::Written) {
            let after = leaf_of(resolve(&root, &path, Access::Read));
            let attribute_type = after.kind().to_string();
            let sequence = self.relay.attribute_changed(
                &format!("Attribute '{path}' changed"),
                &path.to_string(),
                &attribute_type,
                before,
                after,
            );
            debug!(component = %self.component, path = %path, sequence, "Attribute written");
        }

        Ok(outcome)
    }

    /// Type name and attribute declarations of a bound object.
    pub async fn describe(
        &self,
        object: &str,
    ) -> Result<(String, Vec<AttributeInfo>), EndpointError> {
        let result = self
            .object(Some(object))
            .await
            .map(|o| (o.type_name().to_string(), o.attributes()));
        self.track("describe_object", &result);
        result
    }
}

fn leaf_of(result: Result<Resolution, ResolveError>) -> Value {
    match result {
        Ok(Resolution::Value(Node::Leaf(v))) => v,
        _ => Value::Null,
    }
}
