//! Component metadata captured at registration.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::identity::ComponentIdentity;
use crate::node::{AttributeInfo, ManagedObject, Node};
use crate::value::{Value, ValueKind};

/// Name, instance, shared-key flag and every text attribute the root
/// exposed when the component registered.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    name: String,
    instance: String,
    shared: bool,
    details: BTreeMap<String, String>,
}

impl ComponentInfo {
    /// Captures the text attributes of `root` alongside the identity.
    pub fn capture(identity: &ComponentIdentity, root: &Arc<dyn ManagedObject>) -> Self {
        let details = root
            .attributes()
            .into_iter()
            .filter(|a| a.name != "Name" && a.name != "Instance" && a.name != "Shared")
            .filter_map(|a| {
                let node = root.get(&a.name)?;
                let text = node.as_leaf()?.as_text()?.to_string();
                Some((a.name, text))
            })
            .collect();

        Self {
            name: identity.name().to_string(),
            instance: identity.instance().to_string(),
            shared: identity.shared_key().is_some(),
            details,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

impl ManagedObject for ComponentInfo {
    fn type_name(&self) -> &str {
        "ComponentInfo"
    }

    fn attributes(&self) -> Vec<AttributeInfo> {
        let mut attrs = vec![
            AttributeInfo::scalar("Name", ValueKind::Text),
            AttributeInfo::scalar("Instance", ValueKind::Text),
            AttributeInfo::scalar("Shared", ValueKind::Bool),
        ];
        attrs.extend(
            self.details
                .keys()
                .map(|k| AttributeInfo::scalar(k.clone(), ValueKind::Text)),
        );
        attrs
    }

    fn get(&self, name: &str) -> Option<Node> {
        let value = match name {
            "Name" => Value::from(self.name.as_str()),
            "Instance" => Value::from(self.instance.as_str()),
            "Shared" => Value::Bool(self.shared),
            other => Value::from(self.details.get(other)?.as_str()),
        };
        Some(Node::Leaf(value))
    }
}
