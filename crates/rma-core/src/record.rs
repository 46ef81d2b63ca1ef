//! Table-driven managed object.
//!
//! `ManagedRecord` is a name → attribute table built at startup, for host
//! applications that do not implement [`ManagedObject`] by hand.

use std::sync::{PoisonError, RwLock};

use crate::error::{ResolveError, ResolveResult};
use crate::node::{AttributeInfo, AttributeKind, ManagedObject, Node};
use crate::value::{Value, ValueKind};

struct Field {
    info: AttributeInfo,
    node: Node,
}

/// A managed object backed by an ordered attribute table.
pub struct ManagedRecord {
    type_name: String,
    fields: RwLock<Vec<Field>>,
}

impl ManagedRecord {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: RwLock::new(Vec::new()),
        }
    }

    /// Defines (or redefines) an attribute with an explicit declaration.
    pub fn define(&self, info: AttributeInfo, node: Node) {
        let mut fields = self.fields.write().unwrap_or_else(PoisonError::into_inner);
        match fields.iter_mut().find(|f| f.info.name == info.name) {
            Some(field) => *field = Field { info, node },
            None => fields.push(Field { info, node }),
        }
    }

    /// Defines a read-only scalar whose kind is taken from the value.
    pub fn define_scalar(&self, name: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        self.define(AttributeInfo::scalar(name, value.kind()), Node::Leaf(value));
    }

    /// Defines a writable scalar of the given kind.
    ///
    /// An initial value that does not convert to `kind` is stored as null.
    pub fn define_writable(&self, name: impl Into<String>, kind: ValueKind, initial: impl Into<Value>) {
        let value = initial.into().coerce(kind).unwrap_or(Value::Null);
        self.define(AttributeInfo::writable(name, kind), Node::Leaf(value));
    }

    /// Defines a read-only attribute exposing a nested object or container.
    pub fn define_node(&self, name: impl Into<String>, node: Node) {
        let kind = match &node {
            Node::Leaf(v) => AttributeKind::Scalar(v.kind()),
            Node::Absent | Node::Object(_) => AttributeKind::Composite,
            Node::Map(_) => AttributeKind::Map,
            Node::Sequence(_) => AttributeKind::Sequence,
            Node::Array(_) => AttributeKind::Array,
        };
        self.define(AttributeInfo::read_only(name, kind), node);
    }

    pub fn with_scalar(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.define_scalar(name, value);
        self
    }

    pub fn with_writable(
        self,
        name: impl Into<String>,
        kind: ValueKind,
        initial: impl Into<Value>,
    ) -> Self {
        self.define_writable(name, kind, initial);
        self
    }

    pub fn with_node(self, name: impl Into<String>, node: Node) -> Self {
        self.define_node(name, node);
        self
    }

    /// Returns the current leaf value of an attribute.
    pub fn value(&self, name: &str) -> Option<Value> {
        self.get(name).and_then(|n| n.as_leaf().cloned())
    }
}

impl ManagedObject for ManagedRecord {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn attributes(&self) -> Vec<AttributeInfo> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|f| f.info.clone())
            .collect()
    }

    fn get(&self, name: &str) -> Option<Node> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|f| f.info.name == name)
            .map(|f| f.node.clone())
    }

    fn set(&self, name: &str, value: Value) -> ResolveResult<()> {
        let mut fields = self.fields.write().unwrap_or_else(PoisonError::into_inner);
        let field = fields
            .iter_mut()
            .find(|f| f.info.name == name && f.info.writable)
            .ok_or_else(|| ResolveError::no_such_attribute(name))?;

        field.node = match field.info.kind {
            AttributeKind::Scalar(kind) => Node::Leaf(value.coerce(kind)?),
            _ => Node::Leaf(value),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_keep_declaration_order() {
        let record = ManagedRecord::new("App")
            .with_scalar("Name", "ABC")
            .with_scalar("Instance", "Backup")
            .with_writable("Limit", ValueKind::Int, 3);

        let names: Vec<_> = record.attributes().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Name", "Instance", "Limit"]);
    }

    #[test]
    fn test_set_respects_writable_flag() {
        let record = ManagedRecord::new("App")
            .with_scalar("Name", "ABC")
            .with_writable("Limit", ValueKind::Int, 3);

        assert!(record.set("Name", Value::from("X")).is_err());
        record.set("Limit", Value::from("7")).unwrap();
        assert_eq!(record.value("Limit"), Some(Value::Int(7)));
    }

    #[test]
    fn test_redefine_replaces_attribute() {
        let record = ManagedRecord::new("App").with_scalar("Name", "ABC");
        record.define_scalar("Name", "DEF");
        assert_eq!(record.attributes().len(), 1);
        assert_eq!(record.value("Name"), Some(Value::from("DEF")));
    }

    #[test]
    fn test_unconvertible_initial_value_is_null() {
        let record = ManagedRecord::new("App").with_writable("Limit", ValueKind::Int, "lots");
        assert_eq!(record.value("Limit"), Some(Value::Null));
    }
}
