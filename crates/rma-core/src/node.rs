//! Object-graph nodes and the capability trait implemented by exposed objects.
//!
//! A live graph is made of [`ManagedObject`]s (named readable/writable
//! attributes) and three container shapes: text-keyed maps, growable
//! sequences and fixed-length arrays. Containers hold [`Node`]s behind
//! interior locks so the host application and remote callers can share them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, ResolveResult};
use crate::notify::NotificationSink;
use crate::value::{Value, ValueKind};

/// Depth used when rendering nodes for the wire.
pub const DEFAULT_SNAPSHOT_DEPTH: usize = 4;

// ============================================================================
// Capability Trait
// ============================================================================

/// Shape of an attribute as declared by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Leaf value of the given kind
    Scalar(ValueKind),
    /// Nested managed object
    Composite,
    /// Text-keyed container
    Map,
    /// Growable ordered container
    Sequence,
    /// Fixed-length positional container
    Array,
}

/// Declaration of one attribute of a managed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: String,
    pub kind: AttributeKind,
    pub writable: bool,
}

impl AttributeInfo {
    /// Declares a read-only attribute.
    pub fn read_only(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            writable: false,
        }
    }

    /// Declares a writable scalar attribute.
    pub fn writable(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Scalar(kind),
            writable: true,
        }
    }

    /// Declares a read-only scalar attribute.
    pub fn scalar(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::read_only(name, AttributeKind::Scalar(kind))
    }
}

/// An object whose attributes can be inspected and mutated remotely.
///
/// Implementors map attribute names (case-preserving, e.g. `Requests`) to
/// accessors. Mutation goes through `&self`, so implementors keep their
/// state behind interior locks or atomics.
pub trait ManagedObject: Send + Sync {
    /// Human-readable type name reported to consoles.
    fn type_name(&self) -> &str;

    /// All attributes this object exposes.
    fn attributes(&self) -> Vec<AttributeInfo>;

    /// Zero-argument accessor. `None` means no such attribute.
    fn get(&self, name: &str) -> Option<Node>;

    /// Single-argument mutator. The value is already coerced to the
    /// declared kind of the attribute.
    fn set(&self, name: &str, value: Value) -> ResolveResult<()> {
        let _ = value;
        Err(ResolveError::no_such_attribute(name))
    }

    /// Looks up the declaration of a single attribute.
    fn attribute(&self, name: &str) -> Option<AttributeInfo> {
        self.attributes().into_iter().find(|a| a.name == name)
    }

    /// Called once when the object is exposed, handing it the channel it
    /// can use to announce its own attribute changes.
    fn attach_notifier(&self, sink: Arc<dyn NotificationSink>) {
        let _ = sink;
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// A position in the object graph.
#[derive(Clone, Default)]
pub enum Node {
    /// Nothing is reachable here
    #[default]
    Absent,
    Leaf(Value),
    Object(Arc<dyn ManagedObject>),
    Map(Arc<ManagedMap>),
    Sequence(Arc<ManagedList>),
    Array(Arc<ManagedArray>),
}

impl Node {
    /// Wraps a managed object.
    pub fn object<T: ManagedObject + 'static>(object: Arc<T>) -> Self {
        Self::Object(object)
    }

    /// Wraps a map container.
    pub fn map(map: Arc<ManagedMap>) -> Self {
        Self::Map(map)
    }

    /// Wraps a sequence container.
    pub fn sequence(list: Arc<ManagedList>) -> Self {
        Self::Sequence(list)
    }

    /// Wraps an array container.
    pub fn array(array: Arc<ManagedArray>) -> Self {
        Self::Array(array)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent | Self::Leaf(Value::Null))
    }

    /// Returns the leaf value, if this node is a leaf.
    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            Self::Leaf(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the managed object, if this node is one.
    pub fn as_object(&self) -> Option<&Arc<dyn ManagedObject>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Short label describing the node's type (used in notifications).
    pub fn type_label(&self) -> String {
        match self {
            Self::Absent => "absent".to_string(),
            Self::Leaf(v) => v.kind().to_string(),
            Self::Object(o) => o.type_name().to_string(),
            Self::Map(_) => "map".to_string(),
            Self::Sequence(_) => "sequence".to_string(),
            Self::Array(_) => "array".to_string(),
        }
    }

    /// Renders the node into a serialisable snapshot, descending at most
    /// `depth` levels into composites and containers.
    pub fn snapshot(&self, depth: usize) -> NodeSnapshot {
        match self {
            Self::Absent => NodeSnapshot::Absent,
            Self::Leaf(v) => NodeSnapshot::Leaf { value: v.clone() },
            _ if depth == 0 => NodeSnapshot::Truncated,
            Self::Object(o) => NodeSnapshot::Object {
                type_name: o.type_name().to_string(),
                attributes: o
                    .attributes()
                    .into_iter()
                    .map(|a| {
                        let child = o.get(&a.name).unwrap_or_default();
                        (a.name, child.snapshot(depth - 1))
                    })
                    .collect(),
            },
            Self::Map(m) => NodeSnapshot::Map {
                entries: m
                    .entries()
                    .into_iter()
                    .map(|(k, n)| (k, n.snapshot(depth - 1)))
                    .collect(),
            },
            Self::Sequence(l) => NodeSnapshot::Sequence {
                items: l.items().iter().map(|n| n.snapshot(depth - 1)).collect(),
            },
            Self::Array(a) => NodeSnapshot::Array {
                items: a.items().iter().map(|n| n.snapshot(depth - 1)).collect(),
            },
        }
    }
}

impl From<Value> for Node {
    fn from(v: Value) -> Self {
        Self::Leaf(v)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("Absent"),
            Self::Leaf(v) => f.debug_tuple("Leaf").field(v).finish(),
            Self::Object(o) => f.debug_tuple("Object").field(&o.type_name()).finish(),
            Self::Map(m) => f.debug_tuple("Map").field(&m.len()).finish(),
            Self::Sequence(l) => f.debug_tuple("Sequence").field(&l.len()).finish(),
            Self::Array(a) => f.debug_tuple("Array").field(&a.len()).finish(),
        }
    }
}

/// Serialisable rendering of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum NodeSnapshot {
    Absent,
    Leaf {
        value: Value,
    },
    Object {
        type_name: String,
        attributes: BTreeMap<String, NodeSnapshot>,
    },
    Map {
        entries: BTreeMap<String, NodeSnapshot>,
    },
    Sequence {
        items: Vec<NodeSnapshot>,
    },
    Array {
        items: Vec<NodeSnapshot>,
    },
    /// Depth limit reached
    Truncated,
}

impl NodeSnapshot {
    /// Returns the leaf value, if this snapshot is a leaf.
    pub fn leaf(&self) -> Option<&Value> {
        match self {
            Self::Leaf { value } => Some(value),
            _ => None,
        }
    }
}

// ============================================================================
// Containers
// ============================================================================

fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Map-like container keyed by text.
#[derive(Default)]
pub struct ManagedMap {
    entries: RwLock<BTreeMap<String, Node>>,
}

impl ManagedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the node under `key`, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, node: impl Into<Node>) -> Option<Node> {
        write_guard(&self.entries).insert(key.into(), node.into())
    }

    pub fn get(&self, key: &str) -> Option<Node> {
        read_guard(&self.entries).get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Node> {
        write_guard(&self.entries).remove(key)
    }

    pub fn len(&self) -> usize {
        read_guard(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        read_guard(&self.entries).keys().cloned().collect()
    }

    /// Snapshot of all entries in key order.
    pub fn entries(&self) -> Vec<(String, Node)> {
        read_guard(&self.entries)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Ordered, growable sequence.
#[derive(Default)]
pub struct ManagedList {
    items: RwLock<Vec<Node>>,
}

impl ManagedList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(items: Vec<Node>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    pub fn push(&self, node: impl Into<Node>) {
        write_guard(&self.items).push(node.into());
    }

    pub fn get(&self, index: usize) -> Option<Node> {
        read_guard(&self.items).get(index).cloned()
    }

    /// Replaces an already-populated element, returning the previous one.
    pub fn replace(&self, index: usize, node: impl Into<Node>) -> ResolveResult<Node> {
        let mut items = write_guard(&self.items);
        let len = items.len();
        match items.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, node.into())),
            None => Err(ResolveError::IndexOutOfRange { index, len }),
        }
    }

    /// Removes every element matching the predicate.
    pub fn retain(&self, keep: impl FnMut(&Node) -> bool) {
        write_guard(&self.items).retain(keep);
    }

    pub fn len(&self) -> usize {
        read_guard(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> Vec<Node> {
        read_guard(&self.items).clone()
    }
}

/// Fixed-length positional container.
pub struct ManagedArray {
    slots: RwLock<Box<[Node]>>,
}

impl ManagedArray {
    /// Creates an array of `len` absent slots.
    pub fn with_len(len: usize) -> Self {
        Self::from_nodes(vec![Node::Absent; len])
    }

    pub fn from_nodes(items: Vec<Node>) -> Self {
        Self {
            slots: RwLock::new(items.into_boxed_slice()),
        }
    }

    pub fn get(&self, index: usize) -> Option<Node> {
        read_guard(&self.slots).get(index).cloned()
    }

    /// Replaces the slot at `index`, which must be within the fixed bounds.
    pub fn replace(&self, index: usize, node: impl Into<Node>) -> ResolveResult<Node> {
        let mut slots = write_guard(&self.slots);
        let len = slots.len();
        match slots.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, node.into())),
            None => Err(ResolveError::IndexOutOfRange { index, len }),
        }
    }

    pub fn len(&self) -> usize {
        read_guard(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> Vec<Node> {
        read_guard(&self.slots).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ManagedRecord;

    #[test]
    fn test_map_insert_replace() {
        let map = ManagedMap::new();
        assert!(map.insert("a", Value::Int(1)).is_none());
        let previous = map.insert("a", Value::Int(2));
        assert_eq!(previous.and_then(|n| n.as_leaf().cloned()), Some(Value::Int(1)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.keys(), vec!["a".to_string()]);
    }

    #[test]
    fn test_list_replace_requires_populated_index() {
        let list = ManagedList::new();
        list.push(Value::from("x"));

        assert!(list.replace(0, Value::from("y")).is_ok());
        let err = list.replace(1, Value::from("z")).unwrap_err();
        assert_eq!(err, ResolveError::IndexOutOfRange { index: 1, len: 1 });
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_array_has_fixed_bounds() {
        let array = ManagedArray::with_len(2);
        assert_eq!(array.len(), 2);
        assert!(array.get(1).is_some_and(|n| n.is_absent()));
        assert!(array.replace(1, Value::Long(9)).is_ok());
        assert!(array.replace(2, Value::Long(9)).is_err());
    }

    #[test]
    fn test_snapshot_of_composite() {
        let record = ManagedRecord::new("Request");
        record.define_scalar("Type", Value::from("R1"));
        let node = Node::object(Arc::new(record));

        match node.snapshot(DEFAULT_SNAPSHOT_DEPTH) {
            NodeSnapshot::Object {
                type_name,
                attributes,
            } => {
                assert_eq!(type_name, "Request");
                assert_eq!(
                    attributes.get("Type").and_then(|s| s.leaf()),
                    Some(&Value::from("R1"))
                );
            }
            other => panic!("expected object snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_depth_limit() {
        let map = Arc::new(ManagedMap::new());
        map.insert("k", Value::Int(1));
        assert_eq!(Node::map(map).snapshot(0), NodeSnapshot::Truncated);
    }

    #[test]
    fn test_snapshot_wire_format() {
        let snap = Node::from(Value::Int(4)).snapshot(1);
        let json = serde_json::to_string(&snap).unwrap();
        assert_eq!(json, r#"{"shape":"leaf","value":{"type":"int","value":4}}"#);
    }
}
