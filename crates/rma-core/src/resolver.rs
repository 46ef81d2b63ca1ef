//! Attribute-path resolution against a live object graph.
//!
//! Every segment but the last is an intermediate hop resolved in read mode.
//! A hop that lands on nothing stops resolution with
//! [`Resolution::NotFound`] instead of an error, so callers can tell a
//! missing branch apart from a malformed request.
//!
//! # Panic-Free Guarantees
//!
//! Indices are parsed with `str::parse` and containers are accessed through
//! bounds-checked getters; no direct indexing is performed.

use std::sync::Arc;

use tracing::trace;

use crate::error::{ResolveError, ResolveResult};
use crate::node::{AttributeKind, ManagedObject, Node};
use crate::path::{AttributePath, Segment};
use crate::value::{Value, ValueKind};

/// What to do with the final segment.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Read,
    Write(Value),
}

/// Outcome of a resolution that did not fail.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Read result (may be `Node::Absent` for an empty leaf or missing map key)
    Value(Node),
    /// Write applied
    Written,
    /// An intermediate hop resolved to nothing
    NotFound { segment: String },
    /// Final segment indexes something that is not a container; nothing
    /// was read or written
    Skipped,
}

impl Resolution {
    /// Turns the `NotFound` sentinel into a `ResolveError::NotFound`.
    pub fn into_result(self) -> ResolveResult<Self> {
        match self {
            Self::NotFound { segment } => Err(ResolveError::NotFound { segment }),
            other => Ok(other),
        }
    }

    /// Returns the node read, if this is a read result.
    pub fn into_node(self) -> Option<Node> {
        match self {
            Self::Value(node) => Some(node),
            _ => None,
        }
    }

    /// Convenience accessor for the leaf value of a read result.
    pub fn leaf(&self) -> Option<&Value> {
        match self {
            Self::Value(node) => node.as_leaf(),
            _ => None,
        }
    }
}

/// Reads the node addressed by `path`.
pub fn read(root: &Arc<dyn ManagedObject>, path: &str) -> ResolveResult<Resolution> {
    resolve(root, &AttributePath::parse(path), Access::Read)
}

/// Writes `value` at the leaf addressed by `path`.
pub fn write(
    root: &Arc<dyn ManagedObject>,
    path: &str,
    value: impl Into<Value>,
) -> ResolveResult<Resolution> {
    resolve(root, &AttributePath::parse(path), Access::Write(value.into()))
}

/// Resolves `path` against `root`, reading or writing the final segment.
pub fn resolve(
    root: &Arc<dyn ManagedObject>,
    path: &AttributePath,
    access: Access,
) -> ResolveResult<Resolution> {
    let Some((last, hops)) = path.split_last() else {
        return Err(ResolveError::no_such_attribute(""));
    };

    let mut current = Node::Object(Arc::clone(root));
    for hop in hops {
        match step(&current, hop)? {
            Some(next) => current = next,
            None => {
                trace!(path = %path, segment = %hop, "Intermediate segment resolved to nothing");
                return Ok(Resolution::NotFound {
                    segment: hop.to_string(),
                });
            }
        }
    }

    match access {
        Access::Read => read_final(&current, last),
        Access::Write(value) => write_final(&current, last, value),
    }
}

// ============================================================================
// Intermediate hops
// ============================================================================

/// Resolves one intermediate hop. `None` means the hop landed on nothing.
fn step(current: &Node, segment: &Segment) -> ResolveResult<Option<Node>> {
    let next = match segment {
        Segment::Field(name) => accessor(current, name)?,
        Segment::Indexed { name, key } => match accessor(current, name)? {
            Node::Map(map) => map.get(key).unwrap_or_default(),
            Node::Sequence(list) => {
                let index = parse_index(key)?;
                list.get(index)
                    .ok_or(ResolveError::IndexOutOfRange {
                        index,
                        len: list.len(),
                    })?
            }
            Node::Array(array) => {
                let index = parse_index(key)?;
                array.get(index).ok_or(ResolveError::IndexOutOfRange {
                    index,
                    len: array.len(),
                })?
            }
            _ => Node::Absent,
        },
    };

    Ok((!next.is_absent()).then_some(next))
}

/// Invokes the zero-argument accessor `name` on the current node.
fn accessor(current: &Node, name: &str) -> ResolveResult<Node> {
    current
        .as_object()
        .and_then(|object| object.get(name))
        .ok_or_else(|| ResolveError::no_such_attribute(name))
}

fn parse_index(key: &str) -> ResolveResult<usize> {
    key.trim()
        .parse::<usize>()
        .map_err(|_| ResolveError::TypeMismatch {
            expected: "index".to_string(),
            found: format!("'{key}'"),
        })
}

// ============================================================================
// Final segment
// ============================================================================

fn read_final(current: &Node, segment: &Segment) -> ResolveResult<Resolution> {
    match segment {
        Segment::Field(name) => accessor(current, name).map(Resolution::Value),
        Segment::Indexed { name, key } => {
            let node = match accessor(current, name)? {
                Node::Map(map) => map.get(key).unwrap_or_default(),
                Node::Sequence(list) => {
                    let index = parse_index(key)?;
                    list.get(index).ok_or(ResolveError::IndexOutOfRange {
                        index,
                        len: list.len(),
                    })?
                }
                Node::Array(array) => {
                    let index = parse_index(key)?;
                    array.get(index).ok_or(ResolveError::IndexOutOfRange {
                        index,
                        len: array.len(),
                    })?
                }
                _ => return Ok(Resolution::Skipped),
            };
            Ok(Resolution::Value(node))
        }
    }
}

fn write_final(current: &Node, segment: &Segment, value: Value) -> ResolveResult<Resolution> {
    match segment {
        Segment::Field(name) => {
            let object = current
                .as_object()
                .ok_or_else(|| ResolveError::no_such_attribute(name))?;
            let info = object
                .attribute(name)
                .filter(|info| info.writable)
                .ok_or_else(|| ResolveError::no_such_attribute(name))?;

            let AttributeKind::Scalar(kind) = info.kind else {
                return Err(ResolveError::TypeMismatch {
                    expected: shape_name(info.kind).to_string(),
                    found: value.kind().to_string(),
                });
            };

            object.set(name, value.coerce(kind)?)?;
            Ok(Resolution::Written)
        }
        Segment::Indexed { name, key } => {
            match accessor(current, name)? {
                Node::Map(map) => {
                    let value = coerce_like(map.get(key).as_ref(), value)?;
                    map.insert(key.clone(), value);
                }
                Node::Sequence(list) => {
                    let index = parse_index(key)?;
                    let value = coerce_like(list.get(index).as_ref(), value)?;
                    list.replace(index, value)?;
                }
                Node::Array(array) => {
                    let index = parse_index(key)?;
                    let value = coerce_like(array.get(index).as_ref(), value)?;
                    array.replace(index, value)?;
                }
                _ => return Ok(Resolution::Skipped),
            }
            Ok(Resolution::Written)
        }
    }
}

/// Coerces a container element to the kind of the leaf it replaces.
fn coerce_like(existing: Option<&Node>, value: Value) -> ResolveResult<Value> {
    match existing.and_then(Node::as_leaf).map(Value::kind) {
        Some(kind) if kind != ValueKind::Null => value.coerce(kind),
        _ => Ok(value),
    }
}

fn shape_name(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::Scalar(kind) => kind.as_str(),
        AttributeKind::Composite => "composite",
        AttributeKind::Map => "map",
        AttributeKind::Sequence => "sequence",
        AttributeKind::Array => "array",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ManagedArray, ManagedList, ManagedMap};
    use crate::record::ManagedRecord;

    fn request(kind: &str) -> Node {
        Node::object(Arc::new(
            ManagedRecord::new("Request").with_writable("Type", ValueKind::Text, kind),
        ))
    }

    /// Name "ABC", instance "Backup", a map of requests keyed by number,
    /// a sequence of tags, a fixed array of slots and a nested settings
    /// composite.
    fn fixture() -> Arc<dyn ManagedObject> {
        let requests = Arc::new(ManagedMap::new());
        requests.insert("1", request("R1"));
        requests.insert("2", request("R2"));

        let tags = Arc::new(ManagedList::from_nodes(vec![
            Value::from("alpha").into(),
            Value::from("beta").into(),
        ]));
        let slots = Arc::new(ManagedArray::from_nodes(vec![
            Value::Long(10).into(),
            Value::Long(20).into(),
        ]));
        let settings = ManagedRecord::new("Settings")
            .with_writable("Port", ValueKind::Int, 3000)
            .with_writable("Owner", ValueKind::Text, None::<String>);

        let root = ManagedRecord::new("Application")
            .with_scalar("Name", "ABC")
            .with_scalar("Instance", "Backup")
            .with_writable("MaxSessions", ValueKind::Long, 5_i64)
            .with_node("Requests", Node::map(requests))
            .with_node("Tags", Node::sequence(tags))
            .with_node("Slots", Node::array(slots))
            .with_node("Settings", Node::object(Arc::new(settings)))
            .with_node("Missing", Node::Absent)
            .with_scalar("Version", "1.0");
        Arc::new(root)
    }

    #[test]
    fn test_map_entry_returns_composite() {
        let root = fixture();
        let node = read(&root, "Requests[2]").unwrap().into_node().unwrap();
        let object = node.as_object().unwrap();
        assert_eq!(object.type_name(), "Request");
        assert_eq!(
            object.get("Type").and_then(|n| n.as_leaf().cloned()),
            Some(Value::from("R2"))
        );
    }

    #[test]
    fn test_nested_field_through_map() {
        let root = fixture();
        let res = read(&root, "Requests[2]/Type").unwrap();
        assert_eq!(res.leaf(), Some(&Value::from("R2")));
    }

    #[test]
    fn test_read_after_write_on_scalar() {
        let root = fixture();
        assert!(matches!(
            write(&root, "Settings/Port", 8080).unwrap(),
            Resolution::Written
        ));
        let res = read(&root, "Settings/Port").unwrap();
        assert_eq!(res.leaf(), Some(&Value::Int(8080)));
    }

    #[test]
    fn test_write_coerces_text_to_declared_kind() {
        let root = fixture();
        write(&root, "MaxSessions", "12").unwrap();
        assert_eq!(
            read(&root, "MaxSessions").unwrap().leaf(),
            Some(&Value::Long(12))
        );

        let err = write(&root, "MaxSessions", "twelve").unwrap_err();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }

    #[test]
    fn test_write_to_read_only_field_is_no_such_attribute() {
        let root = fixture();
        let err = write(&root, "Name", "XYZ").unwrap_err();
        assert_eq!(err, ResolveError::no_such_attribute("Name"));
    }

    #[test]
    fn test_unknown_field() {
        let root = fixture();
        assert_eq!(
            read(&root, "Nope").unwrap_err(),
            ResolveError::no_such_attribute("Nope")
        );
        assert_eq!(
            read(&root, "Settings/Nope").unwrap_err(),
            ResolveError::no_such_attribute("Nope")
        );
    }

    #[test]
    fn test_absent_intermediate_is_not_found() {
        let root = fixture();
        match read(&root, "Missing/Anything").unwrap() {
            Resolution::NotFound { segment } => assert_eq!(segment, "Missing"),
            other => panic!("expected NotFound, got {other:?}"),
        }

        match read(&root, "Requests[9]/Type").unwrap() {
            Resolution::NotFound { segment } => assert_eq!(segment, "Requests[9]"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_not_found_into_result() {
        let root = fixture();
        let err = read(&root, "Missing/Anything")
            .and_then(Resolution::into_result)
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::NotFound {
                segment: "Missing".to_string()
            }
        );
    }

    #[test]
    fn test_sequence_write_within_bounds() {
        let root = fixture();
        write(&root, "Tags[1]", "gamma").unwrap();
        assert_eq!(
            read(&root, "Tags[1]").unwrap().leaf(),
            Some(&Value::from("gamma"))
        );
    }

    #[test]
    fn test_sequence_write_out_of_bounds_leaves_container_unchanged() {
        let root = fixture();
        let err = write(&root, "Tags[2]", "delta").unwrap_err();
        assert_eq!(err, ResolveError::IndexOutOfRange { index: 2, len: 2 });

        let tags = read(&root, "Tags").unwrap().into_node().unwrap();
        let Node::Sequence(list) = tags else {
            panic!("expected sequence");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(
            list.get(1).and_then(|n| n.as_leaf().cloned()),
            Some(Value::from("beta"))
        );
    }

    #[test]
    fn test_array_write_coerces_to_element_kind() {
        let root = fixture();
        write(&root, "Slots[0]", "99").unwrap();
        assert_eq!(
            read(&root, "Slots[0]").unwrap().leaf(),
            Some(&Value::Long(99))
        );

        let err = write(&root, "Slots[5]", 1_i64).unwrap_err();
        assert_eq!(err, ResolveError::IndexOutOfRange { index: 5, len: 2 });
    }

    #[test]
    fn test_map_write_replaces_and_inserts() {
        let root = fixture();
        write(&root, "Requests[1]", "gone").unwrap();
        assert_eq!(
            read(&root, "Requests[1]").unwrap().leaf(),
            Some(&Value::from("gone"))
        );

        write(&root, "Requests[7]", "new").unwrap();
        assert_eq!(
            read(&root, "Requests[7]").unwrap().leaf(),
            Some(&Value::from("new"))
        );
    }

    #[test]
    fn test_missing_map_key_reads_absent() {
        let root = fixture();
        let node = read(&root, "Requests[42]").unwrap().into_node().unwrap();
        assert!(node.is_absent());
    }

    #[test]
    fn test_non_numeric_sequence_index_is_mismatch() {
        let root = fixture();
        let err = read(&root, "Tags[x]").unwrap_err();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }

    #[test]
    fn test_known_permissive_behavior_on_scalar_container() {
        let root = fixture();
        assert!(matches!(
            read(&root, "Version[0]").unwrap(),
            Resolution::Skipped
        ));
        assert!(matches!(
            write(&root, "Version[0]", "2.0").unwrap(),
            Resolution::Skipped
        ));
        assert_eq!(
            read(&root, "Version").unwrap().leaf(),
            Some(&Value::from("1.0"))
        );
    }

    #[test]
    fn test_writing_container_attribute_is_mismatch() {
        let settings = ManagedRecord::new("Holder");
        settings.define(
            crate::node::AttributeInfo {
                name: "Items".to_string(),
                kind: AttributeKind::Map,
                writable: true,
            },
            Node::map(Arc::new(ManagedMap::new())),
        );
        let root: Arc<dyn ManagedObject> = Arc::new(settings);
        let err = write(&root, "Items", "x").unwrap_err();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }
}
