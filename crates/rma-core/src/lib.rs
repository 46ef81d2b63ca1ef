//! RMA Core - Object-graph model for the remote management agent
//!
//! This crate provides the types shared between the agent runtime
//! (rma-agent) and the wire protocol (rma-protocol):
//! - `value` / `node` - leaf values, graph nodes and the `ManagedObject` capability trait
//! - `path` / `resolver` - attribute-path parsing and resolution against a live graph
//! - `identity` - component identity and the addresses derived from it
//! - `stats` / `component` - statistics holders and component metadata
//! - `notify` - notification payloads and the sink seam used by exposed objects
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod component;
pub mod error;
pub mod identity;
pub mod node;
pub mod notify;
pub mod path;
pub mod record;
pub mod resolver;
pub mod stats;
pub mod value;

// Re-exports for convenience
pub use component::ComponentInfo;
pub use error::{IdentityError, ResolveError, ResolveResult};
pub use identity::{ComponentIdentity, ObjectKind};
pub use node::{
    AttributeInfo, AttributeKind, ManagedArray, ManagedList, ManagedMap, ManagedObject, Node,
    NodeSnapshot,
};
pub use notify::{Notification, NotificationPayload, NotificationSink};
pub use path::{AttributePath, Segment};
pub use record::ManagedRecord;
pub use resolver::{read, resolve, write, Access, Resolution};
pub use stats::{TransactionCounter, TransactionStats};
pub use value::{Value, ValueKind};
