//! RMA Protocol - Wire formats for the remote management agent
//!
//! Two line-delimited JSON conversations are defined here:
//! - console ↔ agent endpoint (`ClientMessage` / `AgentMessage`)
//! - agent ↔ naming registry (`NamingRequest` / `NamingResponse`)

pub mod message;
pub mod naming;
pub mod version;

pub use message::{AgentMessage, ClientMessage, MessageType};
pub use naming::{NamingRequest, NamingResponse};
pub use version::{ProtocolVersion, VersionError};

/// Largest accepted line on either conversation.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
