//! Registry actor commands and events.
//!
//! - `RegistryCommand`: commands sent to the actor
//! - `Reservation`: answer to a reservation attempt
//! - `RegistryEvent`: events published to subscribers

use std::fmt;

use rma_core::ComponentIdentity;
use tokio::sync::oneshot;

use crate::session::AgentSession;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Registration itself runs in the caller's task: the caller reserves the
/// identity, registers, then confirms or releases the reservation.
pub enum RegistryCommand {
    /// Claim `identity` for `session` unless another session holds it.
    Reserve {
        identity: ComponentIdentity,
        session: AgentSession,
        respond_to: oneshot::Sender<Reservation>,
    },

    /// Mark a reserved session as registered.
    ///
    /// Fire-and-forget; ignored unless `session` still holds the identity.
    Confirm {
        identity: ComponentIdentity,
        session: AgentSession,
    },

    /// Drop a reservation whose registration failed.
    ///
    /// Only removes the entry if `session` still holds it.
    Release {
        identity: ComponentIdentity,
        session: AgentSession,
        respond_to: oneshot::Sender<()>,
    },

    /// Hand `identity` to `session`, displacing whoever held it.
    Replace {
        identity: ComponentIdentity,
        session: AgentSession,
        respond_to: oneshot::Sender<()>,
    },

    /// Registered session for a registry key.
    Lookup {
        key: String,
        respond_to: oneshot::Sender<Option<AgentSession>>,
    },

    /// Forget a session; the caller tears it down.
    Remove {
        identity: ComponentIdentity,
        respond_to: oneshot::Sender<Option<AgentSession>>,
    },

    /// All registered sessions.
    List {
        respond_to: oneshot::Sender<Vec<AgentSession>>,
    },

    /// Forget every session, registered or reserved.
    Drain {
        respond_to: oneshot::Sender<Vec<AgentSession>>,
    },
}

/// Outcome of a reservation.
#[derive(Debug)]
pub enum Reservation {
    /// The identity is now held by the caller's session
    Reserved,
    /// Another session holds the identity (registered or still registering)
    Existing(AgentSession),
}

// ============================================================================
// Registry Events
// ============================================================================

/// Events published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    SessionRegistered {
        identity: ComponentIdentity,
    },

    SessionRemoved {
        identity: ComponentIdentity,
        reason: RemovalReason,
    },
}

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Caller asked for removal.
    Explicit,

    /// Displaced by a replacing registration.
    Replaced,

    /// Registry shut down.
    Shutdown,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicitly removed"),
            Self::Replaced => write!(f, "replaced by a new registration"),
            Self::Shutdown => write!(f, "registry shut down"),
        }
    }
}
