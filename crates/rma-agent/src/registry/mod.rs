//! Endpoint registry using the actor pattern.
//!
//! The registry maps component identities to sessions and enforces at most
//! one registered session per identity.
//!
//! ```text
//! ┌─────────────────┐  RegistryCommand  ┌─────────────────┐  RegistryEvent  ┌─────────────┐
//! │ EndpointRegistry│──────────────────▶│  RegistryActor  │────────────────▶│ subscribers │
//! │   (handles)     │   (mpsc channel)  │ HashMap<key,    │   (broadcast)   │             │
//! └─────────────────┘                   │   session>      │                 └─────────────┘
//!                                       └─────────────────┘
//! ```
//!
//! Registration work (naming, connector, bindings) runs in the caller's
//! task between a `Reserve` and a `Confirm`/`Release`, so the actor never
//! waits on I/O and lookups are never blocked by a slow registration.

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryEvent, RemovalReason, Reservation};
pub use handle::{EndpointRegistry, RegistrationMode};

use crate::environment::AgentEnvironment;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;

/// Spawns the registry actor and returns a handle to it.
///
/// The actor stops once every handle is dropped.
pub fn spawn_registry(env: AgentEnvironment) -> EndpointRegistry {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone());
    tokio::spawn(actor.run());

    EndpointRegistry::new(cmd_tx, event_tx, env)
}
