//! RMA Agent - Sessions, endpoint registry and self-healing registration
//!
//! This crate exposes host object graphs to management consoles:
//! - `registry` - endpoint registry actor mapping component identities to sessions
//! - `session` - per-component registration state machine and endpoint context
//! - `watchdog` - periodic repair of dropped naming entries
//! - `connector` - TCP endpoint serving console requests
//! - `naming` - naming registry (in-process table, TCP server and client)
//! - `relay` - notification fan-out
//! - `client` - console-side client
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐ reserve/confirm ┌─────────────────┐
//! │ EndpointRegistry │────────────────▶│  RegistryActor  │
//! └────────┬─────────┘                 └─────────────────┘
//!          │ register / unregister
//!          ▼
//! ┌──────────────────┐   bind/rebind   ┌─────────────────┐
//! │   AgentSession   │────────────────▶│ NamingService   │
//! │  (state machine) │                 └─────────────────┘
//! │                  │  start/stop     ┌─────────────────┐    ┌──────────────────┐
//! │                  │────────────────▶│  TcpConnector   │───▶│ConnectionHandler │
//! └────────┬─────────┘                 └─────────────────┘    │   (per console)  │
//!          │ repair_if_stale                                  └──────────────────┘
//! ┌────────┴─────────┐
//! │ RegistryWatchdog │
//! └──────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code has no `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()` or `todo!()`; std locks recover from poisoning.

pub mod client;
pub mod config;
pub mod connector;
pub mod environment;
pub mod error;
pub mod naming;
pub mod objects;
pub mod registry;
pub mod relay;
pub mod session;
pub mod watchdog;

/// Tracing target for registration audit events.
pub const AUDIT_TARGET: &str = "rma::audit";

pub use client::{AgentClient, ClientError, ReadReply};
pub use config::{AgentConfig, ConfigSource};
pub use connector::{Connector, ConnectorFactory, TcpConnector, TcpConnectorFactory};
pub use environment::AgentEnvironment;
pub use error::{
    AgentError, BindingError, ConfigError, ConnectorError, NamingError, RegistrationStep,
};
pub use naming::{LocalNaming, NamingServer, NamingServerHandle, NamingService, RemoteNaming};
pub use objects::ObjectTable;
pub use registry::{spawn_registry, EndpointRegistry, RegistrationMode, RegistryEvent, RemovalReason};
pub use relay::NotificationRelay;
pub use session::{AgentSession, EndpointContext, RegistrationState, RepairOutcome};
pub use watchdog::WatchdogHandle;
