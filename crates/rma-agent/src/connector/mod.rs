//! Connector transport: the network endpoint consoles talk to.
//!
//! A session creates a connector through a [`ConnectorFactory`], starts it
//! on its exported address with the session's [`EndpointContext`], and
//! stops it on teardown or when the watchdog replaces it.

mod connection;
mod tcp;

pub use connection::{ConnectionError, ConnectionHandler, SubscriberWriter, SubscribersMap};
pub use tcp::{TcpConnector, TcpConnectorFactory, DEFAULT_PROBE_TIMEOUT};

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::session::EndpointContext;

/// A startable, stoppable endpoint.
#[async_trait]
pub trait Connector: Send {
    /// Starts serving `context` at `address`; returns the bound address.
    async fn start(
        &mut self,
        address: SocketAddr,
        context: Arc<EndpointContext>,
    ) -> Result<SocketAddr, ConnectorError>;

    /// Stops serving. Stopping a connector that is not running succeeds.
    async fn stop(&mut self) -> Result<(), ConnectorError>;

    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Creates connectors and checks whether an endpoint is alive.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Connector>;

    /// True if something answering the protocol is listening at `address`.
    async fn probe(&self, address: SocketAddr) -> bool;
}
