//! TCP connector.
//!
//! The connector:
//! - Listens on the session's exported address
//! - Spawns a `ConnectionHandler` per console
//! - Forwards relay notifications to subscribed consoles
//! - Shuts everything down through one cancellation token
//!
//! # Panic-Free Guarantees
//!
//! Accept and write failures are logged; the accept loop keeps running
//! until cancelled.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rma_core::Notification;
use rma_protocol::AgentMessage;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionHandler, SubscribersMap, WRITE_TIMEOUT};
use super::{Connector, ConnectorFactory};
use crate::client::AgentClient;
use crate::error::ConnectorError;
use crate::session::EndpointContext;

/// How long a liveness probe may take.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
    broadcast_task: JoinHandle<()>,
}

/// Line-JSON connector over TCP.
#[derive(Default)]
pub struct TcpConnector {
    running: Option<Running>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn start(
        &mut self,
        address: SocketAddr,
        context: Arc<EndpointContext>,
    ) -> Result<SocketAddr, ConnectorError> {
        if self.running.is_some() {
            return Err(ConnectorError::AlreadyStarted);
        }

        let bind_error = |e: std::io::Error| ConnectorError::Bind {
            address: address.to_string(),
            reason: e.to_string(),
        };
        let listener = TcpListener::bind(address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let cancel = CancellationToken::new();
        let subscribers: SubscribersMap = Arc::new(RwLock::new(HashMap::new()));

        let broadcast_task = tokio::spawn(broadcast_notifications(
            context.subscribe(),
            Arc::clone(&subscribers),
            cancel.clone(),
        ));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            context,
            subscribers,
            cancel.clone(),
        ));

        info!(address = %local_addr, "Connector listening");
        self.running = Some(Running {
            local_addr,
            cancel,
            accept_task,
            broadcast_task,
        });
        Ok(local_addr)
    }

    async fn stop(&mut self) -> Result<(), ConnectorError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        running.cancel.cancel();
        let accept = running.accept_task.await;
        let broadcast = running.broadcast_task.await;
        info!(address = %running.local_addr, "Connector stopped");

        accept
            .and(broadcast)
            .map_err(|e| ConnectorError::Stop(e.to_string()))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

impl Drop for TcpConnector {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

/// Accepts consoles until cancelled.
async fn accept_loop(
    listener: TcpListener,
    context: Arc<EndpointContext>,
    subscribers: SubscribersMap,
    cancel: CancellationToken,
) {
    let connection_counter = AtomicU64::new(0);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Connector shutdown requested");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let number = connection_counter.fetch_add(1, Ordering::Relaxed);
                        debug!(peer = %peer, connection = number, "Console connected");

                        let (reader, writer) = stream.into_split();
                        let handler = ConnectionHandler::new(
                            reader,
                            writer,
                            Arc::clone(&context),
                            Arc::clone(&subscribers),
                            number,
                            cancel.child_token(),
                        );
                        let subscribers = Arc::clone(&subscribers);
                        tokio::spawn(async move {
                            if let Some(id) = handler.run().await {
                                if subscribers.write().await.remove(&id).is_some() {
                                    debug!(client_id = %id, "Removed disconnected subscriber");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept console connection");
                    }
                }
            }
        }
    }

    subscribers.write().await.clear();
}

/// Forwards relay notifications to every subscribed console.
async fn broadcast_notifications(
    mut events: broadcast::Receiver<Notification>,
    subscribers: SubscribersMap,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            result = events.recv() => {
                match result {
                    Ok(notification) => deliver(&subscribers, notification).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Notification forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn deliver(subscribers: &SubscribersMap, notification: Notification) {
    let msg = AgentMessage::Notification { notification };
    let mut json = match serde_json::to_string(&msg) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "Failed to serialize notification");
            return;
        }
    };
    json.push('\n');

    let subs = subscribers.read().await;
    let mut failed = Vec::new();

    for (client_id, writer) in subs.iter() {
        let mut writer = writer.lock().await;
        let sent = timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.flush().await
        })
        .await;

        if !matches!(sent, Ok(Ok(()))) {
            debug!(client_id = %client_id, "Failed to deliver notification");
            failed.push(client_id.clone());
        }
    }
    drop(subs);

    if !failed.is_empty() {
        let mut subs = subscribers.write().await;
        for client_id in failed {
            subs.remove(&client_id);
            debug!(client_id = %client_id, "Dropped failed subscriber");
        }
    }
}

/// Builds [`TcpConnector`]s; probes by completing a protocol handshake.
pub struct TcpConnectorFactory {
    probe_timeout: Duration,
}

impl TcpConnectorFactory {
    pub fn new() -> Self {
        Self::with_probe_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }
}

impl Default for TcpConnectorFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectorFactory for TcpConnectorFactory {
    fn create(&self) -> Box<dyn Connector> {
        Box::new(TcpConnector::new())
    }

    async fn probe(&self, address: SocketAddr) -> bool {
        match timeout(self.probe_timeout, AgentClient::connect(address)).await {
            Ok(Ok(client)) => {
                client.close().await;
                true
            }
            Ok(Err(e)) => {
                debug!(address = %address, error = %e, "Probe failed");
                false
            }
            Err(_) => {
                debug!(address = %address, "Probe timed out");
                false
            }
        }
    }
}
