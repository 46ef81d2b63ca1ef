//! Handler for one console connection.
//!
//! Each console gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming requests
//! - Resolves them against the session's `EndpointContext`
//! - Registers the console for notification delivery on request
//!
//! # Panic-Free Guarantees
//!
//! Connection errors are logged and end the connection; request failures
//! are answered with an `error` message and the loop continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rma_core::node::DEFAULT_SNAPSHOT_DEPTH;
use rma_core::{NodeSnapshot, Resolution};
use rma_protocol::{AgentMessage, ClientMessage, MessageType, ProtocolVersion, MAX_MESSAGE_SIZE};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{EndpointContext, EndpointError};

/// Shared writer of a subscribed console.
pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Subscribed consoles by client id.
pub type SubscribersMap = Arc<RwLock<HashMap<String, SubscriberWriter>>>;

/// Idle consoles are dropped after this long.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_SUBSCRIBERS: usize = 32;

pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: SubscriberWriter,
    context: Arc<EndpointContext>,
    subscribers: SubscribersMap,
    client_id: Option<String>,
    connection_number: u64,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        context: Arc<EndpointContext>,
        subscribers: SubscribersMap,
        connection_number: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            context,
            subscribers,
            client_id: None,
            connection_number,
            cancel,
        }
    }

    /// Serves the console until it disconnects, times out or the connector
    /// stops. Returns the client id assigned at handshake.
    pub async fn run(mut self) -> Option<String> {
        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return None;
        }
        info!(
            client_id = ?self.client_id,
            component = %self.context.component(),
            "Console handshake completed"
        );

        let client_id = self.client_id.clone();

        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        info!(client_id = ?self.client_id, "Console disconnected");
        client_id
    }

    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        if let Err(e) = ProtocolVersion::check_peer(msg.protocol_version) {
            warn!(
                client_version = %msg.protocol_version,
                agent_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(AgentMessage::rejected(&e.to_string())).await?;
            return Err(ConnectionError::VersionMismatch {
                client: msg.protocol_version,
                agent: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned = client_id
                    .unwrap_or_else(|| format!("console-{}", self.connection_number));
                self.client_id = Some(assigned.clone());
                self.send_message(AgentMessage::connected(
                    assigned,
                    self.context.component().to_string(),
                ))
                .await
            }
            other => {
                self.send_message(AgentMessage::rejected("expected connect message"))
                    .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let cancel = self.cancel.clone();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(client_id = ?self.client_id, "Connector stopping");
                    return Ok(());
                }
                next = timeout(READ_TIMEOUT, self.read_message()) => next,
            };

            let msg = match next {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => return Ok(()),
                Ok(Err(ConnectionError::ParseError(e))) => {
                    self.send_message(AgentMessage::error_with_code(&e, "parse_error"))
                        .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ConnectionError::Timeout),
            };

            match self.handle_message(msg).await {
                Ok(()) => {}
                Err(ConnectionError::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        let reply = match msg.message {
            MessageType::Connect { .. } => AgentMessage::error("already connected"),

            MessageType::GetAttribute { object, path } => {
                match self.context.read(object.as_deref(), &path).await {
                    Ok(Resolution::Value(node)) => AgentMessage::AttributeValue {
                        path,
                        node: node.snapshot(DEFAULT_SNAPSHOT_DEPTH),
                    },
                    Ok(Resolution::Skipped) | Ok(Resolution::Written) => {
                        AgentMessage::AttributeValue {
                            path,
                            node: NodeSnapshot::Absent,
                        }
                    }
                    Ok(Resolution::NotFound { segment }) => {
                        AgentMessage::NotFound { path, segment }
                    }
                    Err(e) => endpoint_error(&e),
                }
            }

            MessageType::SetAttribute {
                object,
                path,
                value,
            } => match self.context.write(object.as_deref(), &path, value).await {
                Ok(Resolution::NotFound { segment }) => AgentMessage::NotFound { path, segment },
                Ok(_) => AgentMessage::AttributeWritten { path },
                Err(e) => endpoint_error(&e),
            },

            MessageType::ListObjects => AgentMessage::ObjectList {
                objects: self.context.object_names(),
            },

            MessageType::DescribeObject { object } => {
                match self.context.describe(&object).await {
                    Ok((type_name, attributes)) => AgentMessage::ObjectDescription {
                        object,
                        type_name,
                        attributes,
                    },
                    Err(e) => endpoint_error(&e),
                }
            }

            MessageType::Subscribe => self.subscribe().await,

            MessageType::Unsubscribe => {
                if let Some(id) = &self.client_id {
                    self.subscribers.write().await.remove(id);
                    debug!(client_id = %id, "Console unsubscribed");
                }
                return Ok(());
            }

            MessageType::Ping { seq } => AgentMessage::Pong { seq },

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Console requested disconnect");
                return Err(ConnectionError::Eof);
            }
        };

        self.send_message(reply).await
    }

    async fn subscribe(&self) -> AgentMessage {
        let Some(id) = self.client_id.clone() else {
            return AgentMessage::error("must connect before subscribing");
        };

        let mut subs = self.subscribers.write().await;
        if subs.len() >= MAX_SUBSCRIBERS && !subs.contains_key(&id) {
            return AgentMessage::error(&format!(
                "too many subscribers (max: {MAX_SUBSCRIBERS})"
            ));
        }
        subs.insert(id.clone(), Arc::clone(&self.writer));
        debug!(client_id = %id, "Console subscribed to notifications");

        AgentMessage::ObjectList {
            objects: self.context.object_names(),
        }
    }

    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if read == 0 {
            return Err(ConnectionError::Eof);
        }
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        serde_json::from_str(&line).map_err(|e| ConnectionError::ParseError(e.to_string()))
    }

    async fn send_message(&self, msg: AgentMessage) -> Result<(), ConnectionError> {
        let mut json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;
        json.push('\n');

        let mut writer = self.writer.lock().await;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.flush().await
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

fn endpoint_error(err: &EndpointError) -> AgentMessage {
    match err {
        EndpointError::Resolve(e) => AgentMessage::resolve_error(e),
        other => AgentMessage::error_with_code(&other.to_string(), other.code()),
    }
}

/// Reasons a console connection ends.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: console {client}, agent {agent}")]
    VersionMismatch {
        client: ProtocolVersion,
        agent: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}
