//! Console-side client for an agent endpoint.
//!
//! Requests are answered in order on one connection. Notifications that
//! arrive while a reply is awaited are buffered and handed out by
//! [`AgentClient::next_notification`].

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use rma_core::{AttributeInfo, NodeSnapshot, Notification, Value};
use rma_protocol::{AgentMessage, ClientMessage, ProtocolVersion, MAX_MESSAGE_SIZE};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Bound on waiting for any single reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Console client failures.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: SocketAddr, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid message: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("agent error{}: {message}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Agent {
        message: String,
        code: Option<String>,
    },

    #[error("connection closed by agent")]
    Closed,

    #[error("timed out waiting for reply")]
    Timeout,

    #[error("unexpected reply: {0}")]
    Unexpected(String),
}

/// Answer to a read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadReply {
    Node(NodeSnapshot),
    /// An intermediate segment of the path resolved to nothing
    NotFound { segment: String },
}

impl ReadReply {
    /// Leaf value, if the reply is one.
    pub fn leaf(&self) -> Option<&Value> {
        match self {
            Self::Node(node) => node.leaf(),
            Self::NotFound { .. } => None,
        }
    }
}

/// Connection to one agent endpoint.
pub struct AgentClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,
    component: String,
    pending: VecDeque<Notification>,
    reply_timeout: Duration,
}

impl AgentClient {
    /// Connects and completes the protocol handshake.
    pub async fn connect(address: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| ClientError::Connect {
                address,
                reason: e.to_string(),
            })?;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            client_id: String::new(),
            component: String::new(),
            pending: VecDeque::new(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        };

        client.send(&ClientMessage::connect(None)).await?;
        match client.read_message().await? {
            AgentMessage::Connected {
                protocol_version,
                client_id,
                component,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::Rejected(format!(
                        "agent speaks protocol {protocol_version}"
                    )));
                }
                debug!(client_id = %client_id, component = %component, "Handshake complete");
                client.client_id = client_id;
                client.component = component;
                Ok(client)
            }
            AgentMessage::Rejected { reason, .. } => Err(ClientError::Rejected(reason)),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `name/instance` of the component behind the endpoint.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Reads `path` on the application root.
    pub async fn get(&mut self, path: &str) -> Result<ReadReply, ClientError> {
        self.get_in(None, path).await
    }

    /// Reads `path` on a named bound object.
    pub async fn get_in(
        &mut self,
        object: Option<&str>,
        path: &str,
    ) -> Result<ReadReply, ClientError> {
        let request = ClientMessage::get(object.map(str::to_string), path);
        match self.request(&request).await? {
            AgentMessage::AttributeValue { node, .. } => Ok(ReadReply::Node(node)),
            AgentMessage::NotFound { segment, .. } => Ok(ReadReply::NotFound { segment }),
            other => Err(unexpected(other)),
        }
    }

    /// Writes `value` at `path`. Returns false if an intermediate segment
    /// resolved to nothing.
    pub async fn set(
        &mut self,
        object: Option<&str>,
        path: &str,
        value: Value,
    ) -> Result<bool, ClientError> {
        let request = ClientMessage::set(object.map(str::to_string), path, value);
        match self.request(&request).await? {
            AgentMessage::AttributeWritten { .. } => Ok(true),
            AgentMessage::NotFound { .. } => Ok(false),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_objects(&mut self) -> Result<Vec<String>, ClientError> {
        match self.request(&ClientMessage::list_objects()).await? {
            AgentMessage::ObjectList { objects } => Ok(objects),
            other => Err(unexpected(other)),
        }
    }

    /// Type name and attributes of a bound object.
    pub async fn describe(
        &mut self,
        object: &str,
    ) -> Result<(String, Vec<AttributeInfo>), ClientError> {
        match self.request(&ClientMessage::describe(object)).await? {
            AgentMessage::ObjectDescription {
                type_name,
                attributes,
                ..
            } => Ok((type_name, attributes)),
            other => Err(unexpected(other)),
        }
    }

    /// Starts notification delivery.
    pub async fn subscribe(&mut self) -> Result<(), ClientError> {
        match self.request(&ClientMessage::subscribe()).await? {
            AgentMessage::ObjectList { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ping(&mut self, seq: u64) -> Result<(), ClientError> {
        match self.request(&ClientMessage::ping(seq)).await? {
            AgentMessage::Pong { seq: got } if got == seq => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Next notification, waiting up to the reply timeout.
    pub async fn next_notification(&mut self) -> Result<Notification, ClientError> {
        if let Some(buffered) = self.pending.pop_front() {
            return Ok(buffered);
        }
        match self.read_message().await? {
            AgentMessage::Notification { notification } => Ok(notification),
            other => Err(unexpected(other)),
        }
    }

    /// Waits for notifications without a deadline.
    pub async fn watch(&mut self) -> Result<Notification, ClientError> {
        if let Some(buffered) = self.pending.pop_front() {
            return Ok(buffered);
        }
        loop {
            if let AgentMessage::Notification { notification } = self.read_unbounded().await? {
                return Ok(notification);
            }
        }
    }

    /// Says goodbye and closes the connection.
    pub async fn close(mut self) {
        let _ = self.send(&ClientMessage::disconnect()).await;
        let _ = self.writer.shutdown().await;
    }

    async fn request(&mut self, request: &ClientMessage) -> Result<AgentMessage, ClientError> {
        self.send(request).await?;
        loop {
            match self.read_message().await? {
                AgentMessage::Notification { notification } => {
                    self.pending.push_back(notification)
                }
                AgentMessage::Error { message, code } => {
                    return Err(ClientError::Agent { message, code })
                }
                reply => return Ok(reply),
            }
        }
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        let mut json = serde_json::to_string(msg)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<AgentMessage, ClientError> {
        match timeout(self.reply_timeout, self.read_unbounded()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn read_unbounded(&mut self) -> Result<AgentMessage, ClientError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::Closed);
        }
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ClientError::Unexpected(format!(
                "message of {} bytes exceeds limit",
                line.len()
            )));
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}

fn unexpected(msg: AgentMessage) -> ClientError {
    ClientError::Unexpected(format!("{msg:?}"))
}
