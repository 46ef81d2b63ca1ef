//! Client for a TCP naming registry.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use rma_protocol::{NamingRequest, NamingResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{NamingServer, NamingServerHandle, NamingService};
use crate::error::NamingError;

/// Bound on connect + request + reply for one naming call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to the registry at a fixed address, one connection per request.
///
/// When nothing answers at that address, [`NamingService::ensure_available`]
/// starts an embedded [`NamingServer`] there.
pub struct RemoteNaming {
    address: SocketAddr,
    request_timeout: Duration,
    embedded: Mutex<Option<NamingServerHandle>>,
}

impl RemoteNaming {
    pub fn new(address: SocketAddr) -> Self {
        Self::with_timeout(address, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(address: SocketAddr, request_timeout: Duration) -> Self {
        Self {
            address,
            request_timeout,
            embedded: Mutex::new(None),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// True if this client started the registry it talks to.
    pub async fn owns_registry(&self) -> bool {
        self.embedded
            .lock()
            .await
            .as_ref()
            .is_some_and(NamingServerHandle::is_running)
    }

    /// Stops the embedded registry, if one was started.
    pub async fn shutdown_embedded(&self) {
        if let Some(handle) = self.embedded.lock().await.take() {
            handle.shutdown().await;
        }
    }

    fn unavailable(&self, reason: impl ToString) -> NamingError {
        NamingError::Unavailable {
            address: self.address.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn request(&self, request: &NamingRequest) -> Result<NamingResponse, NamingError> {
        let exchange = async {
            let stream = TcpStream::connect(self.address)
                .await
                .map_err(|e| self.unavailable(e))?;
            let (reader, mut writer) = stream.into_split();

            let mut json = serde_json::to_string(request)
                .map_err(|e| NamingError::Protocol(e.to_string()))?;
            json.push('\n');
            writer
                .write_all(json.as_bytes())
                .await
                .map_err(|e| self.unavailable(e))?;
            writer.flush().await.map_err(|e| self.unavailable(e))?;

            let mut line = String::new();
            let read = BufReader::new(reader)
                .read_line(&mut line)
                .await
                .map_err(|e| self.unavailable(e))?;
            if read == 0 {
                return Err(self.unavailable("connection closed before reply"));
            }
            serde_json::from_str::<NamingResponse>(&line)
                .map_err(|e| NamingError::Protocol(e.to_string()))
        };

        match timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(self.unavailable("request timed out")),
        }
    }

    /// Turns an error reply into the matching `NamingError`.
    fn into_error(response: NamingResponse) -> NamingError {
        match response {
            NamingResponse::Error { code, message } => match code.as_str() {
                NamingResponse::ALREADY_BOUND => NamingError::AlreadyBound(message),
                NamingResponse::NOT_BOUND => NamingError::NotBound(message),
                _ => NamingError::Protocol(message),
            },
            other => NamingError::Protocol(format!("unexpected reply: {other:?}")),
        }
    }

    async fn expect_ok(&self, request: NamingRequest) -> Result<(), NamingError> {
        match self.request(&request).await? {
            NamingResponse::Ok => Ok(()),
            other => Err(Self::into_error(other)),
        }
    }
}

#[async_trait]
impl NamingService for RemoteNaming {
    async fn bind(&self, name: &str, address: SocketAddr) -> Result<(), NamingError> {
        self.expect_ok(NamingRequest::Bind {
            name: name.to_string(),
            address,
        })
        .await
    }

    async fn rebind(&self, name: &str, address: SocketAddr) -> Result<(), NamingError> {
        self.expect_ok(NamingRequest::Rebind {
            name: name.to_string(),
            address,
        })
        .await
    }

    async fn lookup(&self, name: &str) -> Result<Option<SocketAddr>, NamingError> {
        let request = NamingRequest::Lookup {
            name: name.to_string(),
        };
        match self.request(&request).await? {
            NamingResponse::Address { address } => Ok(address),
            other => Err(Self::into_error(other)),
        }
    }

    async fn unbind(&self, name: &str) -> Result<(), NamingError> {
        self.expect_ok(NamingRequest::Unbind {
            name: name.to_string(),
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>, NamingError> {
        match self.request(&NamingRequest::List).await? {
            NamingResponse::Names { names } => Ok(names),
            other => Err(Self::into_error(other)),
        }
    }

    async fn ensure_available(&self) -> Result<(), NamingError> {
        // Held across the probe so concurrent callers start at most one server
        let mut embedded = self.embedded.lock().await;

        match self.request(&NamingRequest::List).await {
            Ok(_) => return Ok(()),
            Err(e) => debug!(address = %self.address, error = %e, "Naming registry not answering"),
        }

        if let Some(stale) = embedded.take() {
            stale.shutdown().await;
        }

        let handle = NamingServer::spawn(self.address, CancellationToken::new()).await?;
        info!(address = %handle.local_addr(), "Started embedded naming registry");
        *embedded = Some(handle);
        Ok(())
    }
}
