//! TCP naming registry.
//!
//! Each connection carries one `NamingRequest` line and receives one
//! `NamingResponse` line. The accept loop runs until its cancellation
//! token fires.

use std::net::SocketAddr;
use std::time::Duration;

use rma_protocol::{NamingRequest, NamingResponse, MAX_MESSAGE_SIZE};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::LocalNaming;
use crate::error::NamingError;

/// Time a client has to send its request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP naming registry backed by a [`LocalNaming`] table.
pub struct NamingServer;

/// A running registry.
pub struct NamingServerHandle {
    local_addr: SocketAddr,
    table: LocalNaming,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl NamingServer {
    /// Binds `address` and starts serving a fresh table.
    pub async fn spawn(
        address: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<NamingServerHandle, NamingError> {
        Self::spawn_with_table(address, LocalNaming::new(), cancel).await
    }

    /// Binds `address` and serves `table`.
    pub async fn spawn_with_table(
        address: SocketAddr,
        table: LocalNaming,
        cancel: CancellationToken,
    ) -> Result<NamingServerHandle, NamingError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| NamingError::Unavailable {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NamingError::Unavailable {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        info!(address = %local_addr, "Naming registry listening");

        let task = tokio::spawn(accept_loop(listener, table.clone(), cancel.clone()));
        Ok(NamingServerHandle {
            local_addr,
            table,
            cancel,
            task,
        })
    }
}

impl NamingServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The table this server serves.
    pub fn table(&self) -> &LocalNaming {
        &self.table
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops accepting and waits for the listener to close.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Naming registry task ended abnormally");
        }
        info!(address = %self.local_addr, "Naming registry stopped");
    }
}

async fn accept_loop(listener: TcpListener, table: LocalNaming, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Naming registry shutdown requested");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let table = table.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, &table).await {
                                debug!(peer = %peer, error = %e, "Naming request failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept naming connection");
                    }
                }
            }
        }
    }
}

async fn serve(stream: TcpStream, table: &LocalNaming) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let response = match timeout(REQUEST_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(_)) if line.len() > MAX_MESSAGE_SIZE => {
            NamingResponse::error(NamingResponse::BAD_REQUEST, "request too large")
        }
        Ok(Ok(_)) => match serde_json::from_str::<NamingRequest>(&line) {
            Ok(request) => apply(table, request),
            Err(e) => NamingResponse::error(NamingResponse::BAD_REQUEST, e.to_string()),
        },
        Ok(Err(e)) => return Err(e),
        Err(_) => return Ok(()),
    };

    let mut json = serde_json::to_string(&response).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await
}

/// Applies one request to the table.
fn apply(table: &LocalNaming, request: NamingRequest) -> NamingResponse {
    let outcome = match request {
        NamingRequest::Bind { name, address } => table.bind_entry(&name, address),
        NamingRequest::Rebind { name, address } => {
            table.rebind_entry(&name, address);
            Ok(())
        }
        NamingRequest::Lookup { name } => {
            return NamingResponse::Address {
                address: table.lookup_entry(&name),
            }
        }
        NamingRequest::Unbind { name } => table.unbind_entry(&name),
        NamingRequest::List => {
            return NamingResponse::Names {
                names: table.names(),
            }
        }
    };

    match outcome {
        Ok(()) => NamingResponse::Ok,
        Err(NamingError::AlreadyBound(name)) => {
            NamingResponse::error(NamingResponse::ALREADY_BOUND, name)
        }
        Err(NamingError::NotBound(name)) => NamingResponse::error(NamingResponse::NOT_BOUND, name),
        Err(other) => NamingResponse::error(NamingResponse::BAD_REQUEST, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_maps_table_errors() {
        let table = LocalNaming::new();
        let address: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let bind = NamingRequest::Bind {
            name: "n".to_string(),
            address,
        };

        assert_eq!(apply(&table, bind.clone()), NamingResponse::Ok);
        assert_eq!(
            apply(&table, bind),
            NamingResponse::error(NamingResponse::ALREADY_BOUND, "n")
        );
        assert_eq!(
            apply(
                &table,
                NamingRequest::Lookup {
                    name: "n".to_string()
                }
            ),
            NamingResponse::Address {
                address: Some(address)
            }
        );
        assert_eq!(
            apply(
                &table,
                NamingRequest::Unbind {
                    name: "missing".to_string()
                }
            ),
            NamingResponse::error(NamingResponse::NOT_BOUND, "missing")
        );
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let handle = NamingServer::spawn("127.0.0.1:0".parse().unwrap(), CancellationToken::new())
            .await
            .unwrap();
        let address = handle.local_addr();
        handle.shutdown().await;

        let again = NamingServer::spawn(address, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again.local_addr(), address);
        again.shutdown().await;
    }
}
