//! Naming registry: the directory that maps a component's naming entry to
//! its live connector address.
//!
//! Three implementations:
//! - [`LocalNaming`] - in-process table (tests, embedded use)
//! - [`NamingServer`] - TCP registry serving a `LocalNaming` table
//! - [`RemoteNaming`] - client for a `NamingServer`, able to start an
//!   embedded one when none answers

mod remote;
mod server;

pub use remote::{RemoteNaming, DEFAULT_REQUEST_TIMEOUT};
pub use server::{NamingServer, NamingServerHandle};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::NamingError;

/// Operations the agent needs from a naming registry.
#[async_trait]
pub trait NamingService: Send + Sync {
    /// Binds `name`; fails with `AlreadyBound` if taken.
    async fn bind(&self, name: &str, address: SocketAddr) -> Result<(), NamingError>;

    /// Binds `name`, replacing any existing entry.
    async fn rebind(&self, name: &str, address: SocketAddr) -> Result<(), NamingError>;

    async fn lookup(&self, name: &str) -> Result<Option<SocketAddr>, NamingError>;

    /// Removes `name`; fails with `NotBound` if absent.
    async fn unbind(&self, name: &str) -> Result<(), NamingError>;

    async fn list(&self) -> Result<Vec<String>, NamingError>;

    /// True if `name` is bound to exactly `address`.
    async fn is_bound(&self, name: &str, address: SocketAddr) -> Result<bool, NamingError> {
        Ok(self.lookup(name).await? == Some(address))
    }

    /// Makes sure the registry is reachable, starting it if this
    /// implementation knows how.
    async fn ensure_available(&self) -> Result<(), NamingError> {
        Ok(())
    }
}

/// In-process naming table. Cheap to clone; clones share entries.
#[derive(Clone, Default)]
pub struct LocalNaming {
    entries: Arc<Mutex<HashMap<String, SocketAddr>>>,
}

impl LocalNaming {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, SocketAddr>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bind_entry(&self, name: &str, address: SocketAddr) -> Result<(), NamingError> {
        let mut entries = self.entries();
        if entries.contains_key(name) {
            return Err(NamingError::AlreadyBound(name.to_string()));
        }
        entries.insert(name.to_string(), address);
        Ok(())
    }

    pub fn rebind_entry(&self, name: &str, address: SocketAddr) {
        self.entries().insert(name.to_string(), address);
    }

    pub fn lookup_entry(&self, name: &str) -> Option<SocketAddr> {
        self.entries().get(name).copied()
    }

    pub fn unbind_entry(&self, name: &str) -> Result<(), NamingError> {
        self.entries()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| NamingError::NotBound(name.to_string()))
    }

    /// Sorted entry names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry, as a registry restart would.
    pub fn clear(&self) {
        self.entries().clear();
    }
}

#[async_trait]
impl NamingService for LocalNaming {
    async fn bind(&self, name: &str, address: SocketAddr) -> Result<(), NamingError> {
        self.bind_entry(name, address)
    }

    async fn rebind(&self, name: &str, address: SocketAddr) -> Result<(), NamingError> {
        self.rebind_entry(name, address);
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Option<SocketAddr>, NamingError> {
        Ok(self.lookup_entry(name))
    }

    async fn unbind(&self, name: &str) -> Result<(), NamingError> {
        self.unbind_entry(name)
    }

    async fn list(&self) -> Result<Vec<String>, NamingError> {
        Ok(self.names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_bind_and_rebind() {
        let naming = LocalNaming::new();
        naming.bind("rma/A_1", addr(4000)).await.unwrap();
        assert_eq!(
            naming.bind("rma/A_1", addr(4001)).await.unwrap_err(),
            NamingError::AlreadyBound("rma/A_1".to_string())
        );

        naming.rebind("rma/A_1", addr(4001)).await.unwrap();
        assert_eq!(naming.lookup("rma/A_1").await.unwrap(), Some(addr(4001)));
        assert!(naming.is_bound("rma/A_1", addr(4001)).await.unwrap());
        assert!(!naming.is_bound("rma/A_1", addr(4000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unbind_missing() {
        let naming = LocalNaming::new();
        assert!(matches!(
            naming.unbind("nothing").await,
            Err(NamingError::NotBound(_))
        ));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let naming = LocalNaming::new();
        let other = naming.clone();
        naming.bind("x", addr(1)).await.unwrap();
        assert_eq!(other.names(), vec!["x"]);
        other.clear();
        assert!(naming.is_empty());
    }
}
