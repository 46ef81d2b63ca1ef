//! Robustness tests for registration and teardown.
//!
//! These tests verify sessions handle failing collaborators gracefully:
//! - A connector that fails to stop
//! - A naming registry that refuses binds
//! - A connector that cannot bind its address
//! - Stale naming entries left by a dead process
//! - Live endpoints already serving the identity
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rma_agent::{
    AgentConfig, AgentEnvironment, AgentError, AgentSession, ConfigSource, Connector,
    ConnectorError, ConnectorFactory, EndpointContext, LocalNaming, NamingError, NamingService,
    RegistrationState, RegistrationStep, TcpConnector, TcpConnectorFactory,
};
use rma_core::{ComponentIdentity, ManagedObject, ManagedRecord};

// ============================================================================
// Test Doubles
// ============================================================================

/// Serves like a `TcpConnector` but reports failure when stopped.
struct StubbornConnector {
    inner: TcpConnector,
}

#[async_trait]
impl Connector for StubbornConnector {
    async fn start(
        &mut self,
        address: SocketAddr,
        context: Arc<EndpointContext>,
    ) -> Result<SocketAddr, ConnectorError> {
        self.inner.start(address, context).await
    }

    async fn stop(&mut self) -> Result<(), ConnectorError> {
        self.inner.stop().await?;
        Err(ConnectorError::Stop("socket left open".to_string()))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }
}

struct StubbornFactory;

#[async_trait]
impl ConnectorFactory for StubbornFactory {
    fn create(&self) -> Box<dyn Connector> {
        Box::new(StubbornConnector {
            inner: TcpConnector::new(),
        })
    }

    async fn probe(&self, _address: SocketAddr) -> bool {
        false
    }
}

/// A naming registry that answers lookups but refuses to bind.
#[derive(Default)]
struct ReadOnlyNaming {
    table: LocalNaming,
}

#[async_trait]
impl NamingService for ReadOnlyNaming {
    async fn bind(&self, _name: &str, _address: SocketAddr) -> Result<(), NamingError> {
        Err(self.refused())
    }

    async fn rebind(&self, _name: &str, _address: SocketAddr) -> Result<(), NamingError> {
        Err(self.refused())
    }

    async fn lookup(&self, name: &str) -> Result<Option<SocketAddr>, NamingError> {
        Ok(self.table.lookup_entry(name))
    }

    async fn unbind(&self, name: &str) -> Result<(), NamingError> {
        self.table.unbind_entry(name)
    }

    async fn list(&self) -> Result<Vec<String>, NamingError> {
        Ok(self.table.names())
    }
}

impl ReadOnlyNaming {
    fn refused(&self) -> NamingError {
        NamingError::Unavailable {
            address: "read-only".to_string(),
            reason: "binds refused".to_string(),
        }
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

fn config() -> AgentConfig {
    AgentConfig {
        exported_port: 0,
        watchdog_interval_ms: 60_000,
        ..AgentConfig::default()
    }
}

fn env(naming: Arc<dyn NamingService>, connectors: Arc<dyn ConnectorFactory>) -> AgentEnvironment {
    AgentEnvironment::new(ConfigSource::Fixed(config()), naming, connectors)
}

fn session_with(env: &AgentEnvironment, config: AgentConfig) -> AgentSession {
    let root: Arc<dyn ManagedObject> = Arc::new(
        ManagedRecord::new("Application")
            .with_scalar("Name", "ABC")
            .with_scalar("Instance", "Backup"),
    );
    let identity = ComponentIdentity::from_root(&root, None).unwrap();
    AgentSession::new(identity, root, config, env)
}

fn session(env: &AgentEnvironment) -> AgentSession {
    session_with(env, config())
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_failed_connector_stop_still_tears_down() {
    let naming = LocalNaming::new();
    let env = env(Arc::new(naming.clone()), Arc::new(StubbornFactory));
    let session = session(&env);
    session.register().await.unwrap();

    let err = session.unregister().await.unwrap_err();
    match err {
        AgentError::UnregistrationIncomplete { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(failures[0], RegistrationStep::Connector(_)));
        }
        other => panic!("expected incomplete unregistration, got {other:?}"),
    }

    // The remaining steps still ran
    assert_eq!(session.state(), RegistrationState::Unregistered);
    assert!(naming.is_empty());
    assert!(env.objects.is_empty().await);

    // And the session can come back
    session.register().await.unwrap();
    assert!(session.is_registered());
    let _ = session.unregister().await;
}

#[tokio::test]
async fn test_missing_naming_entry_on_teardown_is_ignored() {
    let naming = LocalNaming::new();
    let env = env(Arc::new(naming.clone()), Arc::new(TcpConnectorFactory::new()));
    let session = session(&env);
    session.register().await.unwrap();

    naming.clear();
    session.unregister().await.unwrap();
    assert_eq!(session.state(), RegistrationState::Unregistered);
}

// ============================================================================
// Registration rollback
// ============================================================================

#[tokio::test]
async fn test_refused_bind_rolls_back() {
    let env = env(
        Arc::new(ReadOnlyNaming::default()),
        Arc::new(TcpConnectorFactory::new()),
    );
    let session = session(&env);

    let err = session.register().await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::RegistrationFailed {
            cause: RegistrationStep::Naming(NamingError::Unavailable { .. }),
            ..
        }
    ));
    assert_eq!(session.state(), RegistrationState::Unregistered);
    assert_eq!(session.endpoint(), None);
    assert!(env.objects.is_empty().await);
}

#[tokio::test]
async fn test_unbindable_address_rolls_back() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let naming = LocalNaming::new();
    let env = env(Arc::new(naming.clone()), Arc::new(TcpConnectorFactory::new()));
    let session = session_with(
        &env,
        AgentConfig {
            exported_port: port,
            ..config()
        },
    );

    let err = session.register().await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::RegistrationFailed {
            cause: RegistrationStep::Connector(ConnectorError::Bind { .. }),
            ..
        }
    ));
    assert!(naming.is_empty());
    assert!(env.objects.is_empty().await);
}

#[tokio::test]
async fn test_invalid_host_fails_before_binding() {
    let naming = LocalNaming::new();
    let env = env(Arc::new(naming.clone()), Arc::new(TcpConnectorFactory::new()));
    let session = session_with(
        &env,
        AgentConfig {
            host: "not-an-ip".to_string(),
            ..config()
        },
    );

    assert!(matches!(
        session.register().await,
        Err(AgentError::RegistrationFailed {
            cause: RegistrationStep::Config(_),
            ..
        })
    ));
    assert!(env.objects.is_empty().await);
}

// ============================================================================
// Existing naming entries
// ============================================================================

#[tokio::test]
async fn test_stale_entry_is_overwritten() {
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let naming = LocalNaming::new();
    naming.bind_entry("rma/ABC_Backup", dead).unwrap();
    let env = env(Arc::new(naming.clone()), Arc::new(TcpConnectorFactory::new()));
    let session = session(&env);

    session.register().await.unwrap();
    let endpoint = session.endpoint().unwrap();
    assert_ne!(endpoint, dead);
    assert_eq!(naming.lookup_entry("rma/ABC_Backup"), Some(endpoint));

    session.unregister().await.unwrap();
}

#[tokio::test]
async fn test_live_endpoint_blocks_second_process() {
    // Two environments sharing one naming registry stand in for two
    // processes hosting the same component.
    let naming = LocalNaming::new();
    let first_env = env(Arc::new(naming.clone()), Arc::new(TcpConnectorFactory::new()));
    let second_env = env(Arc::new(naming.clone()), Arc::new(TcpConnectorFactory::new()));

    let first = session(&first_env);
    first.register().await.unwrap();

    let second = session(&second_env);
    assert!(matches!(
        second.register().await,
        Err(AgentError::AlreadyRegistered { .. })
    ));
    assert_eq!(second.state(), RegistrationState::Unregistered);
    assert!(second_env.objects.is_empty().await);
    assert_eq!(naming.lookup_entry("rma/ABC_Backup"), first.endpoint());

    first.unregister().await.unwrap();
}
