//! Integration tests for the registry watchdog.
//!
//! A registered session runs with a short watchdog interval while its
//! naming entry is dropped, redirected, or lost together with the whole
//! naming registry. Each time the entry must come back pointing at a
//! connector that answers. A naming double that fails or stalls on demand
//! covers failed repair ticks and teardown racing a repair.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rma_agent::{
    AgentClient, AgentConfig, AgentEnvironment, AgentSession, ConfigSource, LocalNaming,
    NamingError, NamingService, RegistrationState, RemoteNaming, TcpConnectorFactory,
};
use rma_core::{ComponentIdentity, ManagedObject, ManagedRecord, Value};
use tokio::sync::{Notify, Semaphore};
use tokio::time::{sleep, timeout, Instant};

// ============================================================================
// Constants
// ============================================================================

const WATCHDOG_INTERVAL_MS: u64 = 100;

/// Upper bound on how long a repair may take to show up
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Test Doubles
// ============================================================================

/// A `LocalNaming` whose lookups and availability checks can be made to
/// fail a number of times, or to stall until released.
struct UnsteadyNaming {
    table: LocalNaming,
    failing_lookups: AtomicUsize,
    failing_checks: AtomicUsize,
    stall_checks: AtomicBool,
    stalled: Notify,
    release: Semaphore,
}

impl UnsteadyNaming {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            table: LocalNaming::new(),
            failing_lookups: AtomicUsize::new(0),
            failing_checks: AtomicUsize::new(0),
            stall_checks: AtomicBool::new(false),
            stalled: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    fn outage() -> NamingError {
        NamingError::Unavailable {
            address: "unsteady".to_string(),
            reason: "temporarily down".to_string(),
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl NamingService for UnsteadyNaming {
    async fn bind(&self, name: &str, address: SocketAddr) -> Result<(), NamingError> {
        self.table.bind(name, address).await
    }

    async fn rebind(&self, name: &str, address: SocketAddr) -> Result<(), NamingError> {
        self.table.rebind(name, address).await
    }

    async fn lookup(&self, name: &str) -> Result<Option<SocketAddr>, NamingError> {
        if Self::take_failure(&self.failing_lookups) {
            return Err(Self::outage());
        }
        self.table.lookup(name).await
    }

    async fn unbind(&self, name: &str) -> Result<(), NamingError> {
        self.table.unbind(name).await
    }

    async fn list(&self) -> Result<Vec<String>, NamingError> {
        self.table.list().await
    }

    async fn ensure_available(&self) -> Result<(), NamingError> {
        if self.stall_checks.swap(false, Ordering::SeqCst) {
            self.stalled.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }
        if Self::take_failure(&self.failing_checks) {
            return Err(Self::outage());
        }
        Ok(())
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

fn config() -> AgentConfig {
    AgentConfig {
        exported_port: 0,
        watchdog_interval_ms: WATCHDOG_INTERVAL_MS,
        ..AgentConfig::default()
    }
}

fn session(naming: Arc<dyn NamingService>) -> AgentSession {
    let env = AgentEnvironment::new(
        ConfigSource::Fixed(config()),
        naming,
        Arc::new(TcpConnectorFactory::new()),
    );
    let root: Arc<dyn ManagedObject> = Arc::new(
        ManagedRecord::new("Application")
            .with_scalar("Name", "ABC")
            .with_scalar("Instance", "Backup"),
    );
    let identity = ComponentIdentity::from_root(&root, None).unwrap();
    AgentSession::new(identity, root, config(), &env)
}

async fn free_address() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Polls `naming` until `name` is bound to `expected`.
async fn wait_for_entry(naming: &dyn NamingService, name: &str, expected: SocketAddr) {
    let start = Instant::now();
    while start.elapsed() < RECOVERY_TIMEOUT {
        if let Ok(Some(address)) = naming.lookup(name).await {
            if address == expected {
                return;
            }
        }
        sleep(POLL_INTERVAL).await;
    }
    panic!("{name} was not bound to {expected} within {RECOVERY_TIMEOUT:?}");
}

/// Polls until a console can connect to `endpoint`.
async fn wait_for_serving(endpoint: SocketAddr) {
    let start = Instant::now();
    while start.elapsed() < RECOVERY_TIMEOUT {
        if let Ok(client) = AgentClient::connect(endpoint).await {
            client.close().await;
            return;
        }
        sleep(POLL_INTERVAL).await;
    }
    panic!("{endpoint} did not accept consoles within {RECOVERY_TIMEOUT:?}");
}

async fn assert_serving(endpoint: SocketAddr) {
    let mut client = AgentClient::connect(endpoint)
        .await
        .expect("repaired endpoint accepts consoles");
    assert_eq!(
        client.get("Name").await.unwrap().leaf(),
        Some(&Value::from("ABC"))
    );
    client.close().await;
}

// ============================================================================
// Local registry
// ============================================================================

#[tokio::test]
async fn test_dropped_entry_is_rebound() {
    let naming = LocalNaming::new();
    let session = session(Arc::new(naming.clone()));
    session.register().await.unwrap();
    let endpoint = session.endpoint().unwrap();

    naming.clear();
    wait_for_entry(&naming, "rma/ABC_Backup", endpoint).await;

    assert_eq!(session.endpoint(), Some(endpoint));
    assert_serving(endpoint).await;
    session.unregister().await.unwrap();
}

#[tokio::test]
async fn test_redirected_entry_is_restored() {
    let naming = LocalNaming::new();
    let session = session(Arc::new(naming.clone()));
    session.register().await.unwrap();
    let endpoint = session.endpoint().unwrap();

    naming.rebind_entry("rma/ABC_Backup", "127.0.0.1:9".parse().unwrap());
    wait_for_entry(&naming, "rma/ABC_Backup", endpoint).await;

    assert_serving(endpoint).await;
    session.unregister().await.unwrap();
}

#[tokio::test]
async fn test_watchdog_stops_with_unregister() {
    let naming = LocalNaming::new();
    let session = session(Arc::new(naming.clone()));
    session.register().await.unwrap();
    session.unregister().await.unwrap();

    naming.rebind_entry("rma/ABC_Backup", "127.0.0.1:9".parse().unwrap());
    sleep(Duration::from_millis(WATCHDOG_INTERVAL_MS * 4)).await;

    // Nothing put the entry back
    assert_eq!(
        naming.lookup_entry("rma/ABC_Backup"),
        Some("127.0.0.1:9".parse().unwrap())
    );
}

#[tokio::test]
async fn test_repeated_loss_is_repaired_each_time() {
    let naming = LocalNaming::new();
    let session = session(Arc::new(naming.clone()));
    session.register().await.unwrap();
    let endpoint = session.endpoint().unwrap();

    for _ in 0..3 {
        naming.clear();
        wait_for_entry(&naming, "rma/ABC_Backup", endpoint).await;
    }

    assert!(session.is_registered());
    assert_serving(endpoint).await;
    session.unregister().await.unwrap();
}

// ============================================================================
// Failed repairs
// ============================================================================

#[tokio::test]
async fn test_failed_repair_is_retried_next_tick() {
    let naming = UnsteadyNaming::new();
    let session = session(Arc::clone(&naming) as Arc<dyn NamingService>);
    session.register().await.unwrap();
    let endpoint = session.endpoint().unwrap();

    // One tick sees the registry down: the lookup fails, the connector is
    // stopped for the restart, then the availability check fails too. The
    // entry itself still points at the endpoint.
    naming.failing_lookups.store(1, Ordering::SeqCst);
    naming.failing_checks.store(1, Ordering::SeqCst);

    let start = Instant::now();
    while naming.failing_checks.load(Ordering::SeqCst) > 0 {
        assert!(start.elapsed() < RECOVERY_TIMEOUT, "watchdog never ticked");
        sleep(POLL_INTERVAL).await;
    }

    wait_for_serving(endpoint).await;
    assert_eq!(naming.table.lookup_entry("rma/ABC_Backup"), Some(endpoint));
    assert!(session.is_registered());
    assert_serving(endpoint).await;

    session.unregister().await.unwrap();
}

#[tokio::test]
async fn test_unregister_during_repair_leaves_nothing_running() {
    let naming = UnsteadyNaming::new();
    let session = session(Arc::clone(&naming) as Arc<dyn NamingService>);
    session.register().await.unwrap();
    let endpoint = session.endpoint().unwrap();

    // The next repair stalls inside the availability check while holding
    // the registration lock.
    naming.stall_checks.store(true, Ordering::SeqCst);
    naming.table.clear();
    timeout(RECOVERY_TIMEOUT, naming.stalled.notified())
        .await
        .expect("repair reached the naming registry");

    let teardown = tokio::spawn({
        let session = session.clone();
        async move { session.unregister().await }
    });
    sleep(Duration::from_millis(WATCHDOG_INTERVAL_MS)).await;
    assert!(!teardown.is_finished());

    naming.release.add_permits(1);
    timeout(RECOVERY_TIMEOUT, teardown)
        .await
        .expect("unregister finishes once the repair gives up the lock")
        .unwrap()
        .unwrap();

    assert_eq!(session.state(), RegistrationState::Unregistered);
    assert!(naming.table.is_empty());
    assert!(AgentClient::connect(endpoint).await.is_err());

    // No watchdog is left to bring the entry back
    sleep(Duration::from_millis(WATCHDOG_INTERVAL_MS * 3)).await;
    assert!(naming.table.is_empty());
}

// ============================================================================
// Embedded TCP registry
// ============================================================================

#[tokio::test]
async fn test_registry_restart_is_survived() {
    let naming = Arc::new(RemoteNaming::with_timeout(
        free_address().await,
        Duration::from_millis(500),
    ));
    let session = session(Arc::clone(&naming) as Arc<dyn NamingService>);

    session.register().await.unwrap();
    assert!(naming.owns_registry().await);
    let endpoint = session.endpoint().unwrap();
    assert_eq!(
        naming.lookup("rma/ABC_Backup").await.unwrap(),
        Some(endpoint)
    );

    // The registry goes away with every entry it held
    naming.shutdown_embedded().await;

    wait_for_entry(naming.as_ref(), "rma/ABC_Backup", endpoint).await;
    assert!(naming.owns_registry().await);
    assert_serving(endpoint).await;

    session.unregister().await.unwrap();
    assert_eq!(naming.lookup("rma/ABC_Backup").await.unwrap(), None);
    naming.shutdown_embedded().await;
}
