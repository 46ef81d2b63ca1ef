//! Agent sessions: the registration lifecycle of one exposed object graph.
//!
//! ```text
//!  Unregistered ──register──▶ Registering ──ok──▶ Registered
//!       ▲                         │                   │
//!       └────────── failure ──────┘              unregister
//!       │                                             ▼
//!       └─────────────────────────────────────── Unregistering
//! ```
//!
//! Every transition, and every watchdog repair, happens while holding the
//! session's registration lock, so they are totally ordered per session.
//! Attribute resolution never takes that lock.
//!
//! # Panic-Free Guarantees
//!
//! Failed registration steps roll back what the attempt already bound;
//! failed teardown steps are collected and reported after the remaining
//! steps ran.

mod endpoint;
mod info;

pub use endpoint::{EndpointContext, EndpointError, CONSOLE_INTERFACE};
pub use info::AgentInfo;

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use rma_core::{
    ComponentIdentity, ComponentInfo, ManagedObject, ObjectKind, TransactionStats,
};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::connector::{Connector, ConnectorFactory};
use crate::environment::AgentEnvironment;
use crate::error::{AgentError, BindingError, NamingError, RegistrationStep};
use crate::naming::NamingService;
use crate::objects::ObjectTable;
use crate::relay::NotificationRelay;
use crate::watchdog::{spawn_watchdog, WatchdogHandle};
use crate::AUDIT_TARGET;

// ============================================================================
// State
// ============================================================================

/// Registration state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Unregistering,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::Registering => "registering",
            Self::Registered => "registered",
            Self::Unregistering => "unregistering",
        };
        f.write_str(s)
    }
}

/// Result of one watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The naming entry points at the live endpoint
    Healthy,
    /// The connector was recreated and the entry rebound
    Repaired,
    /// Cancellation arrived before the check could start
    Cancelled,
    /// The session is not registered
    Idle,
}

/// What a successful registration holds until teardown.
struct LiveRegistration {
    connector: Box<dyn Connector>,
    endpoint: SocketAddr,
    bound: Vec<String>,
    context: Arc<EndpointContext>,
}

/// State guarded by the registration lock.
#[derive(Default)]
pub(crate) struct SessionInner {
    live: Option<LiveRegistration>,
    watchdog: Option<WatchdogHandle>,
}

pub(crate) type RegistrationGuard<'a> = MutexGuard<'a, SessionInner>;

struct SessionShared {
    identity: ComponentIdentity,
    root: Arc<dyn ManagedObject>,
    config: AgentConfig,
    naming: Arc<dyn NamingService>,
    connectors: Arc<dyn ConnectorFactory>,
    objects: ObjectTable,
    relay: NotificationRelay,
    info: Arc<AgentInfo>,
    services: Arc<TransactionStats>,
    connections: Arc<TransactionStats>,
    state: watch::Sender<RegistrationState>,
    inner: Mutex<SessionInner>,
}

// ============================================================================
// AgentSession
// ============================================================================

/// One exposed object graph and its registration. Cheap to clone; clones
/// share the session.
#[derive(Clone)]
pub struct AgentSession {
    shared: Arc<SessionShared>,
}

/// Non-owning reference held by the watchdog.
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<SessionShared>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<AgentSession> {
        self.0.upgrade().map(|shared| AgentSession { shared })
    }
}

impl AgentSession {
    /// Creates an unregistered session. `config` is the snapshot used for
    /// every registration of this session.
    pub fn new(
        identity: ComponentIdentity,
        root: Arc<dyn ManagedObject>,
        config: AgentConfig,
        env: &AgentEnvironment,
    ) -> Self {
        let relay = NotificationRelay::new(config.notification_capacity);
        let info = Arc::new(AgentInfo::new(&config, relay.clone()));
        let (state, _) = watch::channel(RegistrationState::Unregistered);

        Self {
            shared: Arc::new(SessionShared {
                identity,
                root,
                config,
                naming: Arc::clone(&env.naming),
                connectors: Arc::clone(&env.connectors),
                objects: env.objects.clone(),
                relay,
                info,
                services: Arc::new(TransactionStats::new("ServiceInfo")),
                connections: Arc::new(TransactionStats::new("ConnectionInfo")),
                state,
                inner: Mutex::new(SessionInner::default()),
            }),
        }
    }

    pub fn identity(&self) -> &ComponentIdentity {
        &self.shared.identity
    }

    pub fn root(&self) -> &Arc<dyn ManagedObject> {
        &self.shared.root
    }

    pub fn config(&self) -> &AgentConfig {
        &self.shared.config
    }

    pub fn state(&self) -> RegistrationState {
        *self.shared.state.borrow()
    }

    pub fn is_registered(&self) -> bool {
        self.state() == RegistrationState::Registered
    }

    /// Observes state transitions.
    pub fn watch_state(&self) -> watch::Receiver<RegistrationState> {
        self.shared.state.subscribe()
    }

    /// Waits for any in-flight register/unregister/repair to finish and
    /// returns the resulting state.
    pub async fn wait_settled(&self) -> RegistrationState {
        let _inner = self.shared.inner.lock().await;
        self.state()
    }

    /// Address the connector is serving on, while registered.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.shared.info.endpoint()
    }

    pub fn relay(&self) -> &NotificationRelay {
        &self.shared.relay
    }

    /// Statistics of host services, for the host to update.
    pub fn services(&self) -> &Arc<TransactionStats> {
        &self.shared.services
    }

    /// Statistics of console requests served by the connector.
    pub fn connections(&self) -> &Arc<TransactionStats> {
        &self.shared.connections
    }

    /// True if both handles refer to the same session.
    pub fn same_session(&self, other: &AgentSession) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.shared))
    }

    pub(crate) async fn lock_registration(&self) -> RegistrationGuard<'_> {
        self.shared.inner.lock().await
    }

    fn set_state(&self, state: RegistrationState) {
        self.shared.state.send_replace(state);
    }

    fn failed(&self, cause: impl Into<RegistrationStep>) -> AgentError {
        AgentError::RegistrationFailed {
            identity: self.shared.identity.to_string(),
            cause: cause.into(),
        }
    }

    fn already_registered(&self) -> AgentError {
        AgentError::AlreadyRegistered {
            identity: self.shared.identity.to_string(),
        }
    }

    // ========================================================================
    // Register
    // ========================================================================

    /// Registers the session: binds its objects, starts the connector,
    /// binds the naming entry and starts the watchdog.
    ///
    /// Valid only from `Unregistered`. On failure nothing from the attempt
    /// stays bound and the session is `Unregistered` again. When the
    /// configuration disables the agent this succeeds without doing
    /// anything.
    pub async fn register(&self) -> Result<(), AgentError> {
        let mut inner = self.lock_registration().await;
        self.register_locked(&mut inner).await
    }

    pub(crate) async fn register_locked(
        &self,
        inner: &mut RegistrationGuard<'_>,
    ) -> Result<(), AgentError> {
        if self.state() != RegistrationState::Unregistered {
            return Err(self.already_registered());
        }
        if !self.shared.config.enabled {
            info!(identity = %self.shared.identity, "Agent disabled by configuration, not registering");
            return Ok(());
        }

        self.set_state(RegistrationState::Registering);

        match self.bring_up().await {
            Ok(live) => {
                let endpoint = live.endpoint;
                self.shared.info.set_endpoint(Some(endpoint));
                inner.live = Some(live);
                inner.watchdog = Some(spawn_watchdog(
                    self.downgrade(),
                    self.shared.config.watchdog_interval(),
                ));
                self.set_state(RegistrationState::Registered);

                info!(
                    target: AUDIT_TARGET,
                    identity = %self.shared.identity,
                    endpoint = %endpoint,
                    naming = %self.shared.identity.naming_name(),
                    "Component registered"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(RegistrationState::Unregistered);
                warn!(
                    target: AUDIT_TARGET,
                    identity = %self.shared.identity,
                    error = %e,
                    "Component registration failed"
                );
                Err(e)
            }
        }
    }

    /// Runs the register steps, undoing completed ones on failure.
    async fn bring_up(&self) -> Result<LiveRegistration, AgentError> {
        let shared = &self.shared;
        let naming_name = shared.identity.naming_name();

        shared.identity.validate().map_err(|e| self.failed(e))?;
        let address = shared.config.exported_address().map_err(|e| self.failed(e))?;
        shared
            .naming
            .ensure_available()
            .await
            .map_err(|e| self.failed(e))?;
        let overwrite = self.check_existing_entry(&naming_name).await?;

        let mut bound = Vec::new();
        if let Err(e) = self.bind_objects(&mut bound).await {
            self.unbind_objects(&bound).await;
            return Err(e);
        }

        shared
            .root
            .attach_notifier(Arc::new(shared.relay.clone()));
        let context = Arc::new(EndpointContext::new(
            shared.identity.to_string(),
            shared.identity.object_name(ObjectKind::Application),
            bound.clone(),
            shared.objects.clone(),
            shared.relay.clone(),
            Arc::clone(&shared.connections),
        ));

        let mut connector = shared.connectors.create();
        let endpoint = match connector.start(address, Arc::clone(&context)).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.unbind_objects(&bound).await;
                return Err(self.failed(e));
            }
        };

        let named = if overwrite {
            shared.naming.rebind(&naming_name, endpoint).await
        } else {
            shared.naming.bind(&naming_name, endpoint).await
        };
        if let Err(e) = named {
            if let Err(stop) = connector.stop().await {
                warn!(identity = %shared.identity, error = %stop, "Failed to stop connector during rollback");
            }
            self.unbind_objects(&bound).await;
            return Err(match e {
                NamingError::AlreadyBound(_) => self.already_registered(),
                other => self.failed(other),
            });
        }

        Ok(LiveRegistration {
            connector,
            endpoint,
            bound,
            context,
        })
    }

    /// Looks for an existing naming entry. A live one means the identity
    /// is taken; a dead one is stale and will be overwritten (returns true).
    async fn check_existing_entry(&self, naming_name: &str) -> Result<bool, AgentError> {
        let existing = self
            .shared
            .naming
            .lookup(naming_name)
            .await
            .map_err(|e| self.failed(e))?;

        let Some(address) = existing else {
            return Ok(false);
        };

        if self.shared.connectors.probe(address).await {
            return Err(self.already_registered());
        }

        warn!(
            target: AUDIT_TARGET,
            identity = %self.shared.identity,
            naming = %naming_name,
            stale_endpoint = %address,
            "Overwriting stale naming entry"
        );
        Ok(true)
    }

    /// Binds one object per `ObjectKind`, recording each bound name.
    async fn bind_objects(&self, bound: &mut Vec<String>) -> Result<(), AgentError> {
        let shared = &self.shared;

        for kind in ObjectKind::ALL {
            let object: Arc<dyn ManagedObject> = match kind {
                ObjectKind::Application => Arc::clone(&shared.root),
                ObjectKind::Agent => Arc::clone(&shared.info) as Arc<dyn ManagedObject>,
                ObjectKind::ComponentInfo => {
                    Arc::new(ComponentInfo::capture(&shared.identity, &shared.root))
                }
                ObjectKind::Settings => Arc::new(shared.config.clone()),
                ObjectKind::ServiceInfo => Arc::clone(&shared.services) as Arc<dyn ManagedObject>,
                ObjectKind::ConnectionInfo => {
                    Arc::clone(&shared.connections) as Arc<dyn ManagedObject>
                }
                ObjectKind::Notifications => Arc::new(shared.relay.clone()),
            };

            let name = shared.identity.object_name(kind);
            match shared.objects.bind(&name, object).await {
                Ok(()) => bound.push(name),
                Err(BindingError::AlreadyBound(_)) if kind == ObjectKind::Application => {
                    return Err(self.already_registered());
                }
                Err(e) => return Err(self.failed(e)),
            }
        }

        debug!(identity = %shared.identity, objects = bound.len(), "Bound component objects");
        Ok(())
    }

    /// Best-effort rollback of `bind_objects`.
    async fn unbind_objects(&self, bound: &[String]) {
        for name in bound.iter().rev() {
            if let Err(e) = self.shared.objects.unbind(name).await {
                warn!(object = %name, error = %e, "Failed to unbind object during rollback");
            }
        }
    }

    // ========================================================================
    // Unregister
    // ========================================================================

    /// Stops the watchdog, then the connector, unbinds every object and
    /// the naming entry.
    ///
    /// Succeeds immediately when already unregistered. Always ends in
    /// `Unregistered`; failed steps are reported together.
    pub async fn unregister(&self) -> Result<(), AgentError> {
        let mut inner = self.lock_registration().await;
        self.unregister_locked(&mut inner).await
    }

    async fn unregister_locked(
        &self,
        inner: &mut RegistrationGuard<'_>,
    ) -> Result<(), AgentError> {
        if inner.live.is_none() && inner.watchdog.is_none() {
            self.set_state(RegistrationState::Unregistered);
            return Ok(());
        }

        self.set_state(RegistrationState::Unregistering);
        let shared = &self.shared;
        let mut failures: Vec<RegistrationStep> = Vec::new();

        if let Some(watchdog) = inner.watchdog.take() {
            watchdog.stop().await;
        }

        if let Some(mut live) = inner.live.take() {
            if let Err(e) = live.connector.stop().await {
                failures.push(e.into());
            }

            for name in live.bound.iter().rev() {
                if let Err(e) = shared.objects.unbind(name).await {
                    failures.push(e.into());
                }
            }

            match shared.naming.unbind(&shared.identity.naming_name()).await {
                Ok(()) | Err(NamingError::NotBound(_)) => {}
                Err(e) => failures.push(e.into()),
            }
        }

        shared.info.set_endpoint(None);
        self.set_state(RegistrationState::Unregistered);

        if failures.is_empty() {
            info!(target: AUDIT_TARGET, identity = %shared.identity, "Component unregistered");
            Ok(())
        } else {
            warn!(
                target: AUDIT_TARGET,
                identity = %shared.identity,
                failed_steps = failures.len(),
                "Component unregistered with failures"
            );
            Err(AgentError::UnregistrationIncomplete {
                identity: shared.identity.to_string(),
                failures,
            })
        }
    }

    /// Full unregister followed by a fresh register, as one serialized
    /// operation. Teardown failures are logged; the register result is
    /// returned.
    pub async fn reregister(&self) -> Result<(), AgentError> {
        let mut inner = self.lock_registration().await;
        if let Err(e) = self.unregister_locked(&mut inner).await {
            warn!(identity = %self.shared.identity, error = %e, "Teardown before re-registration incomplete");
        }
        self.register_locked(&mut inner).await
    }

    // ========================================================================
    // Repair
    // ========================================================================

    /// Checks the naming entry and the connector. If the entry no longer
    /// points at this session's endpoint, or the connector is not serving
    /// (an earlier repair failed part way), restarts the connector on the
    /// same address and rebinds the entry.
    ///
    /// Waiting for the registration lock gives way to `cancel`.
    pub async fn repair_if_stale(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RepairOutcome, AgentError> {
        let mut inner = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(RepairOutcome::Cancelled),
            inner = self.shared.inner.lock() => inner,
        };
        if cancel.is_cancelled() {
            return Ok(RepairOutcome::Cancelled);
        }

        let shared = &self.shared;
        let Some(live) = inner.live.as_mut() else {
            return Ok(RepairOutcome::Idle);
        };
        let naming_name = shared.identity.naming_name();

        let serving = live.connector.local_addr().is_some();
        match shared.naming.lookup(&naming_name).await {
            Ok(Some(address)) if address == live.endpoint && serving => {
                return Ok(RepairOutcome::Healthy)
            }
            Ok(Some(address)) if address == live.endpoint => {
                debug!(identity = %shared.identity, "Connector not serving, restarting")
            }
            Ok(found) => {
                debug!(identity = %shared.identity, found = ?found, "Naming entry missing or pointing elsewhere")
            }
            Err(e) => {
                debug!(identity = %shared.identity, error = %e, "Naming lookup failed, treating entry as missing")
            }
        }

        if let Err(e) = live.connector.stop().await {
            warn!(identity = %shared.identity, error = %e, "Failed to stop connector before repair");
        }

        shared
            .naming
            .ensure_available()
            .await
            .map_err(|e| self.failed(e))?;

        let mut connector = shared.connectors.create();
        connector
            .start(live.endpoint, Arc::clone(&live.context))
            .await
            .map_err(|e| self.failed(e))?;
        live.connector = connector;

        shared
            .naming
            .rebind(&naming_name, live.endpoint)
            .await
            .map_err(|e| self.failed(e))?;

        info!(
            target: AUDIT_TARGET,
            identity = %shared.identity,
            endpoint = %live.endpoint,
            "Repaired endpoint registration"
        );
        Ok(RepairOutcome::Repaired)
    }
}

impl fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSession")
            .field("identity", &self.shared.identity)
            .field("state", &self.state())
            .field("endpoint", &self.endpoint())
            .finish()
    }
}
