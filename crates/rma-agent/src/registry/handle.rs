//! Client interface of the endpoint registry.
//!
//! # Panic-Free Guarantees
//!
//! Channel errors are mapped to `AgentError::ChannelClosed`.

use std::sync::Arc;

use rma_core::{ComponentIdentity, ManagedObject};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use super::commands::{RegistryCommand, RegistryEvent, Reservation};
use crate::environment::AgentEnvironment;
use crate::error::AgentError;
use crate::session::{AgentSession, RegistrationState};

/// How `get_or_create_session` treats an identity that is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// Explicit component registration: a duplicate is `AlreadyRegistered`
    Component,
    /// Default/infrastructure path: return the registered session
    Infrastructure,
    /// Unregister the holder, then register the new session
    Replace,
}

/// Process-wide map of component identities to live sessions.
///
/// Cheap to clone; clones talk to the same actor.
#[derive(Clone)]
pub struct EndpointRegistry {
    sender: mpsc::Sender<RegistryCommand>,
    event_sender: broadcast::Sender<RegistryEvent>,
    env: AgentEnvironment,
}

impl EndpointRegistry {
    pub(crate) fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
        env: AgentEnvironment,
    ) -> Self {
        Self {
            sender,
            event_sender,
            env,
        }
    }

    pub fn environment(&self) -> &AgentEnvironment {
        &self.env
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        rx.await.map_err(|_| AgentError::ChannelClosed)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Returns the session for `identity`, creating and registering one if
    /// needed.
    ///
    /// # Errors
    ///
    /// - `AgentError::AlreadyRegistered` in `Component` mode when the
    ///   identity is held, or when a live endpoint already serves it
    /// - `AgentError::RegistrationFailed` when configuration or any
    ///   register step fails
    /// - `AgentError::ChannelClosed` if the registry actor has stopped
    pub async fn get_or_create_session(
        &self,
        identity: ComponentIdentity,
        root: Arc<dyn ManagedObject>,
        mode: RegistrationMode,
    ) -> Result<AgentSession, AgentError> {
        let config = self
            .env
            .config
            .load()
            .map_err(|e| AgentError::RegistrationFailed {
                identity: identity.to_string(),
                cause: e.into(),
            })?;

        let session = AgentSession::new(identity.clone(), root, config, &self.env);
        if !session.config().enabled {
            info!(identity = %identity, "Agent disabled, session not recorded");
            return Ok(session);
        }

        // Held from before the reservation, so anyone who finds this
        // session waits for its registration to settle.
        let mut guard = session.lock_registration().await;

        let reservation = self
            .request(|respond_to| RegistryCommand::Reserve {
                identity: identity.clone(),
                session: session.clone(),
                respond_to,
            })
            .await?;

        if let Reservation::Existing(existing) = reservation {
            match mode {
                RegistrationMode::Component => {
                    return Err(AgentError::AlreadyRegistered {
                        identity: identity.to_string(),
                    });
                }
                RegistrationMode::Infrastructure => {
                    if existing.wait_settled().await == RegistrationState::Registered {
                        return Ok(existing);
                    }
                    // Holder failed or was torn down outside the registry
                    self.replace(&identity, &session).await?;
                }
                RegistrationMode::Replace => {
                    if let Err(e) = existing.unregister().await {
                        warn!(identity = %identity, error = %e, "Replaced session teardown incomplete");
                    }
                    self.replace(&identity, &session).await?;
                }
            }
        }

        let registered = session.register_locked(&mut guard).await;
        drop(guard);

        match registered {
            Ok(()) => {
                let confirmed = self
                    .sender
                    .send(RegistryCommand::Confirm {
                        identity,
                        session: session.clone(),
                    })
                    .await;
                if confirmed.is_err() {
                    // Nobody would ever tear this session down
                    if let Err(e) = session.unregister().await {
                        warn!(identity = %session.identity(), error = %e, "Untracked session teardown incomplete");
                    }
                    return Err(AgentError::ChannelClosed);
                }
                Ok(session)
            }
            Err(e) => {
                self.request(|respond_to| RegistryCommand::Release {
                    identity,
                    session,
                    respond_to,
                })
                .await?;
                Err(e)
            }
        }
    }

    async fn replace(
        &self,
        identity: &ComponentIdentity,
        session: &AgentSession,
    ) -> Result<(), AgentError> {
        self.request(|respond_to| RegistryCommand::Replace {
            identity: identity.clone(),
            session: session.clone(),
            respond_to,
        })
        .await
    }

    /// Explicit component registration; identity is read from `root`.
    pub async fn register_component(
        &self,
        root: Arc<dyn ManagedObject>,
        shared_key: Option<String>,
    ) -> Result<AgentSession, AgentError> {
        let identity =
            ComponentIdentity::from_root(&root, shared_key).map_err(AgentError::IncompatibleTarget)?;
        self.get_or_create_session(identity, root, RegistrationMode::Component)
            .await
    }

    /// Idempotent registration; returns the existing session if one is
    /// registered for the identity read from `root`.
    pub async fn register_infrastructure(
        &self,
        root: Arc<dyn ManagedObject>,
        shared_key: Option<String>,
    ) -> Result<AgentSession, AgentError> {
        let identity =
            ComponentIdentity::from_root(&root, shared_key).map_err(AgentError::IncompatibleTarget)?;
        self.get_or_create_session(identity, root, RegistrationMode::Infrastructure)
            .await
    }

    // ========================================================================
    // Queries and teardown
    // ========================================================================

    /// Registered session for `(name, instance, auth_key)`.
    pub async fn lookup(
        &self,
        name: &str,
        instance: &str,
        auth_key: Option<&str>,
    ) -> Option<AgentSession> {
        let key = ComponentIdentity::new(name, instance, auth_key.map(str::to_string)).key();
        self.request(|respond_to| RegistryCommand::Lookup { key, respond_to })
            .await
            .ok()
            .flatten()
    }

    /// Removes the session for `identity` and unregisters it.
    ///
    /// Returns `Ok(false)` if no session was held.
    pub async fn remove(&self, identity: &ComponentIdentity) -> Result<bool, AgentError> {
        let removed = self
            .request(|respond_to| RegistryCommand::Remove {
                identity: identity.clone(),
                respond_to,
            })
            .await?;

        match removed {
            Some(session) => session.unregister().await.map(|()| true),
            None => Ok(false),
        }
    }

    /// All registered sessions, ordered by registry key.
    pub async fn sessions(&self) -> Vec<AgentSession> {
        self.request(|respond_to| RegistryCommand::List { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Unregisters every held session. Every session is torn down; the
    /// first failure is returned.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        let sessions = self
            .request(|respond_to| RegistryCommand::Drain { respond_to })
            .await?;

        let mut first_error = None;
        for session in sessions {
            if let Err(e) = session.unregister().await {
                warn!(identity = %session.identity(), error = %e, "Session teardown incomplete");
                first_error.get_or_insert(e);
            }
        }

        info!("Endpoint registry shut down");
        first_error.map_or(Ok(()), Err)
    }

    /// Subscribes to registration events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Returns `true` while the actor is running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
