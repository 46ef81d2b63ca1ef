//! Registry actor - owns the identity → session map.
//!
//! # Panic-Free Guarantees
//!
//! Reply and event send failures are ignored: a caller that dropped its
//! receiver no longer cares, and having no event subscribers is normal.

use std::collections::HashMap;

use rma_core::ComponentIdentity;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::commands::{RegistryCommand, RegistryEvent, RemovalReason, Reservation};
use crate::session::AgentSession;

struct Entry {
    identity: ComponentIdentity,
    session: AgentSession,
    /// False while the owner is still registering
    confirmed: bool,
}

/// Single owner of the registry map; processes commands sequentially.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    entries: HashMap<String, Entry>,
    event_publisher: broadcast::Sender<RegistryEvent>,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            receiver,
            entries: HashMap::new(),
            event_publisher,
        }
    }

    /// Processes commands until every handle is dropped.
    pub async fn run(mut self) {
        info!("Endpoint registry starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.entries.len(), "Endpoint registry stopped");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Reserve {
                identity,
                session,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_reserve(identity, session));
            }
            RegistryCommand::Confirm { identity, session } => {
                self.handle_confirm(&identity, &session);
            }
            RegistryCommand::Release {
                identity,
                session,
                respond_to,
            } => {
                self.handle_release(&identity, &session);
                let _ = respond_to.send(());
            }
            RegistryCommand::Replace {
                identity,
                session,
                respond_to,
            } => {
                self.handle_replace(identity, session);
                let _ = respond_to.send(());
            }
            RegistryCommand::Lookup { key, respond_to } => {
                let found = self
                    .entries
                    .get(&key)
                    .filter(|e| e.confirmed)
                    .map(|e| e.session.clone());
                let _ = respond_to.send(found);
            }
            RegistryCommand::Remove {
                identity,
                respond_to,
            } => {
                let removed = self.remove(&identity.key(), RemovalReason::Explicit);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::List { respond_to } => {
                let mut sessions: Vec<AgentSession> = self
                    .entries
                    .values()
                    .filter(|e| e.confirmed)
                    .map(|e| e.session.clone())
                    .collect();
                sessions.sort_by_key(|s| s.identity().key());
                let _ = respond_to.send(sessions);
            }
            RegistryCommand::Drain { respond_to } => {
                let keys: Vec<String> = self.entries.keys().cloned().collect();
                let drained = keys
                    .iter()
                    .filter_map(|k| self.remove(k, RemovalReason::Shutdown))
                    .collect();
                let _ = respond_to.send(drained);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_reserve(&mut self, identity: ComponentIdentity, session: AgentSession) -> Reservation {
        let key = identity.key();
        if let Some(existing) = self.entries.get(&key) {
            debug!(identity = %identity, confirmed = existing.confirmed, "Identity already held");
            return Reservation::Existing(existing.session.clone());
        }

        debug!(identity = %identity, "Identity reserved");
        self.entries.insert(
            key,
            Entry {
                identity,
                session,
                confirmed: false,
            },
        );
        Reservation::Reserved
    }

    fn handle_confirm(&mut self, identity: &ComponentIdentity, session: &AgentSession) {
        let Some(entry) = self.entries.get_mut(&identity.key()) else {
            debug!(identity = %identity, "Confirm for unknown identity ignored");
            return;
        };
        if !entry.session.same_session(session) {
            debug!(identity = %identity, "Confirm from displaced session ignored");
            return;
        }

        entry.confirmed = true;
        let _ = self.event_publisher.send(RegistryEvent::SessionRegistered {
            identity: identity.clone(),
        });
    }

    fn handle_release(&mut self, identity: &ComponentIdentity, session: &AgentSession) {
        let key = identity.key();
        let owned = self
            .entries
            .get(&key)
            .is_some_and(|e| e.session.same_session(session));
        if owned {
            self.entries.remove(&key);
            debug!(identity = %identity, "Reservation released");
        }
    }

    fn handle_replace(&mut self, identity: ComponentIdentity, session: AgentSession) {
        let key = identity.key();
        let displaced = self.entries.insert(
            key,
            Entry {
                identity,
                session,
                confirmed: false,
            },
        );

        if let Some(old) = displaced.filter(|e| e.confirmed) {
            let _ = self.event_publisher.send(RegistryEvent::SessionRemoved {
                identity: old.identity,
                reason: RemovalReason::Replaced,
            });
        }
    }

    fn remove(&mut self, key: &str, reason: RemovalReason) -> Option<AgentSession> {
        let entry = self.entries.remove(key)?;
        debug!(identity = %entry.identity, reason = %reason, "Session removed from registry");

        if entry.confirmed {
            let _ = self.event_publisher.send(RegistryEvent::SessionRemoved {
                identity: entry.identity,
                reason,
            });
        }
        Some(entry.session)
    }
}
