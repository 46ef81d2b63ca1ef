//! Registration watchdog.
//!
//! One task per registered session. Every interval it asks the session to
//! compare its naming entry with its endpoint and repair the registration
//! when the entry has gone missing or points elsewhere. Failed checks are
//! logged and retried on the next tick; the task ends only when cancelled
//! or when the session it watches is gone.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{RepairOutcome, WeakSession};

/// Running watchdog task.
pub struct WatchdogHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Cancels the task and waits until it has exited.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Watchdog task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

pub(crate) fn spawn_watchdog(session: WeakSession, period: Duration) -> WatchdogHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(session, period, cancel.clone()));
    WatchdogHandle { cancel, task }
}

async fn run(session: WeakSession, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(interval = ?period, "Watchdog started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(session) = session.upgrade() else {
            debug!("Watched session dropped");
            break;
        };

        match session.repair_if_stale(&cancel).await {
            Ok(RepairOutcome::Healthy) => {
                debug!(identity = %session.identity(), "Registration healthy");
            }
            Ok(RepairOutcome::Repaired) => {
                info!(identity = %session.identity(), "Watchdog repaired registration");
            }
            Ok(RepairOutcome::Idle) => {
                debug!(identity = %session.identity(), "Session not registered, nothing to check");
            }
            Ok(RepairOutcome::Cancelled) => break,
            Err(e) => {
                warn!(
                    identity = %session.identity(),
                    error = %e,
                    next_attempt_in = ?period,
                    "Watchdog repair failed"
                );
            }
        }
    }

    debug!("Watchdog stopped");
}
