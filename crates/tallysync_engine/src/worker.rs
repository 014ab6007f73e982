//! Background reconciliation worker.
//!
//! Drains the orchestrator's schedule queue one key at a time, re-queues
//! offline keys with exponential backoff, and optionally re-checks every
//! known key on a fixed interval.

use crate::error::SyncError;
use crate::orchestrator::SyncOrchestrator;
use crate::state::SyncOutcome;
use std::sync::Arc;
use tallysync_core::EntityKey;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Handle to a running worker.
///
/// Dropping the handle stops the worker after its current round;
/// [`shutdown`](Self::shutdown) also waits for it.
pub struct SyncWorker {
    orchestrator: Arc<SyncOrchestrator>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Spawns a worker for `orchestrator` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(orchestrator: Arc<SyncOrchestrator>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        orchestrator.attach_scheduler(queue_tx.clone());

        let handle = tokio::spawn(run(Arc::clone(&orchestrator), queue_tx, queue_rx, shutdown_rx));
        Self {
            orchestrator,
            shutdown: shutdown_tx,
            handle,
        }
    }

    /// Returns true while the worker task is running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the worker and waits for the current round to finish.
    pub async fn shutdown(self) {
        self.orchestrator.detach_scheduler();
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            error!(error = %err, "sync worker terminated abnormally");
        }
    }
}

async fn run(
    orchestrator: Arc<SyncOrchestrator>,
    queue_tx: mpsc::UnboundedSender<EntityKey>,
    mut queue_rx: mpsc::UnboundedReceiver<EntityKey>,
    mut shutdown: watch::Receiver<bool>,
) {
    let tenant = orchestrator.tenant().namespace().to_string();
    let mut ticker = orchestrator.config().sync_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    info!(tenant = %tenant, "sync worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(key) = queue_rx.recv() => {
                orchestrator.take_pending(&key);
                handle_key(&orchestrator, &queue_tx, &key).await;
            }
            () = tick(&mut ticker) => {
                debug!(tenant = %tenant, "periodic re-check");
                for key in orchestrator.known_keys() {
                    orchestrator.schedule(&key);
                }
            }
        }
    }

    info!(tenant = %tenant, "sync worker stopped");
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn handle_key(
    orchestrator: &Arc<SyncOrchestrator>,
    queue_tx: &mpsc::UnboundedSender<EntityKey>,
    key: &EntityKey,
) {
    let tenant = orchestrator.tenant().namespace();
    match orchestrator.sync_key(key).await {
        Ok(report) => match report.outcome {
            SyncOutcome::Superseded => orchestrator.schedule(key),
            SyncOutcome::Offline => retry_later(orchestrator, queue_tx, key),
            SyncOutcome::Quarantined(_) => {
                warn!(tenant = %tenant, key = %key, "remote payload quarantined; waiting for a newer copy");
            }
            SyncOutcome::UpToDate | SyncOutcome::Pulled { .. } | SyncOutcome::Pushed => {
                if report.state.needs_sync() {
                    orchestrator.schedule(key);
                }
            }
        },
        Err(SyncError::AuthRequired) => {
            warn!(tenant = %tenant, key = %key, "remote requires login; key parked until login");
        }
        Err(err) if err.is_retryable() => retry_later(orchestrator, queue_tx, key),
        Err(err) => {
            error!(tenant = %tenant, key = %key, error = %err, "reconciliation failed");
        }
    }
}

/// Re-queues a key after the backoff delay for its attempt count.
/// Once the backoff stops growing the key keeps polling at the capped
/// delay; only a policy without retries leaves it for the next write,
/// login or interval tick.
fn retry_later(orchestrator: &Arc<SyncOrchestrator>, queue_tx: &mpsc::UnboundedSender<EntityKey>, key: &EntityKey) {
    let retry = &orchestrator.config().retry;
    let attempts = orchestrator.attempts(key);
    let Some(delay) = retry.next_delay(attempts) else {
        warn!(
            tenant = %orchestrator.tenant().namespace(),
            key = %key,
            attempts,
            "automatic retries disabled; staying offline"
        );
        return;
    };
    if attempts == retry.max_attempts {
        warn!(
            tenant = %orchestrator.tenant().namespace(),
            key = %key,
            attempts,
            ?delay,
            "remote still unreachable; polling at the capped delay"
        );
    }

    orchestrator.note_retry();
    debug!(tenant = %orchestrator.tenant().namespace(), key = %key, attempts, ?delay, "scheduling retry");

    let queue_tx = queue_tx.clone();
    let key = key.clone();
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // a closed queue means the worker is gone
        if !queue_tx.is_closed() {
            orchestrator.schedule(&key);
        }
    });
}
