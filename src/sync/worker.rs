//! Background sync worker
//!
//! A single consumer loop per orchestrator: it ticks the interval timer,
//! drains fire-and-forget requests and exits on shutdown. The loop awaits
//! each pass inline, so shutdown is only observed between passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::orchestrator::SyncOrchestrator;
use super::SyncTrigger;
use crate::connectivity::Subscription;

/// Cheap, cloneable handle for requesting a pass without waiting for it
#[derive(Clone)]
pub struct SyncHandle {
    sender: mpsc::Sender<SyncTrigger>,
}

impl SyncHandle {
    pub(super) fn new(sender: mpsc::Sender<SyncTrigger>) -> Self {
        Self { sender }
    }

    /// Queue a pass request. Returns `false` if the request was dropped
    /// because the queue is already full.
    pub fn request(&self, trigger: SyncTrigger) -> bool {
        match self.sender.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(?trigger, "Sync queue full, request dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(?trigger, "Sync queue closed, request dropped");
                false
            }
        }
    }
}

/// Running worker owned by the orchestrator
pub(super) struct WorkerHandle {
    shutdown: oneshot::Sender<()>,
    _task: JoinHandle<()>,
    _subscription: Subscription,
}

impl WorkerHandle {
    /// Signal the loop to exit once the current pass, if any, finishes
    pub(super) fn shutdown(self) {
        let _ = self.shutdown.send(());
        // Dropping the subscription unregisters the reconnect listener
    }
}

pub(super) fn spawn(orchestrator: Arc<SyncOrchestrator>, subscription: Subscription) -> WorkerHandle {
    let (shutdown, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run(orchestrator, shutdown_rx));

    WorkerHandle {
        shutdown,
        _task: task,
        _subscription: subscription,
    }
}

async fn run(orchestrator: Arc<SyncOrchestrator>, mut shutdown: oneshot::Receiver<()>) {
    // A previous loop may still be finishing its last pass
    let mut receiver = orchestrator.request_rx.lock().await;

    let period = Duration::from_secs(orchestrator.config().interval_secs);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("Sync worker started");

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            // The first tick completes immediately
            _ = ticker.tick() => {
                orchestrator.run_pass(SyncTrigger::Timer).await;
            }

            Some(trigger) = receiver.recv() => {
                // Coalesce a burst of requests into one pass
                while receiver.try_recv().is_ok() {}
                orchestrator.run_pass(trigger).await;
            }
        }
    }

    tracing::info!("Sync worker stopped");
}
