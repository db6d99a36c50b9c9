use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::coordinator::RunCoordinator;
use crate::error::RunError;
use crate::feed::FeedDescriptor;
use crate::fetcher::Fetcher;
use crate::notifier::Notifier;

pub struct SchedulerHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop. A cycle in flight is dropped before its commit, so the
    /// ledger keeps its previous state.
    pub async fn stop(self) -> Result<(), RunError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(RunError::from)
    }
}

/// Run a cycle immediately and then every `interval`. Cycles never overlap;
/// a failed cycle is logged and the loop keeps going.
pub fn spawn_scheduler<F, N>(
    coordinator: Arc<RunCoordinator<F, N>>,
    feeds: Arc<Vec<FeedDescriptor>>,
    interval: Duration,
) -> SchedulerHandle
where
    F: Fetcher + 'static,
    N: Notifier + 'static,
{
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("scheduler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel_rx.recv() => {
                            info!("scheduler shutdown requested; abandoning cycle in flight");
                            break;
                        }
                        result = coordinator.run_cycle(&feeds) => {
                            if let Err(err) = result {
                                error!(error = %err, "cycle failed");
                            }
                        }
                    }
                }
            }
        }
    });

    SchedulerHandle { cancel_tx, join }
}
