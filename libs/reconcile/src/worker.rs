//! Periodic driver for the reconciliation task.
//!
//! Runs the task on a fixed interval until shutdown is signaled. The cycle
//! is awaited inside the tick arm, so two cycles for the same client can
//! never overlap.

use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::task::ReconcileTask;

/// Worker that runs the reconciliation loop.
pub struct ReconcileWorker {
    task: ReconcileTask,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(task: ReconcileTask, interval: Duration) -> Self {
        Self { task, interval }
    }

    /// Runs the reconciliation loop until shutdown is signaled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconciliation worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.task.run().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconciliation worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
