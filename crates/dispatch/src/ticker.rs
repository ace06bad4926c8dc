//! Periodic delivery loop: ticks every running campaign on a fixed interval
//! until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::orchestrator::DispatchOrchestrator;

pub struct DeliveryTicker {
    orchestrator: Arc<DispatchOrchestrator>,
    interval: Duration,
}

impl DeliveryTicker {
    pub fn new(orchestrator: Arc<DispatchOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped. A tick
    /// in progress finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "Delivery ticker started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Delivery ticker shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.orchestrator.tick_all().await {
                        Ok(reports) => debug!(campaigns = reports.len(), "Delivery tick complete"),
                        Err(err) => error!(error = %err, kind = err.kind(), "Listing running campaigns failed"),
                    }
                }
            }
        }
    }
}
