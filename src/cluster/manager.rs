use crate::collector::cycle::{CycleState, CycleTrigger};
use crate::metrics::registry::MetricsRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Consecutive failed cycles after which the exporter reports unhealthy.
const UNHEALTHY_AFTER: u32 = 3;

/// Drives collection cycles for the cluster and tracks health.
///
/// Cycles block on the broker, so every trigger runs on the blocking pool.
pub struct ClusterManager {
    trigger: Arc<dyn CycleTrigger>,
    registry: Arc<MetricsRegistry>,
    poll_interval: Duration,
    consecutive_errors: AtomicU32,
}

impl ClusterManager {
    pub fn new(
        trigger: Arc<dyn CycleTrigger>,
        registry: Arc<MetricsRegistry>,
        poll_interval: Duration,
    ) -> Self {
        info!(poll_interval = ?poll_interval, "Created cluster manager");
        Self {
            trigger,
            registry,
            poll_interval,
            consecutive_errors: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> CycleState {
        self.trigger.state()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// Run one cycle and wait for it. Waits behind a cycle already in progress.
    pub async fn collect(&self) -> CycleState {
        let trigger = Arc::clone(&self.trigger);
        let outcome = match tokio::task::spawn_blocking(move || trigger.run_cycle()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Collection task panicked");
                CycleState::Failed
            }
        };
        self.record_outcome(outcome);
        outcome
    }

    fn record_outcome(&self, outcome: CycleState) {
        if outcome == CycleState::Succeeded {
            self.consecutive_errors.store(0, Ordering::SeqCst);
            self.registry.set_healthy(true);
            return;
        }

        let consecutive_errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if consecutive_errors >= UNHEALTHY_AFTER {
            if self.registry.is_healthy() {
                warn!(consecutive_errors, "Marking exporter unhealthy");
            }
            self.registry.set_healthy(false);
        } else {
            debug!(consecutive_errors, "Collection failed");
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting collection loop");

        let mut interval = tokio::time::interval(self.poll_interval);
        // A long cycle delays the next tick instead of triggering a burst
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.collect().await;
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        info!("Collection loop stopped");
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("poll_interval", &self.poll_interval)
            .field("consecutive_errors", &self.consecutive_errors())
            .finish_non_exhaustive()
    }
}
