use crate::collector::lag_calculator::LagAggregator;
use crate::collector::offset_collector::{GroupCatalog, GroupOffsetFetcher};
use crate::error::Result;
use crate::kafka::BrokerConnector;
use crate::metrics::registry::MetricsRegistry;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    /// No cycle has run yet.
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl CycleState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Entry point shared by the timer and the scrape handler.
pub trait CycleTrigger: Send + Sync {
    /// Run one cycle, blocking until any cycle already in progress has finished.
    fn run_cycle(&self) -> CycleState;

    fn state(&self) -> CycleState;
}

#[derive(Debug, Default, Clone, Copy)]
struct CycleSummary {
    groups: usize,
    topics: usize,
}

/// Broker resources owned by the cycle. Only touched while the session lock
/// is held, which serializes cycles.
struct Session<C: BrokerConnector> {
    /// `None` after a failed reconnect; the next cycle connects first.
    admin: Option<Arc<C::Admin>>,
    cursor: C::Cursor,
}

/// One collection pass: list groups, fetch committed offsets, probe log ends,
/// sum per topic and publish.
///
/// The first error aborts the pass. Groups already published in that pass keep
/// their new values and the remaining groups keep their previous ones. The admin
/// connection is then replaced; the read cursor is kept.
pub struct CollectionCycle<C: BrokerConnector> {
    connector: C,
    catalog: GroupCatalog,
    registry: Arc<MetricsRegistry>,
    session: Mutex<Session<C>>,
    state_tx: watch::Sender<CycleState>,
}

impl<C: BrokerConnector> CollectionCycle<C> {
    pub fn new(
        connector: C,
        catalog: GroupCatalog,
        registry: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        let cursor = connector.open_cursor()?;
        let admin = Arc::new(connector.connect_admin()?);
        let (state_tx, _) = watch::channel(CycleState::Idle);

        Ok(Self {
            connector,
            catalog,
            registry,
            session: Mutex::new(Session {
                admin: Some(admin),
                cursor,
            }),
            state_tx,
        })
    }

    pub fn state(&self) -> CycleState {
        *self.state_tx.borrow()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<CycleState> {
        self.state_tx.subscribe()
    }

    /// Current admin handle; blocks while a cycle is running.
    #[cfg(test)]
    pub fn admin_handle(&self) -> Option<Arc<C::Admin>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admin
            .clone()
    }

    #[instrument(skip(self))]
    pub fn run(&self) -> CycleState {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        self.state_tx.send_replace(CycleState::Running);
        let start = Instant::now();

        let outcome = match self.collect(&mut session) {
            Ok(summary) => {
                self.registry.mark_updated();
                info!(
                    groups = summary.groups,
                    topics = summary.topics,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Collection cycle completed"
                );
                CycleState::Succeeded
            }
            Err(e) => {
                error!(
                    error = %e,
                    upstream = e.is_upstream(),
                    "Collection cycle failed"
                );
                self.recreate_admin(&mut session);
                CycleState::Failed
            }
        };

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.registry.set_scrape_duration_ms(elapsed_ms);
        self.state_tx.send_replace(outcome);
        outcome
    }

    fn collect(&self, session: &mut Session<C>) -> Result<CycleSummary> {
        let admin = match &session.admin {
            Some(admin) => Arc::clone(admin),
            None => {
                let admin = Arc::new(self.connector.connect_admin()?);
                session.admin = Some(Arc::clone(&admin));
                admin
            }
        };

        let groups = self.catalog.list_groups(admin.as_ref())?;
        let fetcher = GroupOffsetFetcher::new(admin.as_ref());
        let mut summary = CycleSummary::default();

        // Sequential: the cursor is a single resource
        for group in &groups {
            let committed = fetcher.fetch_committed_offsets(group)?;
            let metrics = LagAggregator::aggregate(group, &committed, &mut session.cursor)?;

            let lag_per_topic = metrics.total_lag_per_topic();
            let offset_per_topic = metrics.total_current_offset_per_topic();

            for (topic, lag) in &lag_per_topic {
                let offset = offset_per_topic.get(topic).copied().unwrap_or_default();
                self.registry.publish(group, topic, *lag, offset);
            }

            debug!(
                group = %group,
                partitions = committed.len(),
                topics = lag_per_topic.len(),
                "Published group metrics"
            );
            summary.groups += 1;
            summary.topics += lag_per_topic.len();
        }

        Ok(summary)
    }

    fn recreate_admin(&self, session: &mut Session<C>) {
        // Drop the old handle before connecting so a broken client is never reused
        session.admin = None;

        match self.connector.connect_admin() {
            Ok(admin) => {
                warn!("Recreated admin connection after failure");
                session.admin = Some(Arc::new(admin));
            }
            Err(e) => {
                error!(error = %e, "Failed to recreate admin connection, retrying next cycle");
            }
        }
    }
}

impl<C: BrokerConnector> CycleTrigger for CollectionCycle<C> {
    fn run_cycle(&self) -> CycleState {
        self.run()
    }

    fn state(&self) -> CycleState {
        CollectionCycle::state(self)
    }
}

impl<C: BrokerConnector> std::fmt::Debug for CollectionCycle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCycle")
            .field("state", &self.state())
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}
