//! In-memory broker doubles for collector and cycle tests.

use crate::error::{ExporterError, Result};
use crate::kafka::client::{AdminApi, BrokerConnector, TopicPartition};
use crate::kafka::consumer::EndOffsetCursor;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ClusterState {
    groups: Vec<String>,
    committed: HashMap<String, HashMap<TopicPartition, i64>>,
    log_end: HashMap<TopicPartition, i64>,
    failing_groups: HashSet<String>,
    fail_listing: bool,
    events: Vec<String>,
    probe_delay: Duration,
}

/// Shared fake cluster; every handle created from it sees the same state.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `group` with `(topic, partition, committed, log_end)` entries.
    pub fn with_group(self, group: &str, partitions: &[(&str, i32, i64, i64)]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.groups.push(group.to_string());
            let committed = state.committed.entry(group.to_string()).or_default();
            let mut ends = Vec::new();
            for (topic, partition, offset, end) in partitions {
                let tp = TopicPartition::new(*topic, *partition);
                committed.insert(tp.clone(), *offset);
                ends.push((tp, *end));
            }
            state.log_end.extend(ends);
        }
        self
    }

    pub fn with_probe_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().probe_delay = delay;
        self
    }

    pub fn fail_group(&self, group: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_groups
            .insert(group.to_string());
    }

    pub fn heal_group(&self, group: &str) {
        self.state.lock().unwrap().failing_groups.remove(group);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_listing = fail;
    }

    pub fn set_log_end(&self, topic: &str, partition: i32, end: i64) {
        self.state
            .lock()
            .unwrap()
            .log_end
            .insert(TopicPartition::new(topic, partition), end);
    }

    /// Forget the log end of a partition, as if it had no reachable leader.
    pub fn drop_log_end(&self, topic: &str, partition: i32) {
        self.state
            .lock()
            .unwrap()
            .log_end
            .remove(&TopicPartition::new(topic, partition));
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn record(&self, event: String) {
        self.state.lock().unwrap().events.push(event);
    }
}

pub struct FakeAdmin {
    cluster: FakeCluster,
    pub id: u64,
}

impl AdminApi for FakeAdmin {
    fn list_group_ids(&self) -> Result<Vec<String>> {
        self.cluster.record("list".to_string());
        let state = self.cluster.state.lock().unwrap();
        if state.fail_listing {
            return Err(ExporterError::UpstreamUnavailable(
                "coordinator not available".to_string(),
            ));
        }
        Ok(state.groups.clone())
    }

    fn committed_offsets(&self, group_id: &str) -> Result<HashMap<TopicPartition, i64>> {
        self.cluster.record(format!("offsets:{group_id}"));
        let state = self.cluster.state.lock().unwrap();
        if state.failing_groups.contains(group_id) {
            return Err(ExporterError::UpstreamUnavailable(format!(
                "connection reset while fetching {group_id}"
            )));
        }
        Ok(state.committed.get(group_id).cloned().unwrap_or_default())
    }
}

pub struct FakeCursor {
    cluster: FakeCluster,
    /// Partitions this cursor was assigned to, in call order.
    pub assignments: Vec<TopicPartition>,
    current: Option<TopicPartition>,
}

impl FakeCursor {
    pub fn new(cluster: &FakeCluster) -> Self {
        Self {
            cluster: cluster.clone(),
            assignments: Vec::new(),
            current: None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.current.is_some()
    }
}

impl EndOffsetCursor for FakeCursor {
    fn log_end_offset(&mut self, tp: &TopicPartition) -> Result<i64> {
        self.assignments.push(tp.clone());
        self.current = Some(tp.clone());
        self.cluster
            .record(format!("probe:{}/{}:begin", tp.topic, tp.partition));
        let (delay, end) = {
            let state = self.cluster.state.lock().unwrap();
            (state.probe_delay, state.log_end.get(tp).copied())
        };
        std::thread::sleep(delay);
        self.cluster
            .record(format!("probe:{}/{}:end", tp.topic, tp.partition));
        self.current = None;
        end.ok_or_else(|| {
            ExporterError::UpstreamUnavailable(format!(
                "leader not available for {}/{}",
                tp.topic, tp.partition
            ))
        })
    }
}

pub struct FakeConnector {
    cluster: FakeCluster,
    connects: AtomicU64,
    cursors: AtomicU64,
    refuse: AtomicBool,
}

impl FakeConnector {
    pub fn new(cluster: &FakeCluster) -> Self {
        Self {
            cluster: cluster.clone(),
            connects: AtomicU64::new(0),
            cursors: AtomicU64::new(0),
            refuse: AtomicBool::new(false),
        }
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn cursors(&self) -> u64 {
        self.cursors.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl BrokerConnector for FakeConnector {
    type Admin = FakeAdmin;
    type Cursor = FakeCursor;

    fn connect_admin(&self) -> Result<FakeAdmin> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ExporterError::UpstreamUnavailable(
                "connection refused".to_string(),
            ));
        }
        let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeAdmin {
            cluster: self.cluster.clone(),
            id,
        })
    }

    fn open_cursor(&self) -> Result<FakeCursor> {
        self.cursors.fetch_add(1, Ordering::SeqCst);
        Ok(FakeCursor::new(&self.cluster))
    }
}

/// Committed offsets of a group as an ordered map, for readable assertions.
pub fn sorted(offsets: &HashMap<TopicPartition, i64>) -> BTreeMap<TopicPartition, i64> {
    offsets.iter().map(|(tp, o)| (tp.clone(), *o)).collect()
}
