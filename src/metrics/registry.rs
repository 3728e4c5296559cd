use crate::metrics::definitions::{
    HELP_GROUP_CURRENT_OFFSET, HELP_GROUP_OFFSET_LAG, HELP_LAST_UPDATE_TIMESTAMP,
    HELP_SCRAPE_DURATION_SECONDS, HELP_UP, LABEL_GROUP_ID, LABEL_TOPIC,
    METRIC_GROUP_CURRENT_OFFSET, METRIC_GROUP_OFFSET_LAG, METRIC_LAST_UPDATE_TIMESTAMP,
    METRIC_SCRAPE_DURATION_SECONDS, METRIC_UP,
};
use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Label set shared by both gauge families.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GaugeKey {
    pub group: String,
    pub topic: String,
}

impl GaugeKey {
    pub fn new(group: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            topic: topic.into(),
        }
    }
}

/// Process-wide gauge storage with last-value semantics.
///
/// Label sets are never removed: a group or topic that disappears keeps
/// exporting its last value, and dynamic group names grow the label set count
/// for the lifetime of the process.
pub struct MetricsRegistry {
    offset_lag: DashMap<GaugeKey, i64>,
    current_offset: DashMap<GaugeKey, i64>,
    healthy: AtomicBool,
    last_scrape_duration_ms: AtomicU64,
    // Unix seconds, 0 until the first successful cycle
    last_update_timestamp: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            offset_lag: DashMap::new(),
            current_offset: DashMap::new(),
            healthy: AtomicBool::new(true),
            last_scrape_duration_ms: AtomicU64::new(0),
            last_update_timestamp: AtomicU64::new(0),
        }
    }

    /// Overwrite both gauges for `(group, topic)`.
    pub fn publish(&self, group: &str, topic: &str, lag: i64, offset: i64) {
        let key = GaugeKey::new(group, topic);
        self.offset_lag.insert(key.clone(), lag);
        self.current_offset.insert(key, offset);
    }

    #[cfg(test)]
    pub fn lag(&self, group: &str, topic: &str) -> Option<i64> {
        self.offset_lag
            .get(&GaugeKey::new(group, topic))
            .map(|v| *v)
    }

    #[cfg(test)]
    pub fn current_offset(&self, group: &str, topic: &str) -> Option<i64> {
        self.current_offset
            .get(&GaugeKey::new(group, topic))
            .map(|v| *v)
    }

    pub fn label_set_count(&self) -> usize {
        self.offset_lag.len()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_scrape_duration_ms(&self, duration_ms: u64) {
        self.last_scrape_duration_ms
            .store(duration_ms, Ordering::SeqCst);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn get_scrape_duration_seconds(&self) -> f64 {
        self.last_scrape_duration_ms.load(Ordering::SeqCst) as f64 / 1000.0
    }

    /// Record that a cycle completed successfully.
    pub fn mark_updated(&self) {
        let unix_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        self.last_update_timestamp
            .store(unix_timestamp.max(1), Ordering::SeqCst);
    }

    pub fn last_update_timestamp(&self) -> Option<u64> {
        match self.last_update_timestamp.load(Ordering::SeqCst) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        render_family(
            &mut output,
            METRIC_GROUP_OFFSET_LAG,
            HELP_GROUP_OFFSET_LAG,
            &self.offset_lag,
        );
        render_family(
            &mut output,
            METRIC_GROUP_CURRENT_OFFSET,
            HELP_GROUP_CURRENT_OFFSET,
            &self.current_offset,
        );

        let scrape_duration = self.get_scrape_duration_seconds();
        let _ = writeln!(
            output,
            "# HELP {METRIC_SCRAPE_DURATION_SECONDS} {HELP_SCRAPE_DURATION_SECONDS}"
        );
        let _ = writeln!(output, "# TYPE {METRIC_SCRAPE_DURATION_SECONDS} gauge");
        let _ = writeln!(output, "{METRIC_SCRAPE_DURATION_SECONDS} {scrape_duration:.6}");

        let _ = writeln!(output, "# HELP {METRIC_UP} {HELP_UP}");
        let _ = writeln!(output, "# TYPE {METRIC_UP} gauge");
        let _ = writeln!(output, "{METRIC_UP} {}", i32::from(self.is_healthy()));

        if let Some(timestamp) = self.last_update_timestamp() {
            let _ = writeln!(
                output,
                "# HELP {METRIC_LAST_UPDATE_TIMESTAMP} {HELP_LAST_UPDATE_TIMESTAMP}"
            );
            let _ = writeln!(output, "# TYPE {METRIC_LAST_UPDATE_TIMESTAMP} gauge");
            let _ = writeln!(output, "{METRIC_LAST_UPDATE_TIMESTAMP} {timestamp}");
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn render_family(output: &mut String, name: &str, help: &str, values: &DashMap<GaugeKey, i64>) {
    if values.is_empty() {
        return;
    }

    // Sorted for stable output across scrapes
    let mut points: Vec<(GaugeKey, i64)> = values
        .iter()
        .map(|entry| (entry.key().clone(), *entry.value()))
        .collect();
    points.sort_unstable();

    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    for (key, value) in points {
        let _ = writeln!(output, "{name}{} {value}", render_labels(&key));
    }
}

fn render_labels(key: &GaugeKey) -> String {
    format!(
        "{{{LABEL_GROUP_ID}=\"{}\",{LABEL_TOPIC}=\"{}\"}}",
        escape_label_value(&key.group),
        escape_label_value(&key.topic)
    )
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
