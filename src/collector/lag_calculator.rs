use crate::error::Result;
use crate::kafka::{EndOffsetCursor, TopicPartition};
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Lag,
    CurrentOffset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSample {
    pub topic_partition: TopicPartition,
    pub metric_type: MetricType,
    pub value: i64,
}

/// Per-partition samples of one group for one cycle.
#[derive(Debug, Clone, Default)]
pub struct ConsumerGroupMetrics {
    samples: Vec<PartitionSample>,
}

impl ConsumerGroupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, topic_partition: TopicPartition, metric_type: MetricType, value: i64) {
        self.samples.push(PartitionSample {
            topic_partition,
            metric_type,
            value,
        });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[cfg(test)]
    pub fn samples(&self) -> impl Iterator<Item = &PartitionSample> {
        self.samples.iter()
    }

    pub fn total_lag_per_topic(&self) -> HashMap<String, i64> {
        self.sum_per_topic(MetricType::Lag)
    }

    pub fn total_current_offset_per_topic(&self) -> HashMap<String, i64> {
        self.sum_per_topic(MetricType::CurrentOffset)
    }

    /// Sums saturate at `i64::MIN`/`i64::MAX` instead of wrapping. Real offsets
    /// stay far below that range, so a saturated total means corrupt input.
    fn sum_per_topic(&self, metric_type: MetricType) -> HashMap<String, i64> {
        let mut totals: HashMap<String, i64> = HashMap::new();
        for sample in &self.samples {
            if sample.metric_type != metric_type {
                continue;
            }
            let total = totals
                .entry(sample.topic_partition.topic.clone())
                .or_insert(0);
            *total = total.saturating_add(sample.value);
        }
        totals
    }
}

pub struct LagAggregator;

impl LagAggregator {
    /// Probe the log end of every committed partition and record lag and
    /// committed offset samples for `group_id`.
    ///
    /// Lag is `log_end - committed` and is kept as-is when negative: the log end
    /// can be read before a commit that landed just after it.
    pub fn aggregate<P: EndOffsetCursor + ?Sized>(
        group_id: &str,
        committed: &HashMap<TopicPartition, i64>,
        probe: &mut P,
    ) -> Result<ConsumerGroupMetrics> {
        let mut metrics = ConsumerGroupMetrics::new();

        for (tp, current_offset) in committed {
            let log_end = probe.log_end_offset(tp)?;
            let lag = log_end - current_offset;

            if lag < 0 {
                debug!(
                    group = group_id,
                    topic = %tp.topic,
                    partition = tp.partition,
                    log_end,
                    committed = current_offset,
                    "Negative lag, log end read before latest commit"
                );
            }
            trace!(
                group = group_id,
                topic = %tp.topic,
                partition = tp.partition,
                lag,
                "Computed partition lag"
            );

            metrics.add(tp.clone(), MetricType::Lag, lag);
            metrics.add(tp.clone(), MetricType::CurrentOffset, *current_offset);
        }

        Ok(metrics)
    }
}
