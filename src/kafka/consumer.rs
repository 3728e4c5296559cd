use crate::error::{ExporterError, Result};
use crate::kafka::client::TopicPartition;
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use rdkafka::consumer::{BaseConsumer, Consumer};
use std::time::Duration;
use tracing::{instrument, trace, warn};

/// A read cursor that can be pointed at the end of any partition.
///
/// Implementations hold one stateful cursor that is reassigned on every call,
/// hence `&mut self`: callers must not share it between concurrent cycles.
pub trait EndOffsetCursor: Send {
    /// Log-end offset of `tp`, i.e. the offset the next produced record will get.
    fn log_end_offset(&mut self, tp: &TopicPartition) -> Result<i64>;
}

/// `BaseConsumer`-backed cursor. It is never polled, so positioning it does not
/// deliver any record to the exporter.
///
/// Between calls the consumer holds no assignment. An assigned, unpaused
/// partition would keep librdkafka's background fetcher pulling records into a
/// queue nobody reads.
pub struct EndOffsetProbe {
    consumer: BaseConsumer,
    timeout: Duration,
}

impl EndOffsetProbe {
    pub fn new(consumer: BaseConsumer, timeout: Duration) -> Self {
        Self { consumer, timeout }
    }

    fn resolve_end(&self, tp: &TopicPartition) -> Result<i64> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&tp.topic, tp.partition, Offset::End)?;
        self.consumer.assign(&tpl)?;
        self.consumer.pause(&tpl)?;

        // The assigned END position is logical until a fetch resolves it; ask the
        // partition leader for the high watermark instead of fetching records.
        let (_low, high) = self
            .consumer
            .fetch_watermarks(&tp.topic, tp.partition, self.timeout)?;

        if high < 0 {
            return Err(ExporterError::MalformedResponse(format!(
                "Negative log-end offset {high} for {}/{}",
                tp.topic, tp.partition
            )));
        }
        Ok(high)
    }

    fn release(&self) {
        let empty = TopicPartitionList::new();
        if let Err(e) = self.consumer.assign(&empty) {
            warn!(error = %e, "Failed to unassign probe consumer");
        }
    }
}

impl EndOffsetCursor for EndOffsetProbe {
    #[instrument(skip(self), fields(topic = %tp.topic, partition = tp.partition))]
    fn log_end_offset(&mut self, tp: &TopicPartition) -> Result<i64> {
        let result = self.resolve_end(tp);
        self.release();

        if let Ok(high) = result {
            trace!(log_end_offset = high, "Resolved log-end offset");
        }
        result
    }
}

impl std::fmt::Debug for EndOffsetProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndOffsetProbe")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
