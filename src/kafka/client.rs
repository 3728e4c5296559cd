use crate::config::KafkaConfig;
use crate::error::{ExporterError, Result};
use crate::kafka::consumer::EndOffsetProbe;
use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::groups::GroupList;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};

/// Offset librdkafka reports for a partition without a committed offset.
const OFFSET_INVALID: i64 = -1001;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

/// Administrative view of the cluster used to enumerate groups and read their
/// committed offsets.
pub trait AdminApi: Send + Sync {
    /// Ids of all consumer groups known to the group coordinators.
    fn list_group_ids(&self) -> Result<Vec<String>>;

    /// Committed offsets of `group_id` for every partition it has committed to.
    /// Fails as a whole if any partition reports an error.
    fn committed_offsets(&self, group_id: &str) -> Result<HashMap<TopicPartition, i64>>;
}

/// Creates broker handles. The admin handle is recreated after failures, the
/// cursor is opened once.
pub trait BrokerConnector: Send + Sync {
    type Admin: AdminApi;
    type Cursor: crate::kafka::EndOffsetCursor;

    fn connect_admin(&self) -> Result<Self::Admin>;

    fn open_cursor(&self) -> Result<Self::Cursor>;
}

pub struct KafkaAdmin {
    admin: AdminClient<DefaultClientContext>,
    consumer: BaseConsumer,
    timeout: Duration,
    generation: u64,
}

impl KafkaAdmin {
    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl AdminApi for KafkaAdmin {
    #[instrument(skip(self), fields(generation = self.generation))]
    fn list_group_ids(&self) -> Result<Vec<String>> {
        let group_list: GroupList = self.consumer.fetch_group_list(None, self.timeout)?;

        // Only groups managed by the consumer protocol carry committed offsets
        let groups: Vec<String> = group_list
            .groups()
            .iter()
            .filter(|g| g.protocol_type().is_empty() || g.protocol_type() == "consumer")
            .map(|g| g.name().to_string())
            .collect();

        debug!(
            listed = group_list.groups().len(),
            consumer_groups = groups.len(),
            "Listed consumer groups"
        );
        Ok(groups)
    }

    /// Uses the Admin API `ListConsumerGroupOffsets` with no partition list, which
    /// returns every partition the group has committed to.
    #[instrument(skip(self), fields(generation = self.generation, group = %group_id))]
    fn committed_offsets(&self, group_id: &str) -> Result<HashMap<TopicPartition, i64>> {
        use rdkafka::bindings::*;

        let group_cstr = CString::new(group_id).map_err(|e| {
            ExporterError::MalformedResponse(format!("Group id contains null byte: {e}"))
        })?;
        let timeout_ms = i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX);

        unsafe {
            let rk = self.admin.inner().native_ptr();

            // Frees every C resource on all exit paths
            struct Cleanup {
                request: *mut rd_kafka_ListConsumerGroupOffsets_t,
                options: *mut rd_kafka_AdminOptions_t,
                queue: *mut rd_kafka_queue_t,
                event: *mut rd_kafka_event_t,
            }
            impl Drop for Cleanup {
                fn drop(&mut self) {
                    unsafe {
                        if !self.event.is_null() {
                            rd_kafka_event_destroy(self.event);
                        }
                        if !self.queue.is_null() {
                            rd_kafka_queue_destroy(self.queue);
                        }
                        if !self.options.is_null() {
                            rd_kafka_AdminOptions_destroy(self.options);
                        }
                        if !self.request.is_null() {
                            rd_kafka_ListConsumerGroupOffsets_destroy(self.request);
                        }
                    }
                }
            }

            let mut cleanup = Cleanup {
                request: std::ptr::null_mut(),
                options: std::ptr::null_mut(),
                queue: std::ptr::null_mut(),
                event: std::ptr::null_mut(),
            };

            // NULL partition list: all committed partitions of the group
            let request =
                rd_kafka_ListConsumerGroupOffsets_new(group_cstr.as_ptr(), std::ptr::null());
            if request.is_null() {
                return Err(ExporterError::UpstreamUnavailable(
                    "Failed to create ListConsumerGroupOffsets request".into(),
                ));
            }
            cleanup.request = request;

            let options = rd_kafka_AdminOptions_new(
                rk,
                rd_kafka_admin_op_t::RD_KAFKA_ADMIN_OP_LISTCONSUMERGROUPOFFSETS,
            );
            if options.is_null() {
                return Err(ExporterError::UpstreamUnavailable(
                    "Failed to create AdminOptions".into(),
                ));
            }
            cleanup.options = options;

            let mut errstr_buf = [0 as c_char; 512];
            let err = rd_kafka_AdminOptions_set_request_timeout(
                options,
                timeout_ms,
                errstr_buf.as_mut_ptr(),
                errstr_buf.len(),
            );
            if err != rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR {
                let errstr = CStr::from_ptr(errstr_buf.as_ptr()).to_string_lossy();
                return Err(ExporterError::UpstreamUnavailable(format!(
                    "Failed to set request timeout: {errstr}"
                )));
            }

            let queue = rd_kafka_queue_new(rk);
            if queue.is_null() {
                return Err(ExporterError::UpstreamUnavailable(
                    "Failed to create queue".into(),
                ));
            }
            cleanup.queue = queue;

            let mut request_ptr = request;
            rd_kafka_ListConsumerGroupOffsets(rk, &mut request_ptr, 1, options, queue);

            let event = rd_kafka_queue_poll(queue, timeout_ms);
            if event.is_null() {
                return Err(ExporterError::UpstreamUnavailable(format!(
                    "ListConsumerGroupOffsets timed out for group {group_id}"
                )));
            }
            cleanup.event = event;

            let event_type = rd_kafka_event_type(event);
            if event_type != RD_KAFKA_EVENT_LISTCONSUMERGROUPOFFSETS_RESULT {
                return Err(ExporterError::MalformedResponse(format!(
                    "Unexpected event type: {event_type}"
                )));
            }

            let resp_err = rd_kafka_event_error(event);
            if resp_err != rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR {
                return Err(ExporterError::UpstreamUnavailable(format!(
                    "ListConsumerGroupOffsets failed: {}",
                    c_message(rd_kafka_event_error_string(event))
                )));
            }

            let result = rd_kafka_event_ListConsumerGroupOffsets_result(event);
            if result.is_null() {
                return Err(ExporterError::MalformedResponse(
                    "ListConsumerGroupOffsets result is null".into(),
                ));
            }

            let mut n_groups: usize = 0;
            let groups_ptr =
                rd_kafka_ListConsumerGroupOffsets_result_groups(result, &mut n_groups);

            let mut offsets = HashMap::new();

            for i in 0..n_groups {
                let group = *groups_ptr.add(i);

                let group_error = rd_kafka_group_result_error(group);
                if !group_error.is_null()
                    && rd_kafka_error_code(group_error)
                        != rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR
                {
                    return Err(ExporterError::UpstreamUnavailable(format!(
                        "Group {group_id}: {}",
                        c_message(rd_kafka_error_string(group_error))
                    )));
                }

                let partitions = rd_kafka_group_result_partitions(group);
                if partitions.is_null() {
                    continue;
                }

                let cnt = usize::try_from((*partitions).cnt).unwrap_or_default();
                let elems = (*partitions).elems;

                for j in 0..cnt {
                    let elem = &*elems.add(j);
                    if elem.topic.is_null() {
                        return Err(ExporterError::MalformedResponse(format!(
                            "Group {group_id}: partition entry without topic"
                        )));
                    }
                    let topic = CStr::from_ptr(elem.topic).to_string_lossy().to_string();

                    if elem.err != rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR {
                        return Err(ExporterError::UpstreamUnavailable(format!(
                            "Group {group_id}: {topic}/{} failed: {}",
                            elem.partition,
                            c_message(rd_kafka_err2str(elem.err))
                        )));
                    }

                    if elem.offset == OFFSET_INVALID {
                        continue;
                    }
                    offsets.insert(TopicPartition::new(topic, elem.partition), elem.offset);
                }
            }

            debug!(
                group = group_id,
                partitions = offsets.len(),
                "Fetched committed offsets via Admin API"
            );
            Ok(offsets)
        }
    }
}

/// Copy a possibly-null C string owned by librdkafka.
unsafe fn c_message(ptr: *const c_char) -> String {
    if ptr.is_null() {
        "unknown error".to_string()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().to_string()
    }
}

impl std::fmt::Debug for KafkaAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaAdmin")
            .field("generation", &self.generation)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builds rdkafka clients for the configured broker.
pub struct KafkaConnector {
    config: KafkaConfig,
    generation: AtomicU64,
}

impl KafkaConnector {
    pub fn new(config: &KafkaConfig) -> Self {
        Self {
            config: config.clone(),
            generation: AtomicU64::new(0),
        }
    }

    fn client_config(&self, client_id: &str) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers())
            .set("client.id", client_id);

        for (key, value) in &self.config.client_properties {
            client_config.set(key, value);
        }
        client_config
    }
}

impl BrokerConnector for KafkaConnector {
    type Admin = KafkaAdmin;
    type Cursor = EndOffsetProbe;

    #[instrument(skip(self), fields(bootstrap = %self.config.bootstrap_servers()))]
    fn connect_admin(&self) -> Result<KafkaAdmin> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let client_config = self.client_config("kafka-offset-exporter-admin");

        let admin: AdminClient<DefaultClientContext> = client_config.create()?;
        let consumer: BaseConsumer = client_config
            .clone()
            .set("enable.auto.commit", "false")
            .create()?;

        debug!(generation, "Created admin connection");
        Ok(KafkaAdmin {
            admin,
            consumer,
            timeout: self.config.request_timeout,
            generation,
        })
    }

    #[instrument(skip(self), fields(bootstrap = %self.config.bootstrap_servers()))]
    fn open_cursor(&self) -> Result<EndOffsetProbe> {
        let consumer: BaseConsumer = self
            .client_config("kafka-offset-exporter-probe")
            .set("group.id", "kafka-offset-exporter-probe")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .set("fetch.max.bytes", "1024")
            .create()?;

        Ok(EndOffsetProbe::new(consumer, self.config.request_timeout))
    }
}

impl std::fmt::Debug for KafkaConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaConnector")
            .field("bootstrap", &self.config.bootstrap_servers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_topic_partition_orders_by_topic_then_partition() {
        let set: BTreeSet<TopicPartition> = [
            TopicPartition::new("b", 0),
            TopicPartition::new("a", 2),
            TopicPartition::new("a", 1),
        ]
        .into_iter()
        .collect();

        let ordered: Vec<_> = set.into_iter().collect();
        assert_eq!(
            ordered,
            vec![
                TopicPartition::new("a", 1),
                TopicPartition::new("a", 2),
                TopicPartition::new("b", 0),
            ]
        );
    }

    #[test]
    fn test_connector_builds_clients_without_broker() {
        // rdkafka connects lazily, so handle creation needs no live broker
        let config = KafkaConfig {
            host: "localhost".to_string(),
            ..KafkaConfig::default()
        };
        let connector = KafkaConnector::new(&config);

        let first = connector.connect_admin().unwrap();
        let second = connector.connect_admin().unwrap();
        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
        assert!(connector.open_cursor().is_ok());
    }
}
