pub const METRIC_GROUP_OFFSET_LAG: &str = "kafka_broker_consumer_group_offset_lag";
pub const METRIC_GROUP_CURRENT_OFFSET: &str = "kafka_broker_consumer_group_current_offset";

pub const METRIC_SCRAPE_DURATION_SECONDS: &str = "kafka_offset_exporter_scrape_duration_seconds";
pub const METRIC_UP: &str = "kafka_offset_exporter_up";
pub const METRIC_LAST_UPDATE_TIMESTAMP: &str =
    "kafka_offset_exporter_last_update_timestamp_seconds";

pub const LABEL_GROUP_ID: &str = "group_id";
pub const LABEL_TOPIC: &str = "topic";

pub const HELP_GROUP_OFFSET_LAG: &str =
    "Offset lag of a consumer group, summed over the partitions of a topic";
pub const HELP_GROUP_CURRENT_OFFSET: &str =
    "Committed offset of a consumer group, summed over the partitions of a topic";
pub const HELP_SCRAPE_DURATION_SECONDS: &str = "Duration of the last collection cycle in seconds";
pub const HELP_UP: &str = "1 if the exporter is healthy, 0 otherwise";
pub const HELP_LAST_UPDATE_TIMESTAMP: &str =
    "Unix timestamp of the last successful collection cycle";
