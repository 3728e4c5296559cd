#[cfg(test)]
pub mod strategies {
    use crate::kafka::TopicPartition;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// (committed, log_end) pair. log_end may sit slightly below committed to
    /// model a log end read that raced a newer commit.
    pub fn arb_offsets() -> impl Strategy<Value = (i64, i64)> {
        (0..1_000_000_000i64).prop_flat_map(|committed| {
            (Just(committed), (committed - 10).max(0)..=committed + 1_000_000)
        })
    }

    /// Arbitrary topic name (valid Kafka topic chars)
    pub fn arb_topic() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9._-]{0,20}"
    }

    /// Arbitrary non-empty group ID
    pub fn arb_group_id() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9._-]{0,48}"
    }

    /// Committed partitions of one group over a handful of topics.
    pub fn arb_partition_offsets() -> impl Strategy<Value = HashMap<TopicPartition, (i64, i64)>>
    {
        proptest::collection::hash_map(
            (arb_topic(), 0..16i32).prop_map(|(topic, partition)| {
                TopicPartition::new(topic, partition)
            }),
            arb_offsets(),
            0..24,
        )
    }
}
