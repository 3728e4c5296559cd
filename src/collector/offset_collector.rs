use crate::error::{ExporterError, Result};
use crate::kafka::{AdminApi, TopicPartition};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Enumerates consumer groups and drops the ones matching the exclusion pattern.
#[derive(Debug, Clone)]
pub struct GroupCatalog {
    blacklist: Regex,
}

impl GroupCatalog {
    /// `blacklist` must already be anchored, see
    /// [`crate::config::KafkaConfig::compile_group_blacklist`].
    pub const fn new(blacklist: Regex) -> Self {
        Self { blacklist }
    }

    pub fn is_included(&self, group_id: &str) -> bool {
        !self.blacklist.is_match(group_id)
    }

    #[instrument(skip(self, admin))]
    pub fn list_groups<A: AdminApi + ?Sized>(&self, admin: &A) -> Result<Vec<String>> {
        let all_groups = admin.list_group_ids()?;
        let total = all_groups.len();

        let mut groups = Vec::with_capacity(total);
        for group in all_groups {
            if self.is_included(&group) {
                groups.push(group);
            }
        }

        debug!(
            total_groups = total,
            filtered_groups = groups.len(),
            "Filtered consumer groups"
        );
        Ok(groups)
    }
}

/// Reads the committed offsets of one group.
pub struct GroupOffsetFetcher<'a, A: AdminApi + ?Sized> {
    admin: &'a A,
}

impl<'a, A: AdminApi + ?Sized> GroupOffsetFetcher<'a, A> {
    pub const fn new(admin: &'a A) -> Self {
        Self { admin }
    }

    /// All-or-nothing: a single bad partition fails the whole group so lag is
    /// never computed against a partial snapshot.
    #[instrument(skip(self))]
    pub fn fetch_committed_offsets(&self, group_id: &str) -> Result<HashMap<TopicPartition, i64>> {
        let offsets = self.admin.committed_offsets(group_id)?;

        for (tp, offset) in &offsets {
            if tp.partition < 0 {
                return Err(ExporterError::MalformedResponse(format!(
                    "Group {group_id}: negative partition index {} for topic {}",
                    tp.partition, tp.topic
                )));
            }
            if *offset < 0 {
                return Err(ExporterError::MalformedResponse(format!(
                    "Group {group_id}: committed offset {offset} for {}/{}",
                    tp.topic, tp.partition
                )));
            }
        }

        debug!(partitions = offsets.len(), "Fetched committed offsets");
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaConfig;
    use crate::kafka::BrokerConnector;
    use crate::kafka::testing::{FakeCluster, FakeConnector, sorted};
    use std::collections::BTreeMap;

    fn catalog(pattern: &str) -> GroupCatalog {
        let config = KafkaConfig {
            group_blacklist: pattern.to_string(),
            ..KafkaConfig::default()
        };
        GroupCatalog::new(config.compile_group_blacklist().unwrap())
    }

    #[test]
    fn test_blacklist_excludes_console_consumers() {
        let cluster = FakeCluster::new()
            .with_group("console-consumer-123", &[])
            .with_group("billing-service", &[])
            .with_group("console-consumer", &[]);
        let admin = FakeConnector::new(&cluster).connect_admin().unwrap();

        let groups = catalog("console-consumer.*").list_groups(&admin).unwrap();
        assert_eq!(groups, vec!["billing-service".to_string()]);
    }

    #[test]
    fn test_blacklist_requires_whole_match() {
        let catalog = catalog("console-consumer.*");
        assert!(catalog.is_included("my-console-consumer-1"));
        assert!(catalog.is_included("billing-service"));
        assert!(!catalog.is_included("console-consumer-77"));
    }

    #[test]
    fn test_alternation_pattern_is_fully_anchored() {
        // Without a group, `^a|b$` would match any id starting with "a"
        let catalog = catalog("tmp|scratch");
        assert!(!catalog.is_included("tmp"));
        assert!(!catalog.is_included("scratch"));
        assert!(catalog.is_included("tmp-service"));
    }

    #[test]
    fn test_list_groups_propagates_upstream_failure() {
        let cluster = FakeCluster::new().with_group("orders", &[]);
        cluster.fail_listing(true);
        let admin = FakeConnector::new(&cluster).connect_admin().unwrap();

        let err = catalog("console-consumer.*").list_groups(&admin).unwrap_err();
        assert!(matches!(err, ExporterError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_fetch_committed_offsets() {
        let cluster = FakeCluster::new().with_group(
            "orders",
            &[("payments", 0, 10, 15), ("payments", 1, 20, 20)],
        );
        let admin = FakeConnector::new(&cluster).connect_admin().unwrap();

        let offsets = GroupOffsetFetcher::new(&admin)
            .fetch_committed_offsets("orders")
            .unwrap();

        let expected: BTreeMap<_, _> = [
            (TopicPartition::new("payments", 0), 10),
            (TopicPartition::new("payments", 1), 20),
        ]
        .into_iter()
        .collect();
        assert_eq!(sorted(&offsets), expected);
    }

    #[test]
    fn test_fetch_committed_offsets_fails_whole_group() {
        let cluster = FakeCluster::new().with_group("orders", &[("payments", 0, 10, 15)]);
        cluster.fail_group("orders");
        let admin = FakeConnector::new(&cluster).connect_admin().unwrap();

        let result = GroupOffsetFetcher::new(&admin).fetch_committed_offsets("orders");
        assert!(matches!(result, Err(ExporterError::UpstreamUnavailable(_))));
    }

    #[test]
    fn test_negative_committed_offset_is_malformed() {
        let cluster = FakeCluster::new().with_group(
            "orders",
            &[("payments", 0, 10, 15), ("payments", 1, -5, 15)],
        );
        let admin = FakeConnector::new(&cluster).connect_admin().unwrap();

        let result = GroupOffsetFetcher::new(&admin).fetch_committed_offsets("orders");
        assert!(matches!(result, Err(ExporterError::MalformedResponse(_))));
    }

    #[test]
    fn test_unknown_group_has_no_offsets() {
        let cluster = FakeCluster::new();
        let admin = FakeConnector::new(&cluster).connect_admin().unwrap();

        let offsets = GroupOffsetFetcher::new(&admin)
            .fetch_committed_offsets("ghost")
            .unwrap();
        assert!(offsets.is_empty());
    }
}
