//! Observed cluster state
//!
//! Snapshot types returned by the cluster admin port. They are rebuilt on
//! every query and never mutated except to attach offsets after listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Partition counts of observed topics, keyed by topic name
pub type ObservedPartitions = HashMap<String, i32>;

/// A topic/partition pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
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

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Latest offset of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOffset {
    pub high_watermark: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Result of describing one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDescription {
    pub name: String,
    pub partitions: Vec<i32>,
    /// `None` when the backing client cannot report it
    pub replication_factor: Option<i16>,
}

/// Origin of a config value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    DynamicTopicConfig,
    DynamicBrokerConfig,
    StaticBrokerConfig,
    Default,
    Unknown,
}

/// A config entry as reported by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub name: String,
    pub value: Option<String>,
    pub source: ConfigSource,
}

impl ConfigEntry {
    pub fn dynamic(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            source: ConfigSource::DynamicTopicConfig,
        }
    }
}

/// Keep only the dynamic topic config entries that carry a value
pub fn dynamic_config(entries: &[ConfigEntry]) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter(|e| e.source == ConfigSource::DynamicTopicConfig)
        .filter_map(|e| e.value.as_ref().map(|v| (e.name.clone(), v.clone())))
        .collect()
}

/// One observed partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedPartition {
    pub id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_watermark: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A topic as observed on the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTopic {
    pub name: String,
    pub partitions: Vec<ObservedPartition>,
    pub replication_factor: Option<i16>,
    /// Dynamic topic config only
    pub config: BTreeMap<String, String>,
}

impl ObservedTopic {
    pub fn new(name: impl Into<String>, partitions: i32) -> Self {
        Self {
            name: name.into(),
            partitions: (0..partitions)
                .map(|id| ObservedPartition {
                    id,
                    high_watermark: None,
                    timestamp: None,
                })
                .collect(),
            replication_factor: None,
            config: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_replication_factor(mut self, replication_factor: i16) -> Self {
        self.replication_factor = Some(replication_factor);
        self
    }

    pub fn partition_count(&self) -> i32 {
        i32::try_from(self.partitions.len()).unwrap_or(i32::MAX)
    }

    /// Attach offsets fetched after listing
    pub fn attach_offsets(&mut self, offsets: &HashMap<TopicPartition, PartitionOffset>) {
        for partition in &mut self.partitions {
            let key = TopicPartition::new(self.name.clone(), partition.id);
            if let Some(offset) = offsets.get(&key) {
                partition.high_watermark = Some(offset.high_watermark);
                partition.timestamp = offset.timestamp;
            }
        }
    }

    /// Whether any partition holds data
    pub fn has_data(&self) -> bool {
        self.partitions
            .iter()
            .any(|p| p.high_watermark.is_some_and(|hw| hw > 0))
    }
}

/// Partition counts of a set of observed topics
pub fn partition_counts(topics: &[ObservedTopic]) -> ObservedPartitions {
    topics
        .iter()
        .map(|t| (t.name.clone(), t.partition_count()))
        .collect()
}

/// Consumer group state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupState {
    Stable,
    PreparingRebalance,
    CompletingRebalance,
    Empty,
    Dead,
    Unknown,
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupState::Stable => write!(f, "Stable"),
            GroupState::PreparingRebalance => write!(f, "PreparingRebalance"),
            GroupState::CompletingRebalance => write!(f, "CompletingRebalance"),
            GroupState::Empty => write!(f, "Empty"),
            GroupState::Dead => write!(f, "Dead"),
            GroupState::Unknown => write!(f, "Unknown"),
        }
    }
}

impl std::str::FromStr for GroupState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Stable" => Ok(GroupState::Stable),
            "PreparingRebalance" => Ok(GroupState::PreparingRebalance),
            "CompletingRebalance" => Ok(GroupState::CompletingRebalance),
            "Empty" => Ok(GroupState::Empty),
            "Dead" => Ok(GroupState::Dead),
            _ => Ok(GroupState::Unknown),
        }
    }
}

/// A consumer group as observed on the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedConsumerGroup {
    pub id: String,
    pub state: GroupState,
    pub offsets: BTreeMap<TopicPartition, i64>,
}

impl ObservedConsumerGroup {
    /// Topics this group has committed offsets on
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        let mut last: Option<&str> = None;
        self.offsets.keys().filter_map(move |tp| {
            if last == Some(tp.topic.as_str()) {
                None
            } else {
                last = Some(tp.topic.as_str());
                last
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_config_filters_sources() {
        let entries = vec![
            ConfigEntry::dynamic("cleanup.policy", "compact"),
            ConfigEntry {
                name: "retention.ms".to_string(),
                value: Some("604800000".to_string()),
                source: ConfigSource::Default,
            },
            ConfigEntry {
                name: "segment.bytes".to_string(),
                value: None,
                source: ConfigSource::DynamicTopicConfig,
            },
        ];
        let config = dynamic_config(&entries);
        assert_eq!(config.len(), 1);
        assert_eq!(config["cleanup.policy"], "compact");
    }

    #[test]
    fn test_attach_offsets() {
        let mut topic = ObservedTopic::new("orders.public.created", 2);
        assert!(!topic.has_data());

        let mut offsets = HashMap::new();
        offsets.insert(
            TopicPartition::new("orders.public.created", 1),
            PartitionOffset {
                high_watermark: 42,
                timestamp: None,
            },
        );
        topic.attach_offsets(&offsets);

        assert_eq!(topic.partitions[0].high_watermark, None);
        assert_eq!(topic.partitions[1].high_watermark, Some(42));
        assert!(topic.has_data());
    }

    #[test]
    fn test_group_topics_deduplicated() {
        let mut offsets = BTreeMap::new();
        offsets.insert(TopicPartition::new("a", 0), 1);
        offsets.insert(TopicPartition::new("a", 1), 2);
        offsets.insert(TopicPartition::new("b", 0), 3);
        let group = ObservedConsumerGroup {
            id: "g".to_string(),
            state: GroupState::Stable,
            offsets,
        };
        assert_eq!(group.topics().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
