//! Cluster admin over rskafka
//!
//! rskafka speaks the produce/fetch side of the protocol plus topic creation
//! and deletion. Everything else the engine asks for (configs, partition
//! expansion, ACLs, consumer groups, cluster id) is reported as
//! [`TransportError::Unsupported`], which the engine treats as "not
//! observable" rather than as a failure.

use crate::config::KafkaAdminConfig;
use async_trait::async_trait;
use futures::future::try_join_all;
use rskafka::client::error::{Error as KafkaError, ProtocolError};
use rskafka::client::partition::{OffsetAt, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder, SaslConfig};
use std::collections::{BTreeMap, HashMap, HashSet};
use streamform_core::observed::{
    ConfigEntry, ObservedConsumerGroup, PartitionOffset, TopicDescription, TopicPartition,
};
use streamform_core::ports::{fail_batch, BatchResult, PortResult};
use streamform_core::reconcile::{AlterConfigOp, ConfigResource, PartitionExpansion, TopicSpec};
use streamform_core::{
    AccessEntry, AccessFilter, ClusterAdmin, Result, StreamformError, TransportError,
};
use tracing::{debug, info, instrument, warn};

/// Map an rskafka error onto a transport error
pub fn transport_error(operation: &str, error: KafkaError) -> TransportError {
    let message = format!("{}: {}", operation, error);
    match error {
        KafkaError::ServerError { protocol_error, .. } => match protocol_error {
            ProtocolError::UnknownTopicOrPartition => TransportError::NotFound(message),
            ProtocolError::TopicAuthorizationFailed
            | ProtocolError::ClusterAuthorizationFailed
            | ProtocolError::SaslAuthenticationFailed => TransportError::Unauthorized(message),
            ProtocolError::TopicAlreadyExists
            | ProtocolError::InvalidPartitions
            | ProtocolError::InvalidReplicationFactor
            | ProtocolError::PolicyViolation => TransportError::InvalidRequest(message),
            _ => TransportError::Unavailable(message),
        },
        _ => TransportError::Unavailable(message),
    }
}

fn unsupported(operation: &str) -> TransportError {
    TransportError::Unsupported(format!("{} is not available over rskafka", operation))
}

/// [`ClusterAdmin`] backed by an rskafka client
pub struct KafkaAdmin {
    client: Client,
    config: KafkaAdminConfig,
}

impl KafkaAdmin {
    /// Connect to the bootstrap brokers
    pub async fn connect(config: KafkaAdminConfig) -> Result<Self> {
        let config = config.checked()?;
        let mut builder = ClientBuilder::new(config.brokers.clone());
        if let Some(sasl) = &config.sasl {
            builder = builder.sasl_config(SaslConfig::Plain {
                username: sasl.username.clone(),
                password: sasl.password.clone(),
            });
        }

        let client = tokio::time::timeout(config.connect_timeout(), builder.build())
            .await
            .map_err(|_| {
                StreamformError::Transport(TransportError::Timeout {
                    operation: "connect".to_string(),
                    after: config.connect_timeout(),
                })
            })?
            .map_err(|e| StreamformError::Transport(transport_error("connect", e)))?;

        info!(brokers = ?config.brokers, "Connected to Kafka");
        Ok(Self { client, config })
    }

    async fn latest_offset(&self, partition: &TopicPartition) -> PortResult<PartitionOffset> {
        let client = self
            .client
            .partition_client(
                partition.topic.as_str(),
                partition.partition,
                UnknownTopicHandling::Error,
            )
            .await
            .map_err(|e| transport_error("list_offsets", e))?;
        let high_watermark = client
            .get_offset(OffsetAt::Latest)
            .await
            .map_err(|e| transport_error("list_offsets", e))?;
        Ok(PartitionOffset {
            high_watermark,
            timestamp: None,
        })
    }
}

#[async_trait]
impl ClusterAdmin for KafkaAdmin {
    async fn list_topics(&self) -> PortResult<Vec<String>> {
        let topics = self
            .client
            .list_topics()
            .await
            .map_err(|e| transport_error("list_topics", e))?;
        Ok(topics.into_iter().map(|t| t.name).collect())
    }

    async fn describe_topics(&self, names: &[String]) -> PortResult<Vec<TopicDescription>> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let topics = self
            .client
            .list_topics()
            .await
            .map_err(|e| transport_error("describe_topics", e))?;
        Ok(topics
            .into_iter()
            .filter(|t| wanted.contains(t.name.as_str()))
            .map(|t| TopicDescription {
                name: t.name,
                partitions: t.partitions.into_iter().collect(),
                replication_factor: None,
            })
            .collect())
    }

    async fn describe_configs(
        &self,
        _resources: &[ConfigResource],
    ) -> PortResult<BTreeMap<ConfigResource, Vec<ConfigEntry>>> {
        Err(unsupported("describe_configs"))
    }

    #[instrument(skip(self))]
    async fn list_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> PortResult<HashMap<TopicPartition, PartitionOffset>> {
        let offsets = try_join_all(partitions.iter().map(|p| async move {
            self.latest_offset(p).await.map(|offset| (p.clone(), offset))
        }))
        .await?;
        Ok(offsets.into_iter().collect())
    }

    #[instrument(skip(self, specs), fields(count = specs.len()))]
    async fn create_topics(&self, specs: &[TopicSpec]) -> BatchResult {
        let controller = match self.client.controller_client() {
            Ok(controller) => controller,
            Err(e) => return fail_batch(specs.len(), &transport_error("create_topics", e)),
        };

        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let created = controller
                .create_topic(
                    spec.name.as_str(),
                    spec.partitions,
                    spec.replication_factor,
                    self.config.request_timeout_ms,
                )
                .await
                .map_err(|e| transport_error("create_topics", e));

            let result = match created {
                Ok(()) if spec.config.is_empty() => Ok(()),
                Ok(()) => {
                    let keys: Vec<&str> = spec.config.keys().map(String::as_str).collect();
                    warn!(topic = %spec.name, config = ?keys, "Topic created without its config");
                    Err(TransportError::Unsupported(format!(
                        "topic '{}' was created but its config ({}) cannot be set over rskafka",
                        spec.name,
                        keys.join(", ")
                    )))
                }
                Err(e) => Err(e),
            };
            if result.is_ok() {
                debug!(topic = %spec.name, partitions = spec.partitions, "Created topic");
            }
            results.push(result);
        }
        results
    }

    async fn create_partitions(&self, expansions: &[PartitionExpansion]) -> BatchResult {
        fail_batch(expansions.len(), &unsupported("create_partitions"))
    }

    async fn alter_configs(&self, changes: &[(ConfigResource, Vec<AlterConfigOp>)]) -> BatchResult {
        fail_batch(changes.len(), &unsupported("alter_configs"))
    }

    #[instrument(skip(self, names), fields(count = names.len()))]
    async fn delete_topics(&self, names: &[String]) -> BatchResult {
        let controller = match self.client.controller_client() {
            Ok(controller) => controller,
            Err(e) => return fail_batch(names.len(), &transport_error("delete_topics", e)),
        };

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let deleted = controller
                .delete_topic(name.as_str(), self.config.request_timeout_ms)
                .await
                .map_err(|e| transport_error("delete_topics", e));
            if deleted.is_ok() {
                debug!(topic = %name, "Deleted topic");
            }
            results.push(deleted);
        }
        results
    }

    async fn list_access_entries(&self, _filter: &AccessFilter) -> PortResult<Vec<AccessEntry>> {
        Err(unsupported("list_access_entries"))
    }

    async fn create_access_entries(&self, entries: &[AccessEntry]) -> BatchResult {
        fail_batch(entries.len(), &unsupported("create_access_entries"))
    }

    async fn delete_access_entries(&self, filters: &[AccessFilter]) -> BatchResult {
        fail_batch(filters.len(), &unsupported("delete_access_entries"))
    }

    async fn list_consumer_groups(&self) -> PortResult<Vec<String>> {
        Err(unsupported("list_consumer_groups"))
    }

    async fn describe_consumer_groups(
        &self,
        _ids: &[String],
    ) -> PortResult<Vec<ObservedConsumerGroup>> {
        Err(unsupported("describe_consumer_groups"))
    }

    async fn list_consumer_group_offsets(
        &self,
        _id: &str,
    ) -> PortResult<BTreeMap<TopicPartition, i64>> {
        Err(unsupported("list_consumer_group_offsets"))
    }

    async fn describe_cluster(&self) -> PortResult<String> {
        Err(unsupported("describe_cluster"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_is_not_retryable() {
        let err = unsupported("alter_configs");
        assert_eq!(err.kind(), "unsupported");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("alter_configs"));
    }

    #[test]
    fn test_transport_error_mapping() {
        let err = transport_error(
            "list_topics",
            KafkaError::InvalidResponse("truncated metadata".to_string()),
        );
        assert!(err.is_retryable());
        assert!(err.to_string().contains("list_topics"));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let result = KafkaAdmin::connect(KafkaAdminConfig::new(["no-port"])).await;
        assert!(matches!(result, Err(StreamformError::Config(_))));
    }
}
