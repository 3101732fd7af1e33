//! Collaborator ports
//!
//! The engine talks to the outside world only through these traits:
//!
//! - [`ClusterAdmin`]: cluster metadata, configs, offsets, ACLs, groups
//! - [`SchemaRegistryPort`]: subjects and schema versions
//! - [`TopologyStore`]: declared topology units
//!
//! Batch mutations return one result per input item, in input order.

use crate::acl::{AccessEntry, AccessFilter};
use crate::domain::TopologyUnit;
use crate::error::{StoreError, TransportError};
use crate::observed::{
    ConfigEntry, ObservedConsumerGroup, PartitionOffset, TopicDescription, TopicPartition,
};
use crate::reconcile::{AlterConfigOp, ConfigResource, PartitionExpansion, TopicSpec};
use crate::schema::{CompatibilityMode, RegisteredSchema, SchemaFormat};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Result of a single port call
pub type PortResult<T> = std::result::Result<T, TransportError>;

/// Per-item results of a batch mutation, aligned with the input
pub type BatchResult = Vec<PortResult<()>>;

/// Fail every item of a batch with the same error
pub fn fail_batch(len: usize, error: &TransportError) -> BatchResult {
    (0..len).map(|_| Err(error.clone())).collect()
}

/// Admin interface of the messaging cluster
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Names of all topics, internal topics included
    async fn list_topics(&self) -> PortResult<Vec<String>>;

    async fn describe_topics(&self, names: &[String]) -> PortResult<Vec<TopicDescription>>;

    async fn describe_configs(
        &self,
        resources: &[ConfigResource],
    ) -> PortResult<BTreeMap<ConfigResource, Vec<ConfigEntry>>>;

    /// Latest offsets of the given partitions
    async fn list_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> PortResult<HashMap<TopicPartition, PartitionOffset>>;

    async fn create_topics(&self, specs: &[TopicSpec]) -> BatchResult;

    async fn create_partitions(&self, expansions: &[PartitionExpansion]) -> BatchResult;

    async fn alter_configs(&self, changes: &[(ConfigResource, Vec<AlterConfigOp>)]) -> BatchResult;

    async fn delete_topics(&self, names: &[String]) -> BatchResult;

    async fn list_access_entries(&self, filter: &AccessFilter) -> PortResult<Vec<AccessEntry>>;

    async fn create_access_entries(&self, entries: &[AccessEntry]) -> BatchResult;

    async fn delete_access_entries(&self, filters: &[AccessFilter]) -> BatchResult;

    async fn list_consumer_groups(&self) -> PortResult<Vec<String>>;

    /// Group id and state; offsets are fetched separately
    async fn describe_consumer_groups(
        &self,
        ids: &[String],
    ) -> PortResult<Vec<ObservedConsumerGroup>>;

    async fn list_consumer_group_offsets(
        &self,
        id: &str,
    ) -> PortResult<BTreeMap<TopicPartition, i64>>;

    /// Cluster id
    async fn describe_cluster(&self) -> PortResult<String>;
}

/// Confluent-compatible schema registry
#[async_trait]
pub trait SchemaRegistryPort: Send + Sync {
    async fn list_subjects(&self) -> PortResult<Vec<String>>;

    /// Latest version of a subject
    async fn get_schema(&self, subject: &str) -> PortResult<RegisteredSchema>;

    /// Register a new version and return its schema id
    async fn register_schema(
        &self,
        subject: &str,
        content: &str,
        format: SchemaFormat,
    ) -> PortResult<u32>;

    /// Delete a subject and return the deleted versions
    async fn delete_subject(&self, subject: &str) -> PortResult<Vec<u32>>;

    /// Whether `content` may be registered as the next version of `subject`
    async fn check_compatibility(
        &self,
        subject: &str,
        content: &str,
        format: SchemaFormat,
    ) -> PortResult<bool>;

    async fn set_compatibility(&self, subject: &str, mode: CompatibilityMode) -> PortResult<()>;

    /// Subject-level compatibility, `None` when the global default applies
    async fn get_compatibility(&self, subject: &str) -> PortResult<Option<CompatibilityMode>>;
}

/// Persistence of declared topology units
#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Names of the units under `directory`
    async fn list_units(&self, directory: &Path) -> Result<Vec<String>, StoreError>;

    async fn read_unit(&self, directory: &Path, name: &str) -> Result<TopologyUnit, StoreError>;

    async fn write_unit(&self, directory: &Path, unit: &TopologyUnit) -> Result<(), StoreError>;
}
