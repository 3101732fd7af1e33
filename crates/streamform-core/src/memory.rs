//! In-memory port implementations
//!
//! `MemoryCluster`, `MemoryRegistry` and `MemoryTopologyStore` keep their
//! state in process and record every mutating call, which makes them usable
//! for offline planning and for driving the orchestrator in tests. Failures
//! and latency can be injected per method.

use crate::acl::{AccessEntry, AccessFilter};
use crate::domain::TopologyUnit;
use crate::error::{StoreError, TransportError};
use crate::observed::{
    ConfigEntry, GroupState, ObservedConsumerGroup, ObservedTopic, PartitionOffset,
    TopicDescription, TopicPartition,
};
use crate::ports::{
    fail_batch, BatchResult, ClusterAdmin, PortResult, SchemaRegistryPort, TopologyStore,
};
use crate::reconcile::{
    AlterConfigOp, ConfigResource, ConfigResourceKind, PartitionExpansion, TopicSpec,
};
use crate::schema::{normalize_content, CompatibilityMode, RegisteredSchema, SchemaFormat};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A recorded mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationCall {
    pub method: &'static str,
    pub targets: Vec<String>,
}

/// Injected failures and latency, keyed by port method name
#[derive(Default)]
struct Faults {
    failures: DashMap<String, TransportError>,
    delay: RwLock<Option<Duration>>,
}

impl Faults {
    async fn check(&self, method: &str) -> PortResult<()> {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryTopic {
    replication_factor: i16,
    config: BTreeMap<String, String>,
    high_watermarks: Vec<i64>,
}

/// In-memory cluster
pub struct MemoryCluster {
    cluster_id: String,
    topics: RwLock<BTreeMap<String, MemoryTopic>>,
    acls: RwLock<BTreeSet<AccessEntry>>,
    groups: RwLock<BTreeMap<String, ObservedConsumerGroup>>,
    faults: Faults,
    mutations: Mutex<Vec<MutationCall>>,
}

impl MemoryCluster {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            topics: RwLock::new(BTreeMap::new()),
            acls: RwLock::new(BTreeSet::new()),
            groups: RwLock::new(BTreeMap::new()),
            faults: Faults::default(),
            mutations: Mutex::new(Vec::new()),
        }
    }

    /// Seed a topic
    pub fn with_topic(self, topic: ObservedTopic) -> Self {
        self.topics.write().insert(
            topic.name.clone(),
            MemoryTopic {
                replication_factor: topic.replication_factor.unwrap_or(1),
                config: topic.config,
                high_watermarks: topic
                    .partitions
                    .iter()
                    .map(|p| p.high_watermark.unwrap_or(0))
                    .collect(),
            },
        );
        self
    }

    /// Seed an access entry
    pub fn with_access_entry(self, entry: AccessEntry) -> Self {
        self.acls.write().insert(entry);
        self
    }

    /// Seed a consumer group
    pub fn with_consumer_group(self, group: ObservedConsumerGroup) -> Self {
        self.groups.write().insert(group.id.clone(), group);
        self
    }

    /// Set the high watermark of a partition
    pub fn set_high_watermark(&self, topic: &str, partition: i32, offset: i64) {
        if let Some(t) = self.topics.write().get_mut(topic) {
            if let Some(hw) = usize::try_from(partition)
                .ok()
                .and_then(|p| t.high_watermarks.get_mut(p))
            {
                *hw = offset;
            }
        }
    }

    /// Make `method` fail with `error`
    pub fn fail(&self, method: &str, error: TransportError) {
        self.faults.failures.insert(method.to_string(), error);
    }

    /// Delay every call
    pub fn set_delay(&self, delay: Duration) {
        *self.faults.delay.write() = Some(delay);
    }

    /// Mutating calls received so far
    pub fn mutations(&self) -> Vec<MutationCall> {
        self.mutations.lock().clone()
    }

    /// Current state of a topic
    pub fn topic(&self, name: &str) -> Option<ObservedTopic> {
        self.topics.read().get(name).map(|t| to_observed(name, t))
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.read().keys().cloned().collect()
    }

    pub fn access_entries(&self) -> Vec<AccessEntry> {
        self.acls.read().iter().cloned().collect()
    }

    fn record(&self, method: &'static str, targets: Vec<String>) {
        self.mutations.lock().push(MutationCall { method, targets });
    }
}

fn to_observed(name: &str, topic: &MemoryTopic) -> ObservedTopic {
    let mut observed = ObservedTopic::new(name, topic.high_watermarks.len() as i32)
        .with_replication_factor(topic.replication_factor);
    observed.config = topic.config.clone();
    for (partition, hw) in observed.partitions.iter_mut().zip(&topic.high_watermarks) {
        partition.high_watermark = Some(*hw);
    }
    observed
}

#[async_trait]
impl ClusterAdmin for MemoryCluster {
    async fn list_topics(&self) -> PortResult<Vec<String>> {
        self.faults.check("list_topics").await?;
        Ok(self.topic_names())
    }

    async fn describe_topics(&self, names: &[String]) -> PortResult<Vec<TopicDescription>> {
        self.faults.check("describe_topics").await?;
        let topics = self.topics.read();
        names
            .iter()
            .map(|name| {
                let topic = topics
                    .get(name)
                    .ok_or_else(|| TransportError::NotFound(format!("topic {}", name)))?;
                Ok(TopicDescription {
                    name: name.clone(),
                    partitions: (0..topic.high_watermarks.len() as i32).collect(),
                    replication_factor: Some(topic.replication_factor),
                })
            })
            .collect()
    }

    async fn describe_configs(
        &self,
        resources: &[ConfigResource],
    ) -> PortResult<BTreeMap<ConfigResource, Vec<ConfigEntry>>> {
        self.faults.check("describe_configs").await?;
        let topics = self.topics.read();
        let mut result = BTreeMap::new();
        for resource in resources {
            let entries = match (resource.kind, topics.get(&resource.name)) {
                (ConfigResourceKind::Topic, Some(topic)) => topic
                    .config
                    .iter()
                    .map(|(k, v)| ConfigEntry::dynamic(k.clone(), v.clone()))
                    .collect(),
                (ConfigResourceKind::Topic, None) => {
                    return Err(TransportError::NotFound(resource.to_string()))
                }
                (ConfigResourceKind::Broker, _) => Vec::new(),
            };
            result.insert(resource.clone(), entries);
        }
        Ok(result)
    }

    async fn list_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> PortResult<HashMap<TopicPartition, PartitionOffset>> {
        self.faults.check("list_offsets").await?;
        let topics = self.topics.read();
        Ok(partitions
            .iter()
            .filter_map(|tp| {
                let topic = topics.get(&tp.topic)?;
                let hw = *topic.high_watermarks.get(usize::try_from(tp.partition).ok()?)?;
                Some((
                    tp.clone(),
                    PartitionOffset {
                        high_watermark: hw,
                        timestamp: None,
                    },
                ))
            })
            .collect())
    }

    async fn create_topics(&self, specs: &[TopicSpec]) -> BatchResult {
        self.record("create_topics", specs.iter().map(|s| s.name.clone()).collect());
        if let Err(e) = self.faults.check("create_topics").await {
            return fail_batch(specs.len(), &e);
        }
        let mut topics = self.topics.write();
        specs
            .iter()
            .map(|spec| {
                if topics.contains_key(&spec.name) {
                    return Err(TransportError::InvalidRequest(format!(
                        "topic {} already exists",
                        spec.name
                    )));
                }
                if spec.partitions < 1 {
                    return Err(TransportError::InvalidRequest(format!(
                        "invalid partition count {}",
                        spec.partitions
                    )));
                }
                topics.insert(
                    spec.name.clone(),
                    MemoryTopic {
                        replication_factor: spec.replication_factor,
                        config: spec.config.clone(),
                        high_watermarks: vec![0; spec.partitions as usize],
                    },
                );
                Ok(())
            })
            .collect()
    }

    async fn create_partitions(&self, expansions: &[PartitionExpansion]) -> BatchResult {
        self.record(
            "create_partitions",
            expansions.iter().map(|e| e.topic.clone()).collect(),
        );
        if let Err(e) = self.faults.check("create_partitions").await {
            return fail_batch(expansions.len(), &e);
        }
        let mut topics = self.topics.write();
        expansions
            .iter()
            .map(|expansion| {
                let topic = topics
                    .get_mut(&expansion.topic)
                    .ok_or_else(|| TransportError::NotFound(expansion.topic.clone()))?;
                let target = usize::try_from(expansion.target).unwrap_or(0);
                if target <= topic.high_watermarks.len() {
                    return Err(TransportError::InvalidRequest(format!(
                        "topic {} already has {} partitions",
                        expansion.topic,
                        topic.high_watermarks.len()
                    )));
                }
                topic.high_watermarks.resize(target, 0);
                Ok(())
            })
            .collect()
    }

    async fn alter_configs(&self, changes: &[(ConfigResource, Vec<AlterConfigOp>)]) -> BatchResult {
        self.record(
            "alter_configs",
            changes.iter().map(|(r, _)| r.name.clone()).collect(),
        );
        if let Err(e) = self.faults.check("alter_configs").await {
            return fail_batch(changes.len(), &e);
        }
        let mut topics = self.topics.write();
        changes
            .iter()
            .map(|(resource, ops)| {
                let topic = topics
                    .get_mut(&resource.name)
                    .ok_or_else(|| TransportError::NotFound(resource.to_string()))?;
                for op in ops {
                    match op {
                        AlterConfigOp::Set { key, value } => {
                            topic.config.insert(key.clone(), value.clone());
                        }
                        AlterConfigOp::Delete { key } => {
                            topic.config.remove(key);
                        }
                    }
                }
                Ok(())
            })
            .collect()
    }

    async fn delete_topics(&self, names: &[String]) -> BatchResult {
        self.record("delete_topics", names.to_vec());
        if let Err(e) = self.faults.check("delete_topics").await {
            return fail_batch(names.len(), &e);
        }
        let mut topics = self.topics.write();
        names
            .iter()
            .map(|name| {
                topics
                    .remove(name)
                    .map(|_| ())
                    .ok_or_else(|| TransportError::NotFound(format!("topic {}", name)))
            })
            .collect()
    }

    async fn list_access_entries(&self, filter: &AccessFilter) -> PortResult<Vec<AccessEntry>> {
        self.faults.check("list_access_entries").await?;
        Ok(self
            .acls
            .read()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn create_access_entries(&self, entries: &[AccessEntry]) -> BatchResult {
        self.record(
            "create_access_entries",
            entries.iter().map(|e| e.to_string()).collect(),
        );
        if let Err(e) = self.faults.check("create_access_entries").await {
            return fail_batch(entries.len(), &e);
        }
        let mut acls = self.acls.write();
        entries
            .iter()
            .map(|entry| {
                acls.insert(entry.clone());
                Ok(())
            })
            .collect()
    }

    async fn delete_access_entries(&self, filters: &[AccessFilter]) -> BatchResult {
        self.record(
            "delete_access_entries",
            filters.iter().map(|f| f.to_string()).collect(),
        );
        if let Err(e) = self.faults.check("delete_access_entries").await {
            return fail_batch(filters.len(), &e);
        }
        let mut acls = self.acls.write();
        filters
            .iter()
            .map(|filter| {
                acls.retain(|entry| !filter.matches(entry));
                Ok(())
            })
            .collect()
    }

    async fn list_consumer_groups(&self) -> PortResult<Vec<String>> {
        self.faults.check("list_consumer_groups").await?;
        Ok(self.groups.read().keys().cloned().collect())
    }

    async fn describe_consumer_groups(
        &self,
        ids: &[String],
    ) -> PortResult<Vec<ObservedConsumerGroup>> {
        self.faults.check("describe_consumer_groups").await?;
        let groups = self.groups.read();
        Ok(ids
            .iter()
            .map(|id| match groups.get(id) {
                Some(group) => ObservedConsumerGroup {
                    id: id.clone(),
                    state: group.state,
                    offsets: BTreeMap::new(),
                },
                None => ObservedConsumerGroup {
                    id: id.clone(),
                    state: GroupState::Dead,
                    offsets: BTreeMap::new(),
                },
            })
            .collect())
    }

    async fn list_consumer_group_offsets(
        &self,
        id: &str,
    ) -> PortResult<BTreeMap<TopicPartition, i64>> {
        self.faults.check("list_consumer_group_offsets").await?;
        Ok(self
            .groups
            .read()
            .get(id)
            .map(|g| g.offsets.clone())
            .unwrap_or_default())
    }

    async fn describe_cluster(&self) -> PortResult<String> {
        self.faults.check("describe_cluster").await?;
        Ok(self.cluster_id.clone())
    }
}

/// In-memory schema registry
pub struct MemoryRegistry {
    next_id: AtomicU32,
    subjects: DashMap<String, Vec<RegisteredSchema>>,
    compatibility: DashMap<String, CompatibilityMode>,
    /// Subjects whose compatibility check rejects any new content
    incompatible: DashSet<String>,
    faults: Faults,
    mutations: Mutex<Vec<MutationCall>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            subjects: DashMap::new(),
            compatibility: DashMap::new(),
            incompatible: DashSet::new(),
            faults: Faults::default(),
            mutations: Mutex::new(Vec::new()),
        }
    }

    /// Seed a version
    pub fn with_schema(self, subject: &str, format: SchemaFormat, content: &str) -> Self {
        self.push_version(subject, format, content);
        self
    }

    /// Seed a subject-level compatibility mode
    pub fn with_compatibility(self, subject: &str, mode: CompatibilityMode) -> Self {
        self.compatibility.insert(subject.to_string(), mode);
        self
    }

    /// Reject new versions of `subject` as incompatible
    pub fn reject_new_versions(&self, subject: &str) {
        self.incompatible.insert(subject.to_string());
    }

    pub fn fail(&self, method: &str, error: TransportError) {
        self.faults.failures.insert(method.to_string(), error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.faults.delay.write() = Some(delay);
    }

    pub fn mutations(&self) -> Vec<MutationCall> {
        self.mutations.lock().clone()
    }

    pub fn versions(&self, subject: &str) -> Vec<RegisteredSchema> {
        self.subjects
            .get(subject)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn compatibility_of(&self, subject: &str) -> Option<CompatibilityMode> {
        self.compatibility.get(subject).map(|m| *m)
    }

    fn push_version(&self, subject: &str, format: SchemaFormat, content: &str) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut versions = self.subjects.entry(subject.to_string()).or_default();
        let version = versions.last().map(|v| v.version + 1).unwrap_or(1);
        versions.push(RegisteredSchema {
            subject: subject.to_string(),
            id,
            version,
            format,
            content: content.to_string(),
        });
        id
    }

    fn record(&self, method: &'static str, subject: &str) {
        self.mutations.lock().push(MutationCall {
            method,
            targets: vec![subject.to_string()],
        });
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaRegistryPort for MemoryRegistry {
    async fn list_subjects(&self) -> PortResult<Vec<String>> {
        self.faults.check("list_subjects").await?;
        let mut subjects: Vec<String> = self.subjects.iter().map(|e| e.key().clone()).collect();
        subjects.sort();
        Ok(subjects)
    }

    async fn get_schema(&self, subject: &str) -> PortResult<RegisteredSchema> {
        self.faults.check("get_schema").await?;
        self.subjects
            .get(subject)
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| TransportError::NotFound(format!("subject {}", subject)))
    }

    async fn register_schema(
        &self,
        subject: &str,
        content: &str,
        format: SchemaFormat,
    ) -> PortResult<u32> {
        self.record("register_schema", subject);
        self.faults.check("register_schema").await?;

        let latest = self
            .subjects
            .get(subject)
            .and_then(|versions| versions.last().cloned());
        if let Some(latest) = latest {
            if normalize_content(format, &latest.content) == normalize_content(format, content) {
                return Ok(latest.id);
            }
            if self.incompatible.contains(subject) {
                return Err(TransportError::Incompatible(format!(
                    "schema being registered is incompatible with an earlier schema for subject {}",
                    subject
                )));
            }
        }
        Ok(self.push_version(subject, format, content))
    }

    async fn delete_subject(&self, subject: &str) -> PortResult<Vec<u32>> {
        self.record("delete_subject", subject);
        self.faults.check("delete_subject").await?;
        self.compatibility.remove(subject);
        self.subjects
            .remove(subject)
            .map(|(_, versions)| versions.iter().map(|v| v.version).collect())
            .ok_or_else(|| TransportError::NotFound(format!("subject {}", subject)))
    }

    async fn check_compatibility(
        &self,
        subject: &str,
        _content: &str,
        _format: SchemaFormat,
    ) -> PortResult<bool> {
        self.faults.check("check_compatibility").await?;
        Ok(!self.incompatible.contains(subject))
    }

    async fn set_compatibility(&self, subject: &str, mode: CompatibilityMode) -> PortResult<()> {
        self.record("set_compatibility", subject);
        self.faults.check("set_compatibility").await?;
        self.compatibility.insert(subject.to_string(), mode);
        Ok(())
    }

    async fn get_compatibility(&self, subject: &str) -> PortResult<Option<CompatibilityMode>> {
        self.faults.check("get_compatibility").await?;
        Ok(self.compatibility_of(subject))
    }
}

/// In-memory topology store keyed by directory
#[derive(Default)]
pub struct MemoryTopologyStore {
    units: RwLock<BTreeMap<PathBuf, BTreeMap<String, TopologyUnit>>>,
    writes: Mutex<Vec<String>>,
}

impl MemoryTopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a unit under `directory`
    pub fn with_unit(self, directory: impl AsRef<Path>, unit: TopologyUnit) -> Self {
        self.units
            .write()
            .entry(directory.as_ref().to_path_buf())
            .or_default()
            .insert(unit.source.clone(), unit);
        self
    }

    /// Sources written so far
    pub fn written(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    pub fn unit(&self, directory: impl AsRef<Path>, name: &str) -> Option<TopologyUnit> {
        self.units
            .read()
            .get(directory.as_ref())
            .and_then(|units| units.get(name).cloned())
    }
}

#[async_trait]
impl TopologyStore for MemoryTopologyStore {
    async fn list_units(&self, directory: &Path) -> Result<Vec<String>, StoreError> {
        Ok(self
            .units
            .read()
            .get(directory)
            .map(|units| units.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn read_unit(&self, directory: &Path, name: &str) -> Result<TopologyUnit, StoreError> {
        self.unit(directory, name)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", directory.display(), name)))
    }

    async fn write_unit(&self, directory: &Path, unit: &TopologyUnit) -> Result<(), StoreError> {
        self.writes.lock().push(unit.source.clone());
        self.units
            .write()
            .entry(directory.to_path_buf())
            .or_default()
            .insert(unit.source.clone(), unit.clone());
        Ok(())
    }
}
