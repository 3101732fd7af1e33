//! Topic reconciler
//!
//! Computes topic creations, partition expansions and per-key config
//! changes, plus topics observed on the cluster that nothing declares.

use super::{OrphanScope, ReconcileConflict};
use crate::domain::TopicRef;
use crate::observed::ObservedTopic;
use crate::topic_config::{normalize_config, normalize_value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// A topic to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSpec {
    /// Full topic name
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
    pub config: BTreeMap<String, String>,
}

impl TopicSpec {
    /// Project a declared topic onto its full name with normalized config
    pub fn from_declared(topic: &TopicRef<'_>) -> Self {
        Self {
            name: topic.full_name(),
            partitions: topic.topic.partitions,
            replication_factor: topic.topic.replication_factor,
            config: normalize_config(&topic.topic.config),
        }
    }
}

/// Grow a topic to `target` partitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionExpansion {
    pub topic: String,
    pub current: i32,
    pub target: i32,
}

/// Kind of resource a config change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ConfigResourceKind {
    Topic,
    Broker,
}

/// Key of an alter-configs request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConfigResource {
    pub kind: ConfigResourceKind,
    pub name: String,
}

impl ConfigResource {
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            kind: ConfigResourceKind::Topic,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ConfigResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ConfigResourceKind::Topic => write!(f, "topic:{}", self.name),
            ConfigResourceKind::Broker => write!(f, "broker:{}", self.name),
        }
    }
}

/// Incremental config operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum AlterConfigOp {
    Set { key: String, value: String },
    Delete { key: String },
}

impl AlterConfigOp {
    pub fn key(&self) -> &str {
        match self {
            AlterConfigOp::Set { key, .. } | AlterConfigOp::Delete { key } => key,
        }
    }
}

impl std::fmt::Display for AlterConfigOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlterConfigOp::Set { key, value } => write!(f, "SET {}={}", key, value),
            AlterConfigOp::Delete { key } => write!(f, "DELETE {}", key),
        }
    }
}

/// Planned topic changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicPlan {
    pub create: Vec<TopicSpec>,
    pub expand_partitions: Vec<PartitionExpansion>,
    pub alter_configs: BTreeMap<ConfigResource, Vec<AlterConfigOp>>,
    /// Observed topics with no declared counterpart; never deleted here
    pub orphaned: Vec<String>,
    pub conflicts: Vec<ReconcileConflict>,
}

impl TopicPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.expand_partitions.is_empty()
            && self.alter_configs.is_empty()
            && self.orphaned.is_empty()
            && self.conflicts.is_empty()
    }
}

/// Config operations converging `observed` to `declared`
///
/// Values are compared in normalized form. Keys only in `declared` or with a
/// different value become `SET`; keys only in `observed` become `DELETE`.
pub fn diff_config(
    declared: &BTreeMap<String, String>,
    observed: &BTreeMap<String, String>,
) -> Vec<AlterConfigOp> {
    let declared = normalize_config(declared);
    let keys: BTreeSet<&String> = declared.keys().chain(observed.keys()).collect();

    keys.into_iter()
        .filter_map(|key| match (declared.get(key), observed.get(key)) {
            (Some(want), Some(have)) if *want == normalize_value(key, have) => None,
            (Some(want), _) => Some(AlterConfigOp::Set {
                key: key.clone(),
                value: want.clone(),
            }),
            (None, Some(_)) => Some(AlterConfigOp::Delete { key: key.clone() }),
            (None, None) => None,
        })
        .collect()
}

/// Diff declared topics against the cluster
pub fn plan_topic_changes(
    declared: &[TopicSpec],
    observed: &[ObservedTopic],
    scope: &OrphanScope,
) -> TopicPlan {
    let observed_by_name: BTreeMap<&str, &ObservedTopic> =
        observed.iter().map(|t| (t.name.as_str(), t)).collect();
    let declared_names: BTreeSet<&str> = declared.iter().map(|t| t.name.as_str()).collect();

    let mut plan = TopicPlan::default();

    for spec in declared {
        let Some(current) = observed_by_name.get(spec.name.as_str()) else {
            plan.create.push(TopicSpec {
                config: normalize_config(&spec.config),
                ..spec.clone()
            });
            continue;
        };

        let observed_partitions = current.partition_count();
        if spec.partitions < observed_partitions {
            plan.conflicts.push(ReconcileConflict {
                resource: spec.name.clone(),
                message: format!(
                    "declared {} partitions but the cluster has {}; refusing to shrink",
                    spec.partitions, observed_partitions
                ),
            });
            continue;
        }
        if spec.partitions > observed_partitions {
            plan.expand_partitions.push(PartitionExpansion {
                topic: spec.name.clone(),
                current: observed_partitions,
                target: spec.partitions,
            });
        }

        if let Some(rf) = current.replication_factor {
            if rf != spec.replication_factor {
                warn!(
                    topic = %spec.name,
                    declared = spec.replication_factor,
                    observed = rf,
                    "Replication factor differs; reassignment is not automated"
                );
            }
        }

        let ops = diff_config(&spec.config, &current.config);
        if !ops.is_empty() {
            plan.alter_configs
                .insert(ConfigResource::topic(spec.name.clone()), ops);
        }
    }

    plan.orphaned = observed_by_name
        .keys()
        .filter(|name| !declared_names.contains(*name) && scope.covers_topic(name))
        .map(|name| name.to_string())
        .collect();

    plan
}
