//! Run report
//!
//! Every planned operation of a deploy run ends up here with its outcome,
//! together with resource-level read failures and orphan usage details.

use crate::error::TransportError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Loaded,
    Validated,
    Diffed,
    Applying,
    Done,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Loaded => write!(f, "Loaded"),
            RunState::Validated => write!(f, "Validated"),
            RunState::Diffed => write!(f, "Diffed"),
            RunState::Applying => write!(f, "Applying"),
            RunState::Done => write!(f, "Done"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

/// Kind of a planned operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateTopic,
    ExpandPartitions,
    AlterConfig,
    DeleteTopic,
    CreateAccessEntry,
    DeleteAccessEntry,
    RegisterSchema,
    SetCompatibility,
    DeleteSubject,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationKind::CreateTopic => "create_topic",
            OperationKind::ExpandPartitions => "expand_partitions",
            OperationKind::AlterConfig => "alter_config",
            OperationKind::DeleteTopic => "delete_topic",
            OperationKind::CreateAccessEntry => "create_access_entry",
            OperationKind::DeleteAccessEntry => "delete_access_entry",
            OperationKind::RegisterSchema => "register_schema",
            OperationKind::SetCompatibility => "set_compatibility",
            OperationKind::DeleteSubject => "delete_subject",
        };
        write!(f, "{}", s)
    }
}

/// Resource kind whose observed state is read as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cluster,
    Topics,
    AccessEntries,
    Schemas,
    ConsumerGroups,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Cluster => write!(f, "cluster"),
            ResourceKind::Topics => write!(f, "topics"),
            ResourceKind::AccessEntries => write!(f, "access_entries"),
            ResourceKind::Schemas => write!(f, "schemas"),
            ResourceKind::ConsumerGroups => write!(f, "consumer_groups"),
        }
    }
}

/// Why an operation was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Deletion gate for this resource kind is closed
    DeletionNotAllowed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DeletionNotAllowed => write!(f, "deletion not allowed"),
        }
    }
}

/// Outcome of one planned operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    WouldApply,
    Skipped { reason: SkipReason },
    Failed { error: String, retryable: bool },
    Conflict { message: String },
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Applied => write!(f, "applied"),
            Outcome::WouldApply => write!(f, "would apply"),
            Outcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            Outcome::Failed { error, retryable } => {
                if *retryable {
                    write!(f, "failed, retryable ({})", error)
                } else {
                    write!(f, "failed ({})", error)
                }
            }
            Outcome::Conflict { message } => write!(f, "conflict ({})", message),
        }
    }
}

/// One planned operation and what happened to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub target: String,
    /// Human readable description of the change
    pub action: String,
    pub outcome: Outcome,
}

/// A read that failed and aborted the plan of its resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFailure {
    pub kind: ResourceKind,
    pub operation: String,
    pub error: String,
    pub error_kind: String,
    pub retryable: bool,
}

impl ResourceFailure {
    pub fn new(kind: ResourceKind, operation: impl Into<String>, error: &TransportError) -> Self {
        Self {
            kind,
            operation: operation.into(),
            error: error.to_string(),
            error_kind: error.kind().to_string(),
            retryable: error.is_retryable(),
        }
    }

    /// The backing client cannot perform this read at all
    pub fn is_unsupported(&self) -> bool {
        self.error_kind == "unsupported"
    }
}

/// Usage of an orphaned topic, gathered before deletion is considered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanUsage {
    pub topic: String,
    /// Sum of partition high watermarks
    pub messages: i64,
    /// Consumer groups holding committed offsets on the topic
    pub consumer_groups: Vec<String>,
}

/// Outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub applied: usize,
    pub would_apply: usize,
    pub skipped: usize,
    pub failed: usize,
    pub conflicts: usize,
}

/// Result of a deploy run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub cluster_id: Option<String>,
    pub dry_run: bool,
    pub domain_filter: Option<String>,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub operations: Vec<OperationRecord>,
    pub read_failures: Vec<ResourceFailure>,
    pub orphan_usage: Vec<OrphanUsage>,
}

impl RunReport {
    pub fn new(dry_run: bool, domain_filter: Option<String>) -> Self {
        Self {
            cluster_id: None,
            dry_run,
            domain_filter,
            state: RunState::Loaded,
            started_at: Utc::now(),
            duration_ms: 0,
            operations: Vec::new(),
            read_failures: Vec::new(),
            orphan_usage: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        kind: OperationKind,
        target: impl Into<String>,
        action: impl Into<String>,
        outcome: Outcome,
    ) {
        self.operations.push(OperationRecord {
            kind,
            target: target.into(),
            action: action.into(),
            outcome,
        });
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for op in &self.operations {
            match op.outcome {
                Outcome::Applied => summary.applied += 1,
                Outcome::WouldApply => summary.would_apply += 1,
                Outcome::Skipped { .. } => summary.skipped += 1,
                Outcome::Failed { .. } => summary.failed += 1,
                Outcome::Conflict { .. } => summary.conflicts += 1,
            }
        }
        summary
    }

    /// Any failed operation or conflict, or a read that failed for a
    /// reason other than the client not supporting it
    pub fn has_failures(&self) -> bool {
        let summary = self.summary();
        summary.failed > 0
            || summary.conflicts > 0
            || self.read_failures.iter().any(|f| !f.is_unsupported())
    }

    /// Operations of one kind
    pub fn operations_of(&self, kind: OperationKind) -> impl Iterator<Item = &OperationRecord> {
        self.operations.iter().filter(move |op| op.kind == kind)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "cluster: {}{}",
            self.cluster_id.as_deref().unwrap_or("unknown"),
            if self.dry_run { " (dry run)" } else { "" }
        )?;
        if let Some(domain) = &self.domain_filter {
            writeln!(f, "domain: {}", domain)?;
        }
        writeln!(f, "state: {}", self.state)?;
        for op in &self.operations {
            writeln!(f, "  {} {}: {} -> {}", op.kind, op.target, op.action, op.outcome)?;
        }
        for failure in &self.read_failures {
            writeln!(
                f,
                "  read of {} failed in {}: {}",
                failure.kind, failure.operation, failure.error
            )?;
        }
        for usage in &self.orphan_usage {
            writeln!(
                f,
                "  orphan {} holds {} messages, consumer groups: [{}]",
                usage.topic,
                usage.messages,
                usage.consumer_groups.join(", ")
            )?;
        }
        let s = self.summary();
        write!(
            f,
            "{} applied, {} would apply, {} skipped, {} failed, {} conflicts",
            s.applied, s.would_apply, s.skipped, s.failed, s.conflicts
        )
    }
}
