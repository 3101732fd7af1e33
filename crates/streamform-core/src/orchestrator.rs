//! Deploy orchestrator
//!
//! A deploy run moves through `Loaded -> Validated -> Diffed -> Applying ->
//! Done`, or ends in `Failed` when the declared topology is rejected. Static
//! rules run before any remote call; the partition rule runs once topics have
//! been observed and before anything is planned. Reads of different resource
//! kinds run concurrently and a failed read only drops the plan of its own
//! kind. Apply batches of different kinds also run concurrently. Every
//! collaborator call is bounded by the configured operation timeout.

use crate::acl::{AccessEntry, AccessFilter};
use crate::config::{DeployOptions, EngineConfig};
use crate::domain::{DeclaredTopology, TopologyUnit};
use crate::error::{Result, StoreError, StreamformError, TransportError};
use crate::observed::{
    dynamic_config, partition_counts, GroupState, ObservedPartition, ObservedTopic, TopicPartition,
};
use crate::ports::{fail_batch, BatchResult, ClusterAdmin, PortResult, SchemaRegistryPort, TopologyStore};
use crate::reconcile::{
    derive_access_entries, plan_access_changes, plan_schema_changes, plan_topic_changes,
    AccessPlan, ConfigResource, OrphanScope, RegisteredSubjects, SchemaChange, SchemaChangeReason,
    SchemaPlan, TopicPlan, TopicSpec,
};
use crate::report::{
    OperationKind, OperationRecord, OrphanUsage, Outcome, ResourceFailure, ResourceKind, RunReport,
    RunState, SkipReason,
};
use crate::restore::{build_unit, discover_domains, parse_topic_name, RestoredSchema};
use crate::schema::{split_subject, BoundSchema};
use crate::validation::{RuleId, ValidationReport, Validator, Violation};
use futures::future::{join_all, try_join_all};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Metrics for deploy runs
pub struct OrchestratorMetrics {
    /// Counter for deploy runs
    pub runs: metrics::Counter,
    /// Counter for runs rejected or ending with failed operations
    pub failed_runs: metrics::Counter,
    /// Counter for applied operations
    pub operations_applied: metrics::Counter,
    /// Counter for failed operations
    pub operations_failed: metrics::Counter,
    /// Histogram for run duration
    pub duration: metrics::Histogram,
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        Self {
            runs: metrics::counter!("streamform_runs_total"),
            failed_runs: metrics::counter!("streamform_runs_failed_total"),
            operations_applied: metrics::counter!("streamform_operations_applied_total"),
            operations_failed: metrics::counter!("streamform_operations_failed_total"),
            duration: metrics::histogram!("streamform_run_duration_seconds"),
        }
    }
}

impl Default for OrchestratorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A read that failed, with the port method that failed
#[derive(Debug)]
struct ReadError {
    operation: &'static str,
    error: TransportError,
}

impl ReadError {
    fn new(operation: &'static str) -> impl FnOnce(TransportError) -> Self {
        move |error| Self { operation, error }
    }

    fn into_failure(self, kind: ResourceKind) -> ResourceFailure {
        ResourceFailure::new(kind, self.operation, &self.error)
    }
}

type Read<T> = std::result::Result<T, ReadError>;

/// Observed topics plus the config read failure when configs were unavailable
type TopicsRead = (Vec<ObservedTopic>, Option<ReadError>);

/// An operation waiting for its outcome
struct Planned {
    kind: OperationKind,
    target: String,
    action: String,
}

impl Planned {
    fn new(kind: OperationKind, target: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            action: action.into(),
        }
    }

    fn settle(self, outcome: Outcome) -> OperationRecord {
        OperationRecord {
            kind: self.kind,
            target: self.target,
            action: self.action,
            outcome,
        }
    }
}

fn failed(error: &TransportError) -> Outcome {
    Outcome::Failed {
        error: error.to_string(),
        retryable: error.is_retryable(),
    }
}

fn restrict(report: ValidationReport, domains: Option<&[String]>) -> Vec<Violation> {
    match domains {
        Some(domains) => report.for_domains(domains).into_violations(),
        None => report.into_violations(),
    }
}

fn scope_domains(topology: &DeclaredTopology, filter: Option<&str>) -> Result<Option<Vec<String>>> {
    match filter {
        None => Ok(None),
        Some(domain) if topology.find_domain(domain).is_some() => Ok(Some(vec![domain.to_string()])),
        Some(domain) => Err(StreamformError::UnknownDomain(domain.to_string())),
    }
}

fn transition(report: &mut RunReport, state: RunState) {
    if report.state != state {
        info!(from = %report.state, to = %state, "Run state changed");
        report.state = state;
    }
}

fn take<T>(report: &mut RunReport, kind: ResourceKind, read: Read<T>) -> Option<T> {
    match read {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                kind = %kind,
                operation = err.operation,
                error = %err.error,
                "Read failed; skipping this resource kind"
            );
            report.read_failures.push(err.into_failure(kind));
            None
        }
    }
}

fn tolerate_unsupported<T: Default>(read: Read<T>) -> Result<T> {
    match read {
        Ok(value) => Ok(value),
        Err(ReadError {
            operation,
            error: TransportError::Unsupported(reason),
        }) => {
            warn!(operation, reason = %reason, "Read not supported by the client; restoring without it");
            Ok(T::default())
        }
        Err(err) => Err(err.error.into()),
    }
}

/// Drives validation, observation, planning and gated apply
pub struct Orchestrator {
    cluster: Arc<dyn ClusterAdmin>,
    registry: Arc<dyn SchemaRegistryPort>,
    store: Arc<dyn TopologyStore>,
    config: EngineConfig,
    validator: Validator,
    timeout: Duration,
    metrics: Option<OrchestratorMetrics>,
}

impl Orchestrator {
    /// Create an orchestrator; the config is validated here
    pub fn new(
        cluster: Arc<dyn ClusterAdmin>,
        registry: Arc<dyn SchemaRegistryPort>,
        store: Arc<dyn TopologyStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let config = config.checked()?;
        Ok(Self {
            cluster,
            registry,
            store,
            validator: Validator::new(config.validation.clone()),
            timeout: config.operation_timeout(),
            config,
            metrics: None,
        })
    }

    /// Record run metrics
    pub fn with_metrics(mut self) -> Self {
        self.metrics = Some(OrchestratorMetrics::new());
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = PortResult<T>>,
    ) -> PortResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.timeout, "Call timed out");
                Err(TransportError::Timeout {
                    operation: operation.to_string(),
                    after: self.timeout,
                })
            }
        }
    }

    async fn bounded_store<T>(
        &self,
        operation: &str,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout {
                operation: operation.to_string(),
                after: self.timeout,
            }
            .into()),
        }
    }

    /// Read every unit of a topology directory
    #[instrument(skip(self))]
    pub async fn load(&self, directory: &Path) -> Result<DeclaredTopology> {
        let names = self
            .bounded_store("list_units", self.store.list_units(directory))
            .await?;
        let units = try_join_all(
            names
                .iter()
                .map(|name| self.bounded_store("read_unit", self.store.read_unit(directory, name))),
        )
        .await?;
        debug!(units = units.len(), "Loaded topology units");
        Ok(DeclaredTopology::new(units))
    }

    /// Run the static rules without contacting the cluster
    ///
    /// Rules always see the whole topology; with a domain filter only
    /// violations involving that domain are returned.
    #[instrument(skip(self))]
    pub async fn validate_only(
        &self,
        directory: &Path,
        domain_filter: Option<&str>,
    ) -> Result<Vec<Violation>> {
        let topology = self.load(directory).await?;
        let domains = scope_domains(&topology, domain_filter)?;
        let violations = restrict(self.validator.validate(&topology, None), domains.as_deref());
        info!(violations = violations.len(), "Validation finished");
        Ok(violations)
    }

    /// Converge the cluster and registry towards the declared topology
    #[instrument(skip(self, options), fields(dry_run = options.dry_run, domain = ?options.domain_filter))]
    pub async fn deploy(&self, directory: &Path, options: &DeployOptions) -> Result<RunReport> {
        let start = Instant::now();
        if let Some(ref metrics) = self.metrics {
            metrics.runs.increment(1);
        }

        let result = self.run_deploy(directory, options, start).await;

        if let Some(ref metrics) = self.metrics {
            metrics.duration.record(start.elapsed().as_secs_f64());
            if result.as_ref().map_or(true, RunReport::has_failures) {
                metrics.failed_runs.increment(1);
            }
        }
        result
    }

    async fn run_deploy(
        &self,
        directory: &Path,
        options: &DeployOptions,
        start: Instant,
    ) -> Result<RunReport> {
        let mut report = RunReport::new(options.dry_run, options.domain_filter.clone());
        let topology = self.load(directory).await?;
        info!(units = topology.units.len(), state = %report.state, "Topology loaded");

        let domains = scope_domains(&topology, options.domain_filter.as_deref())?;
        let violations = restrict(self.validator.validate(&topology, None), domains.as_deref());
        if !violations.is_empty() {
            transition(&mut report, RunState::Failed);
            warn!(violations = violations.len(), "Declared topology rejected");
            return Err(StreamformError::Validation(violations));
        }
        transition(&mut report, RunState::Validated);

        let in_scope = topology.topics_in(domains.as_deref());
        let declared_topics: Vec<TopicSpec> = in_scope.iter().map(TopicSpec::from_declared).collect();
        let declared_schemas: Vec<BoundSchema> = in_scope.iter().flat_map(|t| t.schemas()).collect();
        let declared_subjects: BTreeSet<String> =
            declared_schemas.iter().map(|s| s.subject.clone()).collect();

        let filter = AccessFilter::any();
        let (cluster_id, topics, access_entries, subjects) = tokio::join!(
            self.bounded("describe_cluster", self.cluster.describe_cluster()),
            self.read_topics(),
            self.bounded("list_access_entries", self.cluster.list_access_entries(&filter)),
            self.read_subjects(&declared_subjects),
        );

        let cluster_id = take(
            &mut report,
            ResourceKind::Cluster,
            cluster_id.map_err(ReadError::new("describe_cluster")),
        );
        report.cluster_id = cluster_id;
        let access_entries = take(
            &mut report,
            ResourceKind::AccessEntries,
            access_entries.map_err(ReadError::new("list_access_entries")),
        );
        let subjects = take(&mut report, ResourceKind::Schemas, subjects);
        let mut configs_known = true;
        let observed_topics = take(&mut report, ResourceKind::Topics, topics).map(
            |(topics, config_failure)| {
                if let Some(err) = config_failure {
                    warn!(error = %err.error, "Topic configs unavailable; config changes are not planned");
                    report.read_failures.push(err.into_failure(ResourceKind::Topics));
                    configs_known = false;
                }
                topics
            },
        );

        if let Some(ref topics) = observed_topics {
            let counts = partition_counts(topics);
            let violations = restrict(
                self.validator
                    .validate_rule(RuleId::PartitionMonotonic, &topology, Some(&counts)),
                domains.as_deref(),
            );
            if !violations.is_empty() {
                transition(&mut report, RunState::Failed);
                warn!(violations = violations.len(), "Declared partitions below observed");
                return Err(StreamformError::Validation(violations));
            }
        }

        let scope = match domains {
            Some(_) => OrphanScope::disabled(),
            None => OrphanScope::cluster(
                topology.domains().map(|d| d.name.clone()),
                topology.principals().map(str::to_string),
                self.config.protected_topic_prefixes.clone(),
            ),
        };

        let topic_plan = observed_topics.as_ref().map(|topics| {
            let mut plan = plan_topic_changes(&declared_topics, topics, &scope);
            if !configs_known {
                plan.alter_configs.clear();
            }
            plan
        });

        let access_plan = access_entries.map(|observed| {
            let derived = match domains {
                Some(ref names) => {
                    derive_access_entries(names.iter().filter_map(|n| topology.find_domain(n)))
                }
                None => derive_access_entries(topology.domains()),
            };
            plan_access_changes(&derived, &observed, &scope)
        });

        let schema_plan = subjects.map(|registered| {
            let every_declared_topic: BTreeSet<String> =
                topology.topics().iter().map(|t| t.full_name()).collect();
            plan_schema_changes(&declared_schemas, &registered, &every_declared_topic, &scope)
        });

        transition(&mut report, RunState::Diffed);
        if let Some(ref plan) = topic_plan {
            info!(
                create = plan.create.len(),
                expand = plan.expand_partitions.len(),
                alter = plan.alter_configs.len(),
                orphaned = plan.orphaned.len(),
                conflicts = plan.conflicts.len(),
                "Topic plan"
            );
        }
        if let Some(ref plan) = access_plan {
            info!(create = plan.create.len(), orphaned = plan.orphaned.len(), "Access plan");
        }
        if let Some(ref plan) = schema_plan {
            info!(
                register = plan.register.len(),
                set_compatibility = plan.set_compatibility.len(),
                orphaned = plan.orphaned.len(),
                "Schema plan"
            );
        }

        if let (Some(plan), Some(topics)) = (&topic_plan, &observed_topics) {
            if !plan.orphaned.is_empty() {
                let orphans: Vec<&ObservedTopic> = topics
                    .iter()
                    .filter(|t| plan.orphaned.contains(&t.name))
                    .collect();
                report.orphan_usage = self.orphan_usage(&orphans).await;
            }
        }

        transition(&mut report, RunState::Applying);
        let (topic_records, access_records, schema_records) = tokio::join!(
            self.apply_topics(topic_plan.as_ref(), options),
            self.apply_access(access_plan.as_ref(), options),
            self.apply_schemas(schema_plan.as_ref(), options),
        );
        report.operations.extend(topic_records);
        report.operations.extend(access_records);
        report.operations.extend(schema_records);

        transition(&mut report, RunState::Done);
        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let summary = report.summary();
        info!(
            applied = summary.applied,
            would_apply = summary.would_apply,
            skipped = summary.skipped,
            failed = summary.failed,
            conflicts = summary.conflicts,
            "Deploy finished"
        );
        Ok(report)
    }

    /// List topics, then describe them and read their configs
    async fn read_topics(&self) -> Read<TopicsRead> {
        let names = self
            .bounded("list_topics", self.cluster.list_topics())
            .await
            .map_err(ReadError::new("list_topics"))?;
        if names.is_empty() {
            return Ok((Vec::new(), None));
        }

        let resources: Vec<ConfigResource> =
            names.iter().map(|n| ConfigResource::topic(n.clone())).collect();
        let (descriptions, configs) = tokio::join!(
            self.bounded("describe_topics", self.cluster.describe_topics(&names)),
            self.bounded("describe_configs", self.cluster.describe_configs(&resources)),
        );
        let descriptions = descriptions.map_err(ReadError::new("describe_topics"))?;
        let (mut configs, config_failure) = match configs {
            Ok(configs) => (configs, None),
            Err(error @ TransportError::Unsupported(_)) => (
                BTreeMap::new(),
                Some(ReadError {
                    operation: "describe_configs",
                    error,
                }),
            ),
            Err(error) => {
                return Err(ReadError {
                    operation: "describe_configs",
                    error,
                })
            }
        };

        let topics = descriptions
            .into_iter()
            .map(|d| {
                let config = configs
                    .remove(&ConfigResource::topic(d.name.clone()))
                    .map(|entries| dynamic_config(&entries))
                    .unwrap_or_default();
                ObservedTopic {
                    partitions: d
                        .partitions
                        .into_iter()
                        .map(|id| ObservedPartition {
                            id,
                            high_watermark: None,
                            timestamp: None,
                        })
                        .collect(),
                    name: d.name,
                    replication_factor: d.replication_factor,
                    config,
                }
            })
            .collect();
        Ok((topics, config_failure))
    }

    /// List subjects and fetch the latest version of the declared ones
    async fn read_subjects(&self, declared: &BTreeSet<String>) -> Read<RegisteredSubjects> {
        let subjects = self
            .bounded("list_subjects", self.registry.list_subjects())
            .await
            .map_err(ReadError::new("list_subjects"))?;
        let registered = RegisteredSubjects::new(subjects);

        let present: Vec<&String> = declared.iter().filter(|s| registered.contains(s)).collect();
        let (latest, modes) = tokio::join!(
            try_join_all(
                present
                    .iter()
                    .map(|subject| self.bounded("get_schema", self.registry.get_schema(subject))),
            ),
            join_all(present.iter().map(|subject| async move {
                let mode = self
                    .bounded("get_compatibility", self.registry.get_compatibility(subject))
                    .await;
                (subject.to_string(), mode)
            })),
        );
        let latest = latest.map_err(ReadError::new("get_schema"))?;

        let mut registered = latest.into_iter().fold(registered, RegisteredSubjects::with_latest);
        for (subject, mode) in modes {
            registered = match mode {
                Ok(mode) => registered.with_compatibility(subject, mode),
                Err(TransportError::NotFound(_)) => registered.with_compatibility(subject, None),
                Err(TransportError::Unsupported(reason)) => {
                    debug!(subject = %subject, reason = %reason, "Compatibility not readable");
                    registered
                }
                Err(error) => {
                    return Err(ReadError {
                        operation: "get_compatibility",
                        error,
                    })
                }
            };
        }
        Ok(registered)
    }

    /// Message counts and consumer groups of orphaned topics
    async fn orphan_usage(&self, orphans: &[&ObservedTopic]) -> Vec<OrphanUsage> {
        let partitions: Vec<TopicPartition> = orphans
            .iter()
            .flat_map(|t| t.partitions.iter().map(|p| TopicPartition::new(t.name.clone(), p.id)))
            .collect();

        let (offsets, groups) = tokio::join!(
            self.bounded("list_offsets", self.cluster.list_offsets(&partitions)),
            self.committed_offsets(),
        );
        let offsets = offsets.unwrap_or_else(|e| {
            warn!(error = %e, "Could not read orphan offsets");
            HashMap::new()
        });
        let groups = groups.unwrap_or_else(|e| {
            warn!(error = %e, "Could not read consumer group offsets");
            Vec::new()
        });

        orphans
            .iter()
            .map(|topic| {
                let mut topic = (*topic).clone();
                topic.attach_offsets(&offsets);
                let messages: i64 = topic
                    .partitions
                    .iter()
                    .filter_map(|p| p.high_watermark)
                    .sum();
                let consumer_groups = groups
                    .iter()
                    .filter(|(_, committed)| committed.keys().any(|tp| tp.topic == topic.name))
                    .map(|(id, _)| id.clone())
                    .collect();
                if topic.has_data() {
                    warn!(topic = %topic.name, messages, "Orphaned topic still holds data");
                }
                OrphanUsage {
                    topic: topic.name,
                    messages,
                    consumer_groups,
                }
            })
            .collect()
    }

    /// Committed offsets of every live consumer group
    async fn committed_offsets(&self) -> PortResult<Vec<(String, BTreeMap<TopicPartition, i64>)>> {
        let ids = self
            .bounded("list_consumer_groups", self.cluster.list_consumer_groups())
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let groups = self
            .bounded(
                "describe_consumer_groups",
                self.cluster.describe_consumer_groups(&ids),
            )
            .await?;

        try_join_all(
            groups
                .into_iter()
                .filter(|g| g.state != GroupState::Dead)
                .map(|group| async move {
                    let offsets = if group.offsets.is_empty() {
                        self.bounded(
                            "list_consumer_group_offsets",
                            self.cluster.list_consumer_group_offsets(&group.id),
                        )
                        .await?
                    } else {
                        group.offsets
                    };
                    Ok::<_, TransportError>((group.id, offsets))
                }),
        )
        .await
    }

    fn settle(&self, planned: Planned, outcome: Outcome) -> OperationRecord {
        match &outcome {
            Outcome::Applied => {
                if let Some(ref metrics) = self.metrics {
                    metrics.operations_applied.increment(1);
                }
                debug!(kind = %planned.kind, target = %planned.target, "Applied");
            }
            Outcome::Failed { error, retryable } => {
                if let Some(ref metrics) = self.metrics {
                    metrics.operations_failed.increment(1);
                }
                warn!(
                    kind = %planned.kind,
                    target = %planned.target,
                    error = %error,
                    retryable = *retryable,
                    "Operation failed"
                );
            }
            _ => {}
        }
        planned.settle(outcome)
    }

    /// Run one batch call, or report what it would do
    async fn apply_batch<F, Fut>(
        &self,
        operation: &str,
        planned: Vec<Planned>,
        dry_run: bool,
        call: F,
    ) -> Vec<OperationRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BatchResult>,
    {
        if planned.is_empty() {
            return Vec::new();
        }
        if dry_run {
            return planned
                .into_iter()
                .map(|p| p.settle(Outcome::WouldApply))
                .collect();
        }

        let results = match tokio::time::timeout(self.timeout, call()).await {
            Ok(results) => results,
            Err(_) => {
                warn!(operation, timeout = ?self.timeout, "Batch timed out");
                fail_batch(
                    planned.len(),
                    &TransportError::Timeout {
                        operation: operation.to_string(),
                        after: self.timeout,
                    },
                )
            }
        };

        let mut results = results.into_iter();
        planned
            .into_iter()
            .map(|p| {
                let outcome = match results.next() {
                    Some(Ok(())) => Outcome::Applied,
                    Some(Err(e)) => failed(&e),
                    None => Outcome::Failed {
                        error: format!("{} returned no result", operation),
                        retryable: false,
                    },
                };
                self.settle(p, outcome)
            })
            .collect()
    }

    /// Orphan removal behind its deletion gate
    async fn apply_deletions<F, Fut>(
        &self,
        operation: &str,
        planned: Vec<Planned>,
        allowed: bool,
        dry_run: bool,
        call: F,
    ) -> Vec<OperationRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BatchResult>,
    {
        if !allowed {
            if !planned.is_empty() {
                info!(operation, count = planned.len(), "Deletion not allowed; skipping orphans");
            }
            return planned
                .into_iter()
                .map(|p| {
                    p.settle(Outcome::Skipped {
                        reason: SkipReason::DeletionNotAllowed,
                    })
                })
                .collect();
        }
        self.apply_batch(operation, planned, dry_run, call).await
    }

    async fn apply_topics(
        &self,
        plan: Option<&TopicPlan>,
        options: &DeployOptions,
    ) -> Vec<OperationRecord> {
        let Some(plan) = plan else {
            return Vec::new();
        };

        let mut records: Vec<OperationRecord> = plan
            .conflicts
            .iter()
            .map(|c| {
                Planned::new(OperationKind::ExpandPartitions, &c.resource, "change partition count")
                    .settle(Outcome::Conflict {
                        message: c.message.clone(),
                    })
            })
            .collect();

        let create = plan
            .create
            .iter()
            .map(|spec| {
                Planned::new(
                    OperationKind::CreateTopic,
                    &spec.name,
                    format!(
                        "create with {} partitions, replication factor {}",
                        spec.partitions, spec.replication_factor
                    ),
                )
            })
            .collect();
        records.extend(
            self.apply_batch("create_topics", create, options.dry_run, || {
                self.cluster.create_topics(&plan.create)
            })
            .await,
        );

        let expand = plan
            .expand_partitions
            .iter()
            .map(|e| {
                Planned::new(
                    OperationKind::ExpandPartitions,
                    &e.topic,
                    format!("expand partitions {} -> {}", e.current, e.target),
                )
            })
            .collect();
        records.extend(
            self.apply_batch("create_partitions", expand, options.dry_run, || {
                self.cluster.create_partitions(&plan.expand_partitions)
            })
            .await,
        );

        let changes: Vec<_> = plan
            .alter_configs
            .iter()
            .map(|(resource, ops)| (resource.clone(), ops.clone()))
            .collect();
        let alter = changes
            .iter()
            .map(|(resource, ops)| {
                let action = ops.iter().map(|op| op.to_string()).collect::<Vec<_>>().join(", ");
                Planned::new(OperationKind::AlterConfig, &resource.name, action)
            })
            .collect();
        records.extend(
            self.apply_batch("alter_configs", alter, options.dry_run, || {
                self.cluster.alter_configs(&changes)
            })
            .await,
        );

        let delete = plan
            .orphaned
            .iter()
            .map(|name| Planned::new(OperationKind::DeleteTopic, name, "delete orphaned topic"))
            .collect();
        records.extend(
            self.apply_deletions(
                "delete_topics",
                delete,
                options.allow_delete_topics,
                options.dry_run,
                || self.cluster.delete_topics(&plan.orphaned),
            )
            .await,
        );

        records
    }

    async fn apply_access(
        &self,
        plan: Option<&AccessPlan>,
        options: &DeployOptions,
    ) -> Vec<OperationRecord> {
        let Some(plan) = plan else {
            return Vec::new();
        };

        let create = plan
            .create
            .iter()
            .map(|entry: &AccessEntry| {
                Planned::new(OperationKind::CreateAccessEntry, entry.to_string(), "create grant")
            })
            .collect();
        let mut records = self
            .apply_batch("create_access_entries", create, options.dry_run, || {
                self.cluster.create_access_entries(&plan.create)
            })
            .await;

        let delete = plan
            .orphaned
            .iter()
            .map(|filter| {
                Planned::new(OperationKind::DeleteAccessEntry, filter.to_string(), "delete orphaned grant")
            })
            .collect();
        records.extend(
            self.apply_deletions(
                "delete_access_entries",
                delete,
                options.allow_delete_acls,
                options.dry_run,
                || self.cluster.delete_access_entries(&plan.orphaned),
            )
            .await,
        );

        records
    }

    async fn apply_schemas(
        &self,
        plan: Option<&SchemaPlan>,
        options: &DeployOptions,
    ) -> Vec<OperationRecord> {
        let Some(plan) = plan else {
            return Vec::new();
        };

        let mut records = join_all(
            plan.register
                .iter()
                .map(|change| self.register(change, options.dry_run)),
        )
        .await;

        let modes: Vec<Planned> = plan
            .set_compatibility
            .iter()
            .map(|change| {
                let action = match change.previous {
                    Some(previous) => format!("set compatibility {} (was {})", change.mode, previous),
                    None => format!("set compatibility {} (was the global default)", change.mode),
                };
                Planned::new(OperationKind::SetCompatibility, &change.subject, action)
            })
            .collect();
        records.extend(
            self.apply_batch("set_compatibility", modes, options.dry_run, || async {
                join_all(plan.set_compatibility.iter().map(|change| async move {
                    self.bounded(
                        "set_compatibility",
                        self.registry.set_compatibility(&change.subject, change.mode),
                    )
                    .await
                }))
                .await
            })
            .await,
        );

        let delete: Vec<Planned> = plan
            .orphaned
            .iter()
            .map(|subject| Planned::new(OperationKind::DeleteSubject, subject, "delete orphaned subject"))
            .collect();
        records.extend(
            self.apply_deletions(
                "delete_subject",
                delete,
                options.allow_delete_subjects,
                options.dry_run,
                || async {
                    join_all(plan.orphaned.iter().map(|subject| async move {
                        self.bounded("delete_subject", self.registry.delete_subject(subject))
                            .await
                            .map(|versions| {
                                debug!(subject = %subject, versions = versions.len(), "Subject deleted");
                            })
                    }))
                    .await
                },
            )
            .await,
        );

        records
    }

    /// Register one schema version and set its subject compatibility
    async fn register(&self, change: &SchemaChange, dry_run: bool) -> OperationRecord {
        let schema = &change.schema;
        let action = match change.reason {
            SchemaChangeReason::New => format!("register {} schema", schema.format),
            SchemaChangeReason::ContentChanged {
                previous_version: Some(version),
            } => format!("register {} schema replacing version {}", schema.format, version),
            SchemaChangeReason::ContentChanged {
                previous_version: None,
            } => format!("register {} schema as a new version", schema.format),
        };
        let planned = Planned::new(OperationKind::RegisterSchema, &schema.subject, action);
        if dry_run {
            return planned.settle(Outcome::WouldApply);
        }

        if let SchemaChangeReason::ContentChanged { .. } = change.reason {
            let check = self
                .bounded(
                    "check_compatibility",
                    self.registry
                        .check_compatibility(&schema.subject, &schema.content, schema.format),
                )
                .await;
            match check {
                Ok(true) => {}
                Ok(false) => {
                    let error = TransportError::Incompatible(format!(
                        "{} is not {} compatible with the registered versions",
                        schema.subject, schema.compatibility
                    ));
                    return self.settle(planned, failed(&error));
                }
                Err(e) => return self.settle(planned, failed(&e)),
            }
        }

        let registered = self
            .bounded(
                "register_schema",
                self.registry
                    .register_schema(&schema.subject, &schema.content, schema.format),
            )
            .await;
        let outcome = match registered {
            Ok(id) => {
                debug!(subject = %schema.subject, id, "Schema registered");
                match self
                    .bounded(
                        "set_compatibility",
                        self.registry
                            .set_compatibility(&schema.subject, schema.compatibility),
                    )
                    .await
                {
                    Ok(()) => Outcome::Applied,
                    Err(e) => failed(&e),
                }
            }
            Err(e) => failed(&e),
        };
        self.settle(planned, outcome)
    }

    /// Rebuild topology units from the cluster and registry
    ///
    /// Existing units in `directory` contribute what observed state cannot
    /// carry. With `dry_run` the units are returned without being written.
    #[instrument(skip(self))]
    pub async fn restore(
        &self,
        directory: &Path,
        domain_filter: Option<&str>,
        dry_run: bool,
    ) -> Result<Vec<TopologyUnit>> {
        let existing = self.load(directory).await?;

        let filter = AccessFilter::any();
        let (topics, entries, subjects) = tokio::join!(
            self.read_topics(),
            self.bounded("list_access_entries", self.cluster.list_access_entries(&filter)),
            self.bounded("list_subjects", self.registry.list_subjects()),
        );
        let (topics, config_failure) = tolerate_unsupported(topics)?;
        if let Some(err) = config_failure {
            warn!(error = %err.error, "Topic configs unavailable; restoring without config");
        }
        let entries =
            tolerate_unsupported(entries.map_err(ReadError::new("list_access_entries")))?;
        let subjects = subjects?;

        let discovered = discover_domains(&topics, &entries, &existing.units);
        let selected: Vec<String> = match domain_filter {
            Some(domain) if discovered.contains(domain) => vec![domain.to_string()],
            Some(domain) => return Err(StreamformError::UnknownDomain(domain.to_string())),
            None => discovered.into_iter().collect(),
        };

        let wanted = subjects.iter().filter(|subject| {
            split_subject(subject)
                .and_then(|(topic, _)| parse_topic_name(topic))
                .is_some_and(|(domain, _, _)| selected.iter().any(|s| s == domain))
        });
        let schemas: BTreeMap<String, RestoredSchema> =
            try_join_all(wanted.map(|subject| self.restore_schema(subject)))
                .await?
                .into_iter()
                .collect();

        let units: Vec<TopologyUnit> = selected
            .iter()
            .map(|domain| {
                let prior = existing.units.iter().find(|u| u.domain.name == *domain);
                build_unit(domain, &topics, &entries, &schemas, prior)
            })
            .collect();

        if dry_run {
            info!(units = units.len(), "Restore dry run; nothing written");
            return Ok(units);
        }
        for unit in &units {
            self.bounded_store("write_unit", self.store.write_unit(directory, unit))
                .await?;
        }
        info!(units = units.len(), "Restored topology units");
        Ok(units)
    }

    async fn restore_schema(&self, subject: &str) -> Result<(String, RestoredSchema)> {
        let (schema, compatibility) = tokio::join!(
            self.bounded("get_schema", self.registry.get_schema(subject)),
            self.bounded("get_compatibility", self.registry.get_compatibility(subject)),
        );
        let compatibility = match compatibility {
            Ok(mode) => mode,
            Err(TransportError::NotFound(_)) | Err(TransportError::Unsupported(_)) => None,
            Err(e) => return Err(e.into()),
        };
        Ok((
            subject.to_string(),
            RestoredSchema {
                schema: schema?,
                compatibility,
            },
        ))
    }
}
