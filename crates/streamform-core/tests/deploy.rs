//! Integration tests for deploy runs against the in-memory ports

mod common;

use common::*;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use streamform_core::memory::{MemoryCluster, MemoryRegistry, MemoryTopologyStore};
use streamform_core::observed::{GroupState, ObservedConsumerGroup, TopicPartition};
use streamform_core::reconcile::derive_access_entries;
use streamform_core::report::{ResourceKind, SkipReason};
use streamform_core::{
    AccessEntry, CompatibilityMode, DeployOptions, Domain, ObservedTopic,
    OperationKind, Operation, Outcome, ResourceType, RuleId, RunState, SchemaFormat,
    StreamformError, Topic, TransportError, Visibility, VisibilityType,
};

fn legacy_cluster() -> MemoryCluster {
    MemoryCluster::new("cluster-1")
        .with_topic(ObservedTopic::new("legacy.events", 2))
        .with_topic(ObservedTopic::new("__consumer_offsets", 50))
        .with_access_entry(AccessEntry::prefixed(
            "User:svc-orders",
            ResourceType::Topic,
            "orders.old.",
            Operation::Read,
        ))
}

fn legacy_registry() -> MemoryRegistry {
    MemoryRegistry::new().with_schema("legacy.events-value", SchemaFormat::Avro, INVOICE)
}

fn outcomes(report: &streamform_core::RunReport, kind: OperationKind) -> Vec<Outcome> {
    report.operations_of(kind).map(|op| op.outcome.clone()).collect()
}

/// Test a first deploy followed by an idempotent second deploy
#[tokio::test]
async fn test_first_deploy_then_noop() {
    let h = Harness::new(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new(),
        store_with([orders(), billing()]),
    );

    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.cluster_id.as_deref(), Some("cluster-1"));
    assert!(!report.has_failures(), "{}", report);

    assert_eq!(
        h.cluster.topic_names(),
        vec![
            "billing.protected.invoices".to_string(),
            "orders.private.state".to_string(),
            "orders.public.created".to_string(),
        ]
    );
    let created = h.cluster.topic("orders.public.created").unwrap();
    assert_eq!(created.partition_count(), 6);
    assert_eq!(created.replication_factor, Some(3));
    assert_eq!(created.config["retention.ms"], "604800000");

    let acls: BTreeSet<AccessEntry> = h.cluster.access_entries().into_iter().collect();
    assert_eq!(acls, derive_access_entries(&[orders(), billing()]));

    assert_eq!(h.registry.versions("orders.public.created-value").len(), 1);
    assert_eq!(
        h.registry.compatibility_of("billing.protected.invoices-value"),
        Some(CompatibilityMode::Backward)
    );

    let cluster_calls = h.cluster.mutations().len();
    let registry_calls = h.registry.mutations().len();

    let again = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    assert!(again.operations.is_empty(), "{}", again);
    assert_eq!(h.cluster.mutations().len(), cluster_calls);
    assert_eq!(h.registry.mutations().len(), registry_calls);
}

/// Test that a dry run plans everything and calls no mutating method
#[tokio::test]
async fn test_dry_run_makes_no_mutations() {
    let h = Harness::new(legacy_cluster(), legacy_registry(), store_with([orders(), billing()]));

    let options = DeployOptions::new().dry_run(true).allow_all_deletes();
    let report = h.orchestrator.deploy(h.dir(), &options).await.unwrap();

    assert!(report.dry_run);
    assert!(!report.operations.is_empty());
    assert!(report
        .operations
        .iter()
        .all(|op| op.outcome == Outcome::WouldApply));
    assert_eq!(report.operations_of(OperationKind::CreateTopic).count(), 3);
    assert_eq!(
        report
            .operations_of(OperationKind::DeleteTopic)
            .map(|op| op.target.as_str())
            .collect::<Vec<_>>(),
        vec!["legacy.events"]
    );
    assert_eq!(report.operations_of(OperationKind::DeleteAccessEntry).count(), 1);
    assert_eq!(report.operations_of(OperationKind::DeleteSubject).count(), 1);

    assert!(h.cluster.mutations().is_empty());
    assert!(h.registry.mutations().is_empty());
    assert!(h.cluster.topic("orders.public.created").is_none());
}

/// Test that closed deletion gates skip orphans and open ones remove them
#[tokio::test]
async fn test_deletion_gates() {
    let h = Harness::new(legacy_cluster(), legacy_registry(), store_with([orders(), billing()]));

    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    let skipped = Outcome::Skipped {
        reason: SkipReason::DeletionNotAllowed,
    };
    assert_eq!(outcomes(&report, OperationKind::DeleteTopic), vec![skipped.clone()]);
    assert_eq!(outcomes(&report, OperationKind::DeleteAccessEntry), vec![skipped.clone()]);
    assert_eq!(outcomes(&report, OperationKind::DeleteSubject), vec![skipped.clone()]);
    assert!(!report.has_failures());
    assert!(h.cluster.topic("legacy.events").is_some());
    assert!(h.cluster.mutations().iter().all(|m| m.method != "delete_topics"));

    let report = h
        .orchestrator
        .deploy(h.dir(), &DeployOptions::new().allow_delete_topics(true))
        .await
        .unwrap();
    assert_eq!(outcomes(&report, OperationKind::DeleteTopic), vec![Outcome::Applied]);
    assert_eq!(outcomes(&report, OperationKind::DeleteAccessEntry), vec![skipped.clone()]);
    assert!(h.cluster.topic("legacy.events").is_none());
    assert!(h.cluster.topic("__consumer_offsets").is_some());

    let report = h
        .orchestrator
        .deploy(h.dir(), &DeployOptions::new().allow_all_deletes())
        .await
        .unwrap();
    assert_eq!(outcomes(&report, OperationKind::DeleteAccessEntry), vec![Outcome::Applied]);
    assert_eq!(outcomes(&report, OperationKind::DeleteSubject), vec![Outcome::Applied]);
    assert!(h.registry.versions("legacy.events-value").is_empty());
    assert_eq!(
        h.cluster.access_entries().into_iter().collect::<BTreeSet<_>>(),
        derive_access_entries(&[orders(), billing()])
    );
}

/// Test that a domain-scoped run touches only that domain and never plans orphans
#[tokio::test]
async fn test_domain_filter_scopes_run() {
    let h = Harness::new(legacy_cluster(), legacy_registry(), store_with([orders(), billing()]));

    let options = DeployOptions::new().domain("orders").allow_all_deletes();
    let report = h.orchestrator.deploy(h.dir(), &options).await.unwrap();

    assert_eq!(report.domain_filter.as_deref(), Some("orders"));
    assert!(report
        .operations
        .iter()
        .all(|op| !op.target.contains("billing.protected")));
    assert_eq!(report.operations_of(OperationKind::DeleteTopic).count(), 0);
    assert_eq!(report.operations_of(OperationKind::DeleteAccessEntry).count(), 0);
    assert_eq!(report.operations_of(OperationKind::DeleteSubject).count(), 0);
    assert!(report.orphan_usage.is_empty());

    assert!(h.cluster.topic("orders.public.created").is_some());
    assert!(h.cluster.topic("billing.protected.invoices").is_none());
    assert!(h.cluster.topic("legacy.events").is_some());

    let acls: BTreeSet<AccessEntry> = h.cluster.access_entries().into_iter().collect();
    assert!(derive_access_entries(&[orders()]).is_subset(&acls));
    assert!(!acls.iter().any(|e| e.principal == "User:svc-billing" && e.resource_name == "billing."));
}

/// Test that an undeclared domain filter is rejected
#[tokio::test]
async fn test_unknown_domain_filter() {
    let h = Harness::new(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new(),
        store_with([orders()]),
    );
    let err = h
        .orchestrator
        .deploy(h.dir(), &DeployOptions::new().domain("shipping"))
        .await
        .unwrap_err();
    assert!(matches!(err, StreamformError::UnknownDomain(ref d) if d == "shipping"));
}

/// Test that static violations abort before anything is changed
#[tokio::test]
async fn test_validation_failure_aborts_run() {
    let broken = Domain::new("shipping", "User:svc-shipping").with_visibility(
        Visibility::new(VisibilityType::Public).with_topic(Topic::new("dispatched", 3)),
    );
    let h = Harness::new(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new(),
        store_with([orders(), broken]),
    );

    let err = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap_err();
    let violations = err.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule, RuleId::SchemaRequired);
    assert_eq!(violations[0].entity, "shipping.public.dispatched");
    assert!(h.cluster.mutations().is_empty());
    assert!(h.registry.mutations().is_empty());

    // Violations outside the filtered domain do not block it
    let report = h
        .orchestrator
        .deploy(h.dir(), &DeployOptions::new().domain("orders"))
        .await
        .unwrap();
    assert_eq!(report.state, RunState::Done);

    let all = h.orchestrator.validate_only(h.dir(), None).await.unwrap();
    assert_eq!(all.len(), 1);
    let scoped = h.orchestrator.validate_only(h.dir(), Some("orders")).await.unwrap();
    assert!(scoped.is_empty());
}

/// Test that declaring fewer partitions than observed fails before diffing
#[tokio::test]
async fn test_partition_decrease_rejected() {
    let h = Harness::new(
        MemoryCluster::new("cluster-1").with_topic(ObservedTopic::new("orders.public.created", 12)),
        MemoryRegistry::new(),
        store_with([orders()]),
    );

    let err = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap_err();
    let violations = err.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule, RuleId::PartitionMonotonic);
    assert!(violations[0].message.contains("12"));
    assert!(h.cluster.mutations().is_empty());
    assert!(h.registry.mutations().is_empty());
    assert_eq!(
        h.cluster.topic("orders.public.created").unwrap().partition_count(),
        12
    );
}

/// Test partition expansion and per-key config convergence
#[tokio::test]
async fn test_expansion_and_config_drift() {
    let h = Harness::new(
        MemoryCluster::new("cluster-1").with_topic(
            ObservedTopic::new("orders.public.created", 3)
                .with_replication_factor(3)
                .with_config("retention.ms", "86400000")
                .with_config("segment.bytes", "1048576"),
        ),
        MemoryRegistry::new(),
        store_with([orders()]),
    );

    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    assert!(!report.has_failures(), "{}", report);

    let expand: Vec<_> = report.operations_of(OperationKind::ExpandPartitions).collect();
    assert_eq!(expand.len(), 1);
    assert_eq!(expand[0].action, "expand partitions 3 -> 6");

    let alter: Vec<_> = report.operations_of(OperationKind::AlterConfig).collect();
    assert_eq!(alter.len(), 1);
    assert_eq!(alter[0].action, "SET retention.ms=604800000, DELETE segment.bytes");

    let topic = h.cluster.topic("orders.public.created").unwrap();
    assert_eq!(topic.partition_count(), 6);
    let expected: BTreeMap<String, String> =
        [("retention.ms".to_string(), "604800000".to_string())].into();
    assert_eq!(topic.config, expected);
}

/// Test that a failed read drops only the plan of its own resource kind
#[tokio::test]
async fn test_read_failure_is_isolated() {
    let h = Harness::new(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new(),
        store_with([orders()]),
    );
    h.cluster.fail(
        "list_access_entries",
        TransportError::Unavailable("authorizer offline".to_string()),
    );

    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    assert_eq!(report.read_failures.len(), 1);
    assert_eq!(report.read_failures[0].kind, ResourceKind::AccessEntries);
    assert!(report.read_failures[0].retryable);
    assert!(report.has_failures());

    assert_eq!(report.operations_of(OperationKind::CreateAccessEntry).count(), 0);
    assert_eq!(
        outcomes(&report, OperationKind::CreateTopic),
        vec![Outcome::Applied, Outcome::Applied]
    );
    assert_eq!(
        outcomes(&report, OperationKind::RegisterSchema),
        vec![Outcome::Applied]
    );
}

/// Test that a failed batch is reported per item without stopping other kinds
#[tokio::test]
async fn test_batch_failure_recorded() {
    let h = Harness::new(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new(),
        store_with([orders()]),
    );
    h.cluster.fail(
        "create_topics",
        TransportError::Unavailable("not enough brokers".to_string()),
    );

    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    let creates = outcomes(&report, OperationKind::CreateTopic);
    assert_eq!(creates.len(), 2);
    assert!(creates
        .iter()
        .all(|o| matches!(o, Outcome::Failed { retryable: true, .. })));
    assert!(report
        .operations_of(OperationKind::CreateAccessEntry)
        .all(|op| op.outcome == Outcome::Applied));
    assert_eq!(report.summary().failed, 2);
    assert!(report.has_failures());
}

/// Test that calls exceeding the operation timeout fail as retryable timeouts
#[tokio::test(start_paused = true)]
async fn test_operation_timeout() {
    let config = engine_config().with_operation_timeout(Duration::from_secs(1));
    let h = Harness::with_config(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new(),
        store_with([orders()]),
        config,
    );
    h.cluster.set_delay(Duration::from_secs(5));

    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    let kinds: BTreeSet<String> = report
        .read_failures
        .iter()
        .map(|f| f.kind.to_string())
        .collect();
    assert_eq!(
        kinds,
        ["access_entries", "cluster", "topics"]
            .into_iter()
            .map(String::from)
            .collect()
    );
    assert!(report
        .read_failures
        .iter()
        .all(|f| f.retryable && f.error_kind == "timeout"));
    assert_eq!(report.cluster_id, None);

    // The registry is not slowed down, so schemas still converge
    assert_eq!(
        outcomes(&report, OperationKind::RegisterSchema),
        vec![Outcome::Applied]
    );
}

/// Test that a slow mutating batch times out as a whole
#[tokio::test(start_paused = true)]
async fn test_registry_timeout_on_apply() {
    let config = engine_config().with_operation_timeout(Duration::from_secs(2));
    let h = Harness::with_config(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new(),
        store_with([orders()]),
        config,
    );
    h.registry.set_delay(Duration::from_secs(3));

    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    assert_eq!(report.read_failures.len(), 1);
    assert_eq!(report.read_failures[0].kind, ResourceKind::Schemas);
    assert_eq!(report.operations_of(OperationKind::RegisterSchema).count(), 0);
    assert_eq!(report.operations_of(OperationKind::CreateTopic).count(), 2);
}

/// Test registration of changed content and rejection of incompatible content
#[tokio::test]
async fn test_schema_evolution() {
    let subject = "orders.public.created-value";
    let mut evolved = orders();
    evolved.visibilities[0].topics[0].value_schema =
        Some(streamform_core::Schema::avro(ORDER_CREATED_V2));

    let h = Harness::new(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new().with_schema(subject, SchemaFormat::Avro, ORDER_CREATED),
        store_with([evolved.clone()]),
    );
    h.registry.reject_new_versions(subject);

    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    let registered: Vec<_> = report.operations_of(OperationKind::RegisterSchema).collect();
    assert_eq!(registered.len(), 1);
    assert!(registered[0].action.contains("replacing version 1"));
    match &registered[0].outcome {
        Outcome::Failed { error, retryable } => {
            assert!(error.starts_with("Incompatible schema"));
            assert!(!retryable);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.registry.versions(subject).len(), 1);
    assert!(h
        .registry
        .mutations()
        .iter()
        .all(|m| m.method != "register_schema"));

    let h = Harness::new(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new().with_schema(subject, SchemaFormat::Avro, ORDER_CREATED),
        store_with([evolved]),
    );
    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    assert_eq!(
        outcomes(&report, OperationKind::RegisterSchema),
        vec![Outcome::Applied]
    );
    assert_eq!(h.registry.versions(subject).len(), 2);
    assert_eq!(
        h.registry.compatibility_of(subject),
        Some(CompatibilityMode::Backward)
    );
}

/// Test that a declared compatibility change converges without new content
#[tokio::test]
async fn test_compatibility_converges_on_unchanged_content() {
    let subject = "orders.public.created-value";
    let registry = || {
        MemoryRegistry::new()
            .with_schema(subject, SchemaFormat::Avro, ORDER_CREATED)
            .with_compatibility(subject, CompatibilityMode::None)
    };

    let h = Harness::new(MemoryCluster::new("cluster-1"), registry(), store_with([orders()]));
    let report = h
        .orchestrator
        .deploy(h.dir(), &DeployOptions::new().dry_run(true))
        .await
        .unwrap();
    assert_eq!(
        outcomes(&report, OperationKind::SetCompatibility),
        vec![Outcome::WouldApply]
    );
    assert_eq!(h.registry.compatibility_of(subject), Some(CompatibilityMode::None));

    let h = Harness::new(MemoryCluster::new("cluster-1"), registry(), store_with([orders()]));
    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    let changed: Vec<_> = report.operations_of(OperationKind::SetCompatibility).collect();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].target, subject);
    assert!(changed[0].action.contains("was NONE"));
    assert_eq!(changed[0].outcome, Outcome::Applied);
    assert_eq!(report.operations_of(OperationKind::RegisterSchema).count(), 0);
    assert_eq!(h.registry.versions(subject).len(), 1);
    assert_eq!(
        h.registry.compatibility_of(subject),
        Some(CompatibilityMode::Backward)
    );

    let again = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    assert_eq!(again.operations_of(OperationKind::SetCompatibility).count(), 0);
}

/// Test that unsupported config reads only disable config changes
#[tokio::test]
async fn test_unsupported_config_reads() {
    let h = Harness::new(
        MemoryCluster::new("cluster-1")
            .with_topic(ObservedTopic::new("orders.public.created", 6).with_replication_factor(3)),
        MemoryRegistry::new(),
        store_with([orders()]),
    );
    h.cluster.fail(
        "describe_configs",
        TransportError::Unsupported("describe_configs".to_string()),
    );

    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    assert_eq!(report.operations_of(OperationKind::AlterConfig).count(), 0);
    assert_eq!(
        report
            .operations_of(OperationKind::CreateTopic)
            .map(|op| op.target.as_str())
            .collect::<Vec<_>>(),
        vec!["orders.private.state"]
    );
    assert!(report.read_failures[0].is_unsupported());
    assert!(!report.has_failures(), "{}", report);
}

/// Test that orphaned topics report their data and consumers
#[tokio::test]
async fn test_orphan_usage_reported() {
    let mut offsets = BTreeMap::new();
    offsets.insert(TopicPartition::new("legacy.events", 0), 40);
    let cluster = legacy_cluster().with_consumer_group(ObservedConsumerGroup {
        id: "legacy-reader".to_string(),
        state: GroupState::Stable,
        offsets,
    });
    cluster.set_high_watermark("legacy.events", 0, 42);
    cluster.set_high_watermark("legacy.events", 1, 8);

    let h = Harness::new(cluster, MemoryRegistry::new(), store_with([orders(), billing()]));
    let report = h
        .orchestrator
        .deploy(h.dir(), &DeployOptions::new().dry_run(true))
        .await
        .unwrap();

    assert_eq!(report.orphan_usage.len(), 1);
    let usage = &report.orphan_usage[0];
    assert_eq!(usage.topic, "legacy.events");
    assert_eq!(usage.messages, 50);
    assert_eq!(usage.consumer_groups, vec!["legacy-reader".to_string()]);
}

/// Test that a store without the directory yields an empty run
#[tokio::test]
async fn test_empty_directory() {
    let h = Harness::new(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new(),
        MemoryTopologyStore::new(),
    );
    let report = h.orchestrator.deploy(h.dir(), &DeployOptions::new()).await.unwrap();
    assert!(report.operations.is_empty());
    assert_eq!(report.state, RunState::Done);
}

/// Test that a run with metrics enabled behaves like one without
#[tokio::test]
async fn test_deploy_with_metrics() {
    let Harness {
        cluster,
        orchestrator,
        ..
    } = Harness::new(
        MemoryCluster::new("cluster-1"),
        MemoryRegistry::new(),
        store_with([orders(), billing()]),
    );
    let orchestrator = orchestrator.with_metrics();

    let report = orchestrator
        .deploy(std::path::Path::new(DIR), &DeployOptions::new())
        .await
        .unwrap();
    assert!(!report.has_failures(), "{}", report);
    assert!(cluster.topic("orders.public.created").is_some());
}
