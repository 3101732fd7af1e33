//! Shared fixtures for orchestrator tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use streamform_core::memory::{MemoryCluster, MemoryRegistry, MemoryTopologyStore};
use streamform_core::{
    Consumer, Domain, EngineConfig, Orchestrator, Schema, Topic, TopologyUnit, ValidationConfig,
    Visibility, VisibilityType,
};

pub const DIR: &str = "topology";

pub const ORDER_CREATED: &str = r#"{"type":"record","name":"OrderCreated","fields":[{"name":"id","type":"string"}]}"#;
pub const ORDER_CREATED_V2: &str = r#"{"type":"record","name":"OrderCreated","fields":[{"name":"id","type":"string"},{"name":"total","type":["null","long"],"default":null}]}"#;
pub const INVOICE: &str = r#"{"type":"record","name":"Invoice","fields":[{"name":"number","type":"long"}]}"#;

pub fn orders() -> Domain {
    Domain::new("orders", "User:svc-orders")
        .with_maintainer("orders-team@example.com")
        .with_visibility(
            Visibility::new(VisibilityType::Public)
                .with_consumer(Consumer::new("User:svc-billing"))
                .with_topic(
                    Topic::new("created", 6)
                        .with_config("retention.ms", "7d")
                        .with_value_schema(Schema::avro(ORDER_CREATED)),
                ),
        )
        .with_visibility(
            Visibility::new(VisibilityType::Private)
                .with_topic(Topic::new("state", 1).with_config("cleanup.policy", "compact")),
        )
}

pub fn billing() -> Domain {
    Domain::new("billing", "User:svc-billing").with_visibility(
        Visibility::new(VisibilityType::Protected)
            .with_consumer(Consumer::new("User:svc-orders"))
            .with_topic(Topic::new("invoices", 3).with_value_schema(Schema::avro(INVOICE))),
    )
}

/// Billing is also consumed as an external principal so orders can be
/// deployed on its own
pub fn engine_config() -> EngineConfig {
    EngineConfig::default()
        .with_validation(ValidationConfig::default().with_external_principal("User:svc-billing"))
}

pub fn store_with(domains: impl IntoIterator<Item = Domain>) -> MemoryTopologyStore {
    domains
        .into_iter()
        .fold(MemoryTopologyStore::new(), |store, domain| {
            store.with_unit(DIR, TopologyUnit::for_domain(domain))
        })
}

pub struct Harness {
    pub cluster: Arc<MemoryCluster>,
    pub registry: Arc<MemoryRegistry>,
    pub store: Arc<MemoryTopologyStore>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(cluster: MemoryCluster, registry: MemoryRegistry, store: MemoryTopologyStore) -> Self {
        Self::with_config(cluster, registry, store, engine_config())
    }

    pub fn with_config(
        cluster: MemoryCluster,
        registry: MemoryRegistry,
        store: MemoryTopologyStore,
        config: EngineConfig,
    ) -> Self {
        let cluster = Arc::new(cluster);
        let registry = Arc::new(registry);
        let store = Arc::new(store);
        let orchestrator =
            Orchestrator::new(cluster.clone(), registry.clone(), store.clone(), config).unwrap();
        Self {
            cluster,
            registry,
            store,
            orchestrator,
        }
    }

    pub fn dir(&self) -> &Path {
        Path::new(DIR)
    }
}
