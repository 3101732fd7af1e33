//! Reconcilers
//!
//! Each reconciler is a pure function of its declared and observed inputs.
//! None of them mutate anything; they return plans that the orchestrator
//! gates and applies.

pub mod access;
pub mod schema;
pub mod topic;

pub use access::{derive_access_entries, domain_entries, plan_access_changes, AccessPlan};
pub use schema::{
    plan_schema_changes, CompatibilityChange, RegisteredSubjects, SchemaChange,
    SchemaChangeReason, SchemaPlan,
};
pub use topic::{
    diff_config, plan_topic_changes, AlterConfigOp, ConfigResource, ConfigResourceKind,
    PartitionExpansion, TopicPlan, TopicSpec,
};

use crate::acl::AccessEntry;
use crate::domain::domain_prefix;
use crate::schema::split_subject;
use serde::Serialize;

/// Which observed resources may be reported as orphans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanScope {
    /// No orphan planning (domain-filtered runs)
    Disabled,
    /// Full run over the declared domains
    Cluster {
        domains: Vec<String>,
        principals: Vec<String>,
        protected_prefixes: Vec<String>,
    },
}

impl OrphanScope {
    pub fn disabled() -> Self {
        OrphanScope::Disabled
    }

    pub fn cluster(
        domains: impl IntoIterator<Item = String>,
        principals: impl IntoIterator<Item = String>,
        protected_prefixes: impl IntoIterator<Item = String>,
    ) -> Self {
        OrphanScope::Cluster {
            domains: domains.into_iter().collect(),
            principals: principals.into_iter().collect(),
            protected_prefixes: protected_prefixes.into_iter().collect(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, OrphanScope::Disabled)
    }

    /// Any observed topic outside the protected prefixes
    pub fn covers_topic(&self, topic: &str) -> bool {
        match self {
            OrphanScope::Disabled => false,
            OrphanScope::Cluster {
                protected_prefixes, ..
            } => !protected_prefixes.iter().any(|p| topic.starts_with(p.as_str())),
        }
    }

    /// Entries held by a domain principal or naming a domain's resources
    pub fn covers_entry(&self, entry: &AccessEntry) -> bool {
        match self {
            OrphanScope::Disabled => false,
            OrphanScope::Cluster {
                domains,
                principals,
                ..
            } => {
                principals.contains(&entry.principal)
                    || domains
                        .iter()
                        .any(|d| entry.resource_name.starts_with(&domain_prefix(d)))
            }
        }
    }

    /// Subjects following `<topic>-key|value` whose topic is covered
    pub fn covers_subject(&self, subject: &str) -> bool {
        split_subject(subject).is_some_and(|(topic, _)| self.covers_topic(topic))
    }
}

/// A declared/observed disagreement the reconciler refuses to resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileConflict {
    pub resource: String,
    pub message: String,
}

impl std::fmt::Display for ReconcileConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.resource, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Operation, ResourceType};

    fn scope() -> OrphanScope {
        OrphanScope::cluster(
            vec!["orders".to_string()],
            vec!["User:svc-orders".to_string()],
            vec!["_".to_string()],
        )
    }

    #[test]
    fn test_disabled_scope_covers_nothing() {
        let disabled = OrphanScope::disabled();
        assert!(!disabled.covers_topic("orders.public.created"));
        assert!(!disabled.covers_subject("orders.public.created-value"));
        let entry =
            AccessEntry::prefixed("User:svc-orders", ResourceType::Topic, "orders.", Operation::Read);
        assert!(!disabled.covers_entry(&entry));
    }

    #[test]
    fn test_protected_prefixes() {
        let scope = scope();
        assert!(scope.covers_topic("legacy.events"));
        assert!(!scope.covers_topic("__consumer_offsets"));
        assert!(!scope.covers_subject("_schemas-value"));
        assert!(!scope.covers_subject("com.example.Record"));
    }

    #[test]
    fn test_entry_scope() {
        let scope = scope();
        let own = AccessEntry::prefixed("User:svc-orders", ResourceType::Group, "x.", Operation::Read);
        let on_prefix =
            AccessEntry::prefixed("User:someone", ResourceType::Topic, "orders.", Operation::Read);
        let foreign =
            AccessEntry::prefixed("User:someone", ResourceType::Topic, "billing.", Operation::Read);
        assert!(scope.covers_entry(&own));
        assert!(scope.covers_entry(&on_prefix));
        assert!(!scope.covers_entry(&foreign));
    }
}
