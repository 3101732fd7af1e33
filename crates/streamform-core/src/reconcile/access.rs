//! Access control reconciler
//!
//! For a domain with principal `P` and prefix `X` the derived grants are:
//!
//! | Resource | Pattern | Name | Operations |
//! |----------|---------|------|------------|
//! | GROUP | PREFIXED | `X` | READ |
//! | TOPIC | PREFIXED | `X` | DESCRIBE, READ, WRITE |
//! | TRANSACTIONAL_ID | PREFIXED | `X` | WRITE |
//! | CLUSTER | LITERAL | `kafka-cluster` | IDEMPOTENT_WRITE |
//!
//! Each consumer `C` of a PUBLIC or PROTECTED visibility additionally gets
//! PREFIXED READ on its own group prefix and PREFIXED DESCRIBE and READ on
//! the visibility's topic prefix.

use super::OrphanScope;
use crate::acl::{AccessEntry, AccessFilter, PatternType, ResourceType, Operation};
use crate::domain::Domain;
use std::collections::BTreeSet;

/// Literal resource name of the cluster
pub const CLUSTER_RESOURCE_NAME: &str = "kafka-cluster";

/// Planned access-control changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPlan {
    pub create: Vec<AccessEntry>,
    /// Exact-match filters for observed entries nothing derives
    pub orphaned: Vec<AccessFilter>,
}

impl AccessPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.orphaned.is_empty()
    }
}

/// Entries implied by one domain's ownership and visibilities
pub fn domain_entries(domain: &Domain) -> BTreeSet<AccessEntry> {
    let owner = domain.principal.as_str();
    let prefix = domain.prefix();

    let mut entries = BTreeSet::new();
    entries.insert(AccessEntry::prefixed(
        owner,
        ResourceType::Group,
        &prefix,
        Operation::Read,
    ));
    for operation in [Operation::Describe, Operation::Read, Operation::Write] {
        entries.insert(AccessEntry::prefixed(
            owner,
            ResourceType::Topic,
            &prefix,
            operation,
        ));
    }
    entries.insert(AccessEntry::prefixed(
        owner,
        ResourceType::TransactionalId,
        &prefix,
        Operation::Write,
    ));
    entries.insert(AccessEntry::allow(
        owner,
        ResourceType::Cluster,
        CLUSTER_RESOURCE_NAME,
        PatternType::Literal,
        Operation::IdempotentWrite,
    ));

    for visibility in &domain.visibilities {
        let topic_prefix = visibility.prefix(&domain.name);
        for consumer in visibility.effective_consumers() {
            let principal = consumer.principal.as_str();
            entries.insert(AccessEntry::prefixed(
                principal,
                ResourceType::Group,
                consumer.group_prefix(),
                Operation::Read,
            ));
            for operation in [Operation::Describe, Operation::Read] {
                entries.insert(AccessEntry::prefixed(
                    principal,
                    ResourceType::Topic,
                    &topic_prefix,
                    operation,
                ));
            }
        }
    }

    entries
}

/// Union of the entries of every domain
pub fn derive_access_entries<'a>(
    domains: impl IntoIterator<Item = &'a Domain>,
) -> BTreeSet<AccessEntry> {
    domains.into_iter().flat_map(domain_entries).collect()
}

/// Diff derived entries against the cluster's entries
pub fn plan_access_changes(
    derived: &BTreeSet<AccessEntry>,
    observed: &[AccessEntry],
    scope: &OrphanScope,
) -> AccessPlan {
    let observed: BTreeSet<&AccessEntry> = observed.iter().collect();

    let create = derived
        .iter()
        .filter(|entry| !observed.contains(entry))
        .cloned()
        .collect();

    let orphaned = observed
        .iter()
        .filter(|entry| !derived.contains(**entry) && scope.covers_entry(entry))
        .map(|entry| AccessFilter::exact(entry))
        .collect();

    AccessPlan { create, orphaned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Consumer, Visibility, VisibilityType};

    fn orders() -> Domain {
        Domain::new("orders", "User:svc-orders")
            .with_visibility(
                Visibility::new(VisibilityType::Public)
                    .with_consumer(Consumer::new("User:svc-billing")),
            )
            .with_visibility(
                Visibility::new(VisibilityType::Private)
                    .with_consumer(Consumer::new("User:ignored")),
            )
    }

    fn billing() -> Domain {
        Domain::new("billing", "User:svc-billing").with_visibility(
            Visibility::new(VisibilityType::Protected)
                .with_consumer(Consumer::new("User:svc-orders").with_group_prefix("orders.")),
        )
    }

    #[test]
    fn test_owner_grants() {
        let entries = domain_entries(&Domain::new("orders", "User:svc-orders"));
        assert_eq!(entries.len(), 6);
        assert!(entries.contains(&AccessEntry::prefixed(
            "User:svc-orders",
            ResourceType::TransactionalId,
            "orders.",
            Operation::Write
        )));
        assert!(entries.contains(&AccessEntry::allow(
            "User:svc-orders",
            ResourceType::Cluster,
            CLUSTER_RESOURCE_NAME,
            PatternType::Literal,
            Operation::IdempotentWrite
        )));
    }

    #[test]
    fn test_consumer_grants_skip_private() {
        let entries = domain_entries(&orders());
        assert_eq!(entries.len(), 9);
        assert!(entries.contains(&AccessEntry::prefixed(
            "User:svc-billing",
            ResourceType::Topic,
            "orders.public.",
            Operation::Read
        )));
        assert!(entries.contains(&AccessEntry::prefixed(
            "User:svc-billing",
            ResourceType::Group,
            "svc-billing.",
            Operation::Read
        )));
        assert!(!entries.iter().any(|e| e.principal == "User:ignored"));
    }

    #[test]
    fn test_owner_and_consumer_overlap_deduplicates() {
        // the owner consuming its own group prefix must not add a duplicate
        let domain = Domain::new("orders", "User:svc-orders").with_visibility(
            Visibility::new(VisibilityType::Public)
                .with_consumer(Consumer::new("User:svc-orders").with_group_prefix("orders.")),
        );
        let entries = domain_entries(&domain);
        // 6 owner entries plus DESCRIBE and READ on the public prefix
        assert_eq!(entries.len(), 8);
    }

    #[test]
    fn test_derivation_idempotent() {
        let domains = vec![orders(), billing()];
        let first = derive_access_entries(&domains);
        let second = derive_access_entries(&domains);
        assert_eq!(first, second);
    }

    #[test]
    fn test_derivation_distributes_over_disjoint_domains() {
        let both = derive_access_entries(&[orders(), billing()]);
        let mut union = derive_access_entries(&[orders()]);
        union.extend(derive_access_entries(&[billing()]));
        assert_eq!(both, union);
    }

    #[test]
    fn test_plan_creates_missing_and_orphans_in_scope() {
        let derived = derive_access_entries(&[orders()]);
        let mut observed: Vec<AccessEntry> = derived.iter().skip(1).cloned().collect();
        let stale =
            AccessEntry::prefixed("User:svc-orders", ResourceType::Topic, "legacy.", Operation::Read);
        let foreign =
            AccessEntry::prefixed("User:other", ResourceType::Topic, "other.", Operation::Read);
        observed.push(stale.clone());
        observed.push(foreign);

        let scope = OrphanScope::cluster(
            vec!["orders".to_string()],
            vec!["User:svc-orders".to_string()],
            Vec::new(),
        );
        let plan = plan_access_changes(&derived, &observed, &scope);

        assert_eq!(plan.create, vec![derived.iter().next().cloned().unwrap()]);
        assert_eq!(plan.orphaned, vec![AccessFilter::exact(&stale)]);
    }

    #[test]
    fn test_plan_disabled_scope_has_no_orphans() {
        let derived = derive_access_entries(&[orders()]);
        let observed = vec![AccessEntry::prefixed(
            "User:svc-orders",
            ResourceType::Topic,
            "legacy.",
            Operation::Read,
        )];
        let plan = plan_access_changes(&derived, &observed, &OrphanScope::disabled());
        assert!(plan.orphaned.is_empty());
        assert_eq!(plan.create.len(), derived.len());
    }
}
