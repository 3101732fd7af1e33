//! Rebuild declared topology from observed state
//!
//! Topics named `<domain>.<visibility>.<name>` are grouped back into their
//! domain and visibility. The owning principal is the holder of the PREFIXED
//! TOPIC WRITE grant on the domain prefix; consumers are the other holders of
//! PREFIXED TOPIC READ on a visibility prefix. Values that observed state
//! cannot carry (maintainer, declared compatibility) are kept from the
//! existing unit when there is one.

use crate::acl::{AccessEntry, Operation, PatternType, Permission, ResourceType};
use crate::domain::{
    domain_prefix, Consumer, Domain, Topic, TopologyUnit, Visibility, VisibilityType,
    DEFAULT_REPLICATION_FACTOR, DOMAIN_NAME_PATTERN,
};
use crate::observed::ObservedTopic;
use crate::schema::{subject_name, CompatibilityMode, RegisteredSchema, Schema, SchemaRole};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Latest registered version of a subject and its subject-level compatibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredSchema {
    pub schema: RegisteredSchema,
    pub compatibility: Option<CompatibilityMode>,
}

/// Split `<domain>.<visibility>.<name>` into its parts
pub fn parse_topic_name(full_name: &str) -> Option<(&str, VisibilityType, &str)> {
    let mut parts = full_name.splitn(3, '.');
    let domain = parts.next()?;
    let visibility = parts.next()?;
    let name = parts.next()?;
    if !DOMAIN_NAME_PATTERN.is_match(domain) || name.is_empty() {
        return None;
    }
    let kind = VisibilityType::ALL
        .into_iter()
        .find(|k| k.segment() == visibility)?;
    Some((domain, kind, name))
}

fn is_owner_grant(entry: &AccessEntry) -> bool {
    entry.resource_type == ResourceType::Topic
        && entry.pattern_type == PatternType::Prefixed
        && entry.operation == Operation::Write
        && entry.permission == Permission::Allow
}

/// Domain names found in topic names, owner grants and existing units
pub fn discover_domains(
    topics: &[ObservedTopic],
    entries: &[AccessEntry],
    existing: &[TopologyUnit],
) -> BTreeSet<String> {
    let mut domains: BTreeSet<String> = topics
        .iter()
        .filter_map(|t| parse_topic_name(&t.name).map(|(d, _, _)| d.to_string()))
        .collect();

    domains.extend(
        entries
            .iter()
            .filter(|e| is_owner_grant(e))
            .filter_map(|e| e.resource_name.strip_suffix('.'))
            .filter(|d| DOMAIN_NAME_PATTERN.is_match(d))
            .map(str::to_string),
    );

    domains.extend(existing.iter().map(|u| u.domain.name.clone()));
    domains
}

fn owner_principal(domain: &str, entries: &[AccessEntry], existing: Option<&Domain>) -> String {
    let prefix = domain_prefix(domain);
    let owners: BTreeSet<&str> = entries
        .iter()
        .filter(|e| is_owner_grant(e) && e.resource_name == prefix)
        .map(|e| e.principal.as_str())
        .collect();
    let existing = existing.map(|d| d.principal.as_str());

    // Several owners: keep the declared one if it still holds the grant
    if let Some(principal) = existing.filter(|p| owners.contains(p)) {
        return principal.to_string();
    }
    match owners.into_iter().next().or(existing) {
        Some(owner) => owner.to_string(),
        None => {
            warn!(domain = %domain, "No owner grant found; using a placeholder principal");
            format!("User:{}", domain)
        }
    }
}

fn consumers_of(prefix: &str, owner: &str, entries: &[AccessEntry]) -> Vec<Consumer> {
    let readers: BTreeSet<&str> = entries
        .iter()
        .filter(|e| {
            e.resource_type == ResourceType::Topic
                && e.pattern_type == PatternType::Prefixed
                && e.operation == Operation::Read
                && e.permission == Permission::Allow
                && e.resource_name == prefix
                && e.principal != owner
        })
        .map(|e| e.principal.as_str())
        .collect();

    readers
        .into_iter()
        .map(|principal| {
            let consumer = Consumer::new(principal);
            let default_prefix = consumer.group_prefix();
            let groups: BTreeSet<&str> = entries
                .iter()
                .filter(|e| {
                    e.principal == principal
                        && e.resource_type == ResourceType::Group
                        && e.pattern_type == PatternType::Prefixed
                        && e.operation == Operation::Read
                })
                .map(|e| e.resource_name.as_str())
                .collect();
            if groups.is_empty() || groups.contains(default_prefix.as_str()) {
                consumer
            } else {
                let prefix = groups.into_iter().next().unwrap_or_default();
                consumer.with_group_prefix(prefix)
            }
        })
        .collect()
}

fn restore_schema(
    full_name: &str,
    role: SchemaRole,
    schemas: &BTreeMap<String, RestoredSchema>,
    existing: Option<&Schema>,
) -> Option<Schema> {
    let restored = schemas.get(&subject_name(full_name, role))?;
    let compatibility = restored
        .compatibility
        .or_else(|| existing.map(|s| s.compatibility))
        .unwrap_or_default();
    Some(
        Schema::new(restored.schema.format, restored.schema.content.clone())
            .with_compatibility(compatibility),
    )
}

/// Materialize one domain from observed state
pub fn build_unit(
    domain: &str,
    topics: &[ObservedTopic],
    entries: &[AccessEntry],
    schemas: &BTreeMap<String, RestoredSchema>,
    existing: Option<&TopologyUnit>,
) -> TopologyUnit {
    let existing_domain = existing.map(|u| &u.domain);
    let principal = owner_principal(domain, entries, existing_domain);

    let mut by_visibility: BTreeMap<VisibilityType, Vec<(&str, &ObservedTopic)>> = BTreeMap::new();
    for topic in topics {
        if let Some((d, kind, name)) = parse_topic_name(&topic.name) {
            if d == domain {
                by_visibility.entry(kind).or_default().push((name, topic));
            }
        }
    }

    let mut visibilities = Vec::new();
    for kind in VisibilityType::ALL {
        let mut visibility = Visibility::new(kind);
        let prefix = visibility.prefix(domain);
        if kind.grants_consumers() {
            visibility.consumers = consumers_of(&prefix, &principal, entries);
        }

        let existing_visibility = existing_domain.and_then(|d| d.visibility(kind));
        let mut restored: Vec<Topic> = by_visibility
            .remove(&kind)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, observed)| {
                let declared = existing_visibility
                    .and_then(|v| v.topics.iter().find(|t| t.name == name));
                let full_name = observed.name.as_str();
                Topic {
                    name: name.to_string(),
                    partitions: observed.partition_count(),
                    replication_factor: observed
                        .replication_factor
                        .or_else(|| declared.map(|t| t.replication_factor))
                        .unwrap_or(DEFAULT_REPLICATION_FACTOR),
                    config: observed.config.clone(),
                    key_schema: restore_schema(
                        full_name,
                        SchemaRole::Key,
                        schemas,
                        declared.and_then(|t| t.key_schema.as_ref()),
                    ),
                    value_schema: restore_schema(
                        full_name,
                        SchemaRole::Value,
                        schemas,
                        declared.and_then(|t| t.value_schema.as_ref()),
                    ),
                }
            })
            .collect();
        restored.sort_by(|a, b| a.name.cmp(&b.name));
        visibility.topics = restored;

        if !visibility.topics.is_empty() || !visibility.consumers.is_empty() {
            visibilities.push(visibility);
        }
    }

    TopologyUnit {
        source: existing
            .map(|u| u.source.clone())
            .unwrap_or_else(|| domain.to_string()),
        domain: Domain {
            name: domain.to_string(),
            maintainer: existing_domain
                .map(|d| d.maintainer.clone())
                .unwrap_or_default(),
            principal,
            visibilities,
        },
    }
}
