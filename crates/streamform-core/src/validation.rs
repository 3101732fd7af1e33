//! Validation engine
//!
//! Declared topology is checked by a flat list of [`Rule`]s. Each rule is a
//! plain function over the whole topology; the [`Validator`] runs every rule
//! and aggregates all violations instead of stopping at the first one.
//!
//! | Rule | Checks |
//! |------|--------|
//! | `UniqueFullName` | no two topics share a full name |
//! | `PartitionMonotonic` | declared partitions >= observed partitions |
//! | `ValidTopicConfig` | config keys allow-listed, values well formed |
//! | `SchemaRequired` | value schema present where the visibility demands it |
//! | `ValidSchemaSubject` | subject is `<topic full name>-<key/value>` |
//! | `ValidSchemaContent` | content parses under its format |
//! | `PrincipalExists` | consumer principals are known |
//! | `UnitName` | unit source names match the domain name |
//! | `UniqueDomain` | a domain is declared once |
//! | `TopicShape` | partitions, replication factor and name are legal |
//! | `PrincipalFormat` | principals have the `Type:name` form |

use crate::domain::{is_valid_principal, DeclaredTopology, VisibilityType, DOMAIN_NAME_PATTERN};
use crate::observed::ObservedPartitions;
use crate::schema::parse_content;
use crate::topic_config::validate_entry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// Longest topic name the cluster accepts
pub const MAX_TOPIC_NAME_LEN: usize = 249;

static TOPIC_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid topic name pattern"));

/// Identifier of a validation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuleId {
    UniqueFullName,
    PartitionMonotonic,
    ValidTopicConfig,
    SchemaRequired,
    ValidSchemaSubject,
    ValidSchemaContent,
    PrincipalExists,
    UnitName,
    UniqueDomain,
    TopicShape,
    PrincipalFormat,
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuleId::UniqueFullName => "UniqueFullName",
            RuleId::PartitionMonotonic => "PartitionMonotonic",
            RuleId::ValidTopicConfig => "ValidTopicConfig",
            RuleId::SchemaRequired => "SchemaRequired",
            RuleId::ValidSchemaSubject => "ValidSchemaSubject",
            RuleId::ValidSchemaContent => "ValidSchemaContent",
            RuleId::PrincipalExists => "PrincipalExists",
            RuleId::UnitName => "UnitName",
            RuleId::UniqueDomain => "UniqueDomain",
            RuleId::TopicShape => "TopicShape",
            RuleId::PrincipalFormat => "PrincipalFormat",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RuleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UniqueFullName" => Ok(RuleId::UniqueFullName),
            "PartitionMonotonic" => Ok(RuleId::PartitionMonotonic),
            "ValidTopicConfig" => Ok(RuleId::ValidTopicConfig),
            "SchemaRequired" => Ok(RuleId::SchemaRequired),
            "ValidSchemaSubject" => Ok(RuleId::ValidSchemaSubject),
            "ValidSchemaContent" => Ok(RuleId::ValidSchemaContent),
            "PrincipalExists" => Ok(RuleId::PrincipalExists),
            "UnitName" => Ok(RuleId::UnitName),
            "UniqueDomain" => Ok(RuleId::UniqueDomain),
            "TopicShape" => Ok(RuleId::TopicShape),
            "PrincipalFormat" => Ok(RuleId::PrincipalFormat),
            _ => Err(format!("Unknown validation rule: {}", s)),
        }
    }
}

crate::string_enum_serde!(RuleId);

/// A single rule violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: RuleId,
    /// Offending entity (topic full name, subject, unit, principal)
    pub entity: String,
    pub message: String,
    /// Domains the offending entity belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
}

impl Violation {
    pub fn new(rule: RuleId, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule,
            entity: entity.into(),
            message: message.into(),
            domains: Vec::new(),
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        if !self.domains.contains(&domain) {
            self.domains.push(domain);
        }
        self
    }

    /// Whether the violation involves any of the given domains
    pub fn involves(&self, domains: &[String]) -> bool {
        self.domains.iter().any(|d| domains.contains(d))
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.rule, self.entity, self.message)
    }
}

/// Settings for the policy rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationConfig {
    /// Visibilities whose topics must declare a value schema
    pub schema_required: BTreeSet<VisibilityType>,
    /// Principals allowed as consumers without owning a domain
    pub external_principals: BTreeSet<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            schema_required: [VisibilityType::Public, VisibilityType::Protected]
                .into_iter()
                .collect(),
            external_principals: BTreeSet::new(),
        }
    }
}

impl ValidationConfig {
    pub fn with_schema_required(mut self, kinds: impl IntoIterator<Item = VisibilityType>) -> Self {
        self.schema_required = kinds.into_iter().collect();
        self
    }

    pub fn with_external_principal(mut self, principal: impl Into<String>) -> Self {
        self.external_principals.insert(principal.into());
        self
    }
}

/// Input handed to every rule
pub struct RuleContext<'a> {
    pub topology: &'a DeclaredTopology,
    /// Observed partition counts; `None` skips observed-dependent rules
    pub observed: Option<&'a ObservedPartitions>,
    pub config: &'a ValidationConfig,
}

/// A named predicate over the declared topology
#[derive(Clone, Copy)]
pub struct Rule {
    pub id: RuleId,
    pub check: fn(&RuleContext<'_>) -> Vec<Violation>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("id", &self.id).finish()
    }
}

/// Every rule, in reporting order
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule { id: RuleId::UnitName, check: check_unit_name },
        Rule { id: RuleId::UniqueDomain, check: check_unique_domain },
        Rule { id: RuleId::PrincipalFormat, check: check_principal_format },
        Rule { id: RuleId::PrincipalExists, check: check_principal_exists },
        Rule { id: RuleId::TopicShape, check: check_topic_shape },
        Rule { id: RuleId::UniqueFullName, check: check_unique_full_name },
        Rule { id: RuleId::ValidTopicConfig, check: check_topic_config },
        Rule { id: RuleId::SchemaRequired, check: check_schema_required },
        Rule { id: RuleId::ValidSchemaSubject, check: check_schema_subject },
        Rule { id: RuleId::ValidSchemaContent, check: check_schema_content },
        Rule { id: RuleId::PartitionMonotonic, check: check_partition_monotonic },
    ]
}

/// Outcome of a validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// Keep only violations involving the given domains
    pub fn for_domains(self, domains: &[String]) -> Self {
        Self {
            violations: self
                .violations
                .into_iter()
                .filter(|v| v.involves(domains))
                .collect(),
        }
    }

    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }
}

/// Runs the rule set
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
    rules: Vec<Rule>,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            rules: default_rules(),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Run every rule against the full declared topology
    pub fn validate(
        &self,
        topology: &DeclaredTopology,
        observed: Option<&ObservedPartitions>,
    ) -> ValidationReport {
        let ctx = RuleContext {
            topology,
            observed,
            config: &self.config,
        };
        let violations = self
            .rules
            .iter()
            .flat_map(|rule| (rule.check)(&ctx))
            .collect();
        ValidationReport { violations }
    }

    /// Run a single rule
    pub fn validate_rule(
        &self,
        id: RuleId,
        topology: &DeclaredTopology,
        observed: Option<&ObservedPartitions>,
    ) -> ValidationReport {
        let ctx = RuleContext {
            topology,
            observed,
            config: &self.config,
        };
        let violations = self
            .rules
            .iter()
            .filter(|rule| rule.id == id)
            .flat_map(|rule| (rule.check)(&ctx))
            .collect();
        ValidationReport { violations }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

fn check_unit_name(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for unit in &ctx.topology.units {
        let entity = format!("unit {}", unit.source);
        if !DOMAIN_NAME_PATTERN.is_match(&unit.source) {
            violations.push(
                Violation::new(
                    RuleId::UnitName,
                    &entity,
                    format!(
                        "source name '{}' does not match {}",
                        unit.source,
                        DOMAIN_NAME_PATTERN.as_str()
                    ),
                )
                .in_domain(&unit.domain.name),
            );
        } else if unit.source != unit.domain.name {
            violations.push(
                Violation::new(
                    RuleId::UnitName,
                    &entity,
                    format!("declares domain '{}', expected '{}'", unit.domain.name, unit.source),
                )
                .in_domain(&unit.domain.name),
            );
        }
    }
    violations
}

fn check_unique_domain(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut sources: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for unit in &ctx.topology.units {
        sources
            .entry(unit.domain.name.as_str())
            .or_default()
            .push(unit.source.as_str());
    }
    sources
        .into_iter()
        .filter(|(_, units)| units.len() > 1)
        .map(|(domain, units)| {
            Violation::new(
                RuleId::UniqueDomain,
                format!("domain {}", domain),
                format!("declared by units {}", units.join(", ")),
            )
            .in_domain(domain)
        })
        .collect()
}

fn check_principal_format(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for domain in ctx.topology.domains() {
        if !is_valid_principal(&domain.principal) {
            violations.push(
                Violation::new(
                    RuleId::PrincipalFormat,
                    format!("domain {}", domain.name),
                    format!("principal '{}' is not of the form Type:name", domain.principal),
                )
                .in_domain(&domain.name),
            );
        }
        for visibility in &domain.visibilities {
            for consumer in &visibility.consumers {
                if !is_valid_principal(&consumer.principal) {
                    violations.push(
                        Violation::new(
                            RuleId::PrincipalFormat,
                            visibility.prefix(&domain.name),
                            format!(
                                "consumer principal '{}' is not of the form Type:name",
                                consumer.principal
                            ),
                        )
                        .in_domain(&domain.name),
                    );
                }
            }
        }
    }
    violations
}

fn check_principal_exists(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let known: BTreeSet<&str> = ctx
        .topology
        .principals()
        .chain(ctx.config.external_principals.iter().map(String::as_str))
        .collect();

    let mut violations = Vec::new();
    for domain in ctx.topology.domains() {
        for visibility in &domain.visibilities {
            for consumer in visibility.effective_consumers() {
                if !known.contains(consumer.principal.as_str()) {
                    violations.push(
                        Violation::new(
                            RuleId::PrincipalExists,
                            visibility.prefix(&domain.name),
                            format!(
                                "consumer '{}' is neither a domain principal nor an external principal",
                                consumer.principal
                            ),
                        )
                        .in_domain(&domain.name),
                    );
                }
            }
        }
    }
    violations
}

fn check_topic_shape(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for t in ctx.topology.topics() {
        let full_name = t.full_name();
        let domain = &t.domain().name;
        let mut push = |message: String| {
            violations.push(
                Violation::new(RuleId::TopicShape, &full_name, message).in_domain(domain),
            )
        };
        if t.topic.partitions < 1 {
            push(format!("partitions must be >= 1, got {}", t.topic.partitions));
        }
        if t.topic.replication_factor < 1 {
            push(format!(
                "replication factor must be >= 1, got {}",
                t.topic.replication_factor
            ));
        }
        if !TOPIC_NAME_PATTERN.is_match(&t.topic.name) {
            push(format!(
                "topic name '{}' may only contain [A-Za-z0-9._-]",
                t.topic.name
            ));
        }
        if full_name.len() > MAX_TOPIC_NAME_LEN {
            push(format!(
                "full name is {} characters, maximum is {}",
                full_name.len(),
                MAX_TOPIC_NAME_LEN
            ));
        }
    }
    violations
}

fn check_unique_full_name(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut by_name: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for t in ctx.topology.topics() {
        by_name.entry(t.full_name()).or_default().push(t);
    }

    by_name
        .into_iter()
        .filter(|(_, topics)| topics.len() > 1)
        .map(|(full_name, topics)| {
            let declared: Vec<String> = topics
                .iter()
                .map(|t| {
                    format!(
                        "{} ({} topic '{}' in unit {})",
                        full_name, t.visibility.kind, t.topic.name, t.unit.source
                    )
                })
                .collect();
            let mut violation = Violation::new(
                RuleId::UniqueFullName,
                &full_name,
                format!(
                    "declared {} times: {}",
                    topics.len(),
                    declared.join("; ")
                ),
            );
            for t in &topics {
                violation = violation.in_domain(&t.domain().name);
            }
            violation
        })
        .collect()
}

fn check_topic_config(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for t in ctx.topology.topics() {
        for (key, value) in &t.topic.config {
            if let Err(message) = validate_entry(key, value) {
                violations.push(
                    Violation::new(RuleId::ValidTopicConfig, t.full_name(), message)
                        .in_domain(&t.domain().name),
                );
            }
        }
    }
    violations
}

fn check_schema_required(ctx: &RuleContext<'_>) -> Vec<Violation> {
    ctx.topology
        .topics()
        .into_iter()
        .filter(|t| ctx.config.schema_required.contains(&t.visibility.kind))
        .filter(|t| t.topic.value_schema.is_none())
        .map(|t| {
            Violation::new(
                RuleId::SchemaRequired,
                t.full_name(),
                format!("{} topics must declare a value schema", t.visibility.kind),
            )
            .in_domain(&t.domain().name)
        })
        .collect()
}

fn check_schema_subject(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for t in ctx.topology.topics() {
        for schema in t.schemas() {
            let expected = schema.expected_subject();
            if schema.subject != expected {
                violations.push(
                    Violation::new(
                        RuleId::ValidSchemaSubject,
                        &schema.subject,
                        format!(
                            "{} schema of topic '{}' must use subject '{}'",
                            schema.role, schema.topic, expected
                        ),
                    )
                    .in_domain(&t.domain().name),
                );
            }
        }
    }
    violations
}

fn check_schema_content(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for t in ctx.topology.topics() {
        for schema in t.schemas() {
            if let Err(message) = parse_content(schema.format, &schema.content) {
                violations.push(
                    Violation::new(RuleId::ValidSchemaContent, &schema.subject, message)
                        .in_domain(&t.domain().name),
                );
            }
        }
    }
    violations
}

fn check_partition_monotonic(ctx: &RuleContext<'_>) -> Vec<Violation> {
    let Some(observed) = ctx.observed else {
        return Vec::new();
    };
    ctx.topology
        .topics()
        .into_iter()
        .filter_map(|t| {
            let full_name = t.full_name();
            let current = *observed.get(&full_name)?;
            (t.topic.partitions < current).then(|| {
                Violation::new(
                    RuleId::PartitionMonotonic,
                    &full_name,
                    format!(
                        "declared {} partitions but the cluster has {}; partitions cannot be decreased",
                        t.topic.partitions, current
                    ),
                )
                .in_domain(&t.domain().name)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Consumer, Domain, Topic, TopologyUnit, Visibility};
    use crate::schema::{Schema, SchemaRole};

    const AVRO: &str = r#"{"type":"record","name":"E","fields":[{"name":"id","type":"long"}]}"#;

    fn unit(domain: Domain) -> TopologyUnit {
        TopologyUnit::for_domain(domain)
    }

    fn public_topic(name: &str) -> Topic {
        Topic::new(name, 3).with_value_schema(Schema::avro(AVRO))
    }

    fn rules_hit(report: &ValidationReport) -> Vec<RuleId> {
        report.violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn test_valid_topology_passes() {
        let orders = Domain::new("orders", "User:svc-orders").with_visibility(
            Visibility::new(VisibilityType::Public)
                .with_consumer(Consumer::new("User:svc-billing"))
                .with_topic(public_topic("created").with_config("retention.ms", "7d")),
        );
        let billing = Domain::new("billing", "User:svc-billing").with_visibility(
            Visibility::new(VisibilityType::Private).with_topic(Topic::new("ledger", 1)),
        );
        let topology = DeclaredTopology::new(vec![unit(orders), unit(billing)]);

        let report = Validator::default().validate(&topology, None);
        assert!(report.is_ok(), "{:?}", report.violations);
    }

    #[test]
    fn test_duplicate_full_name_single_violation_names_both() {
        let orders = Domain::new("orders", "User:svc-orders").with_visibility(
            Visibility::new(VisibilityType::Private)
                .with_topic(Topic::new("events", 3))
                .with_topic(Topic::new("events", 6)),
        );
        let topology = DeclaredTopology::new(vec![unit(orders)]);

        let report = Validator::default().validate_rule(RuleId::UniqueFullName, &topology, None);
        assert_eq!(report.violations.len(), 1);
        let violation = &report.violations[0];
        assert_eq!(violation.entity, "orders.private.events");
        assert!(violation.message.contains("declared 2 times"));
        assert_eq!(violation.message.matches("orders.private.events").count(), 2);
    }

    #[test]
    fn test_partition_monotonic() {
        let orders = Domain::new("orders", "User:svc-orders").with_visibility(
            Visibility::new(VisibilityType::Private).with_topic(Topic::new("events", 3)),
        );
        let topology = DeclaredTopology::new(vec![unit(orders)]);
        let validator = Validator::default();

        assert!(validator
            .validate_rule(RuleId::PartitionMonotonic, &topology, None)
            .is_ok());

        let mut observed = ObservedPartitions::new();
        observed.insert("orders.private.events".to_string(), 2);
        assert!(validator
            .validate_rule(RuleId::PartitionMonotonic, &topology, Some(&observed))
            .is_ok());

        observed.insert("orders.private.events".to_string(), 6);
        let report = validator.validate_rule(RuleId::PartitionMonotonic, &topology, Some(&observed));
        assert_eq!(rules_hit(&report), vec![RuleId::PartitionMonotonic]);
    }

    #[test]
    fn test_schema_required_by_visibility() {
        let public = Domain::new("a", "User:a").with_visibility(
            Visibility::new(VisibilityType::Public).with_topic(Topic::new("t", 1)),
        );
        let report = Validator::default().validate(&DeclaredTopology::new(vec![unit(public)]), None);
        assert_eq!(rules_hit(&report), vec![RuleId::SchemaRequired]);

        let private = Domain::new("a", "User:a").with_visibility(
            Visibility::new(VisibilityType::Private).with_topic(Topic::new("t", 1)),
        );
        let report = Validator::default().validate(&DeclaredTopology::new(vec![unit(private)]), None);
        assert!(report.is_ok());

        let relaxed = Validator::new(ValidationConfig::default().with_schema_required([]));
        let public = Domain::new("a", "User:a").with_visibility(
            Visibility::new(VisibilityType::Public).with_topic(Topic::new("t", 1)),
        );
        assert!(relaxed
            .validate(&DeclaredTopology::new(vec![unit(public)]), None)
            .is_ok());
    }

    #[test]
    fn test_schema_subject_must_match_topic() {
        let on_other = Schema::avro(AVRO)
            .with_subject("x.y-key")
            .bind("x.z", SchemaRole::Key);
        assert_ne!(on_other.subject, on_other.expected_subject());
        let on_owner = Schema::avro(AVRO)
            .with_subject("x.y-key")
            .bind("x.y", SchemaRole::Key);
        assert_eq!(on_owner.subject, on_owner.expected_subject());

        let topic = Topic::new("created", 1)
            .with_key_schema(Schema::avro(AVRO).with_subject("a.private.other-key"));
        let domain = Domain::new("a", "User:a")
            .with_visibility(Visibility::new(VisibilityType::Private).with_topic(topic));
        let report = Validator::default().validate(&DeclaredTopology::new(vec![unit(domain)]), None);
        assert_eq!(rules_hit(&report), vec![RuleId::ValidSchemaSubject]);
        assert_eq!(report.violations[0].entity, "a.private.other-key");

        let topic = Topic::new("created", 1)
            .with_key_schema(Schema::avro(AVRO).with_subject("a.private.created-key"));
        let domain = Domain::new("a", "User:a")
            .with_visibility(Visibility::new(VisibilityType::Private).with_topic(topic));
        assert!(Validator::default()
            .validate(&DeclaredTopology::new(vec![unit(domain)]), None)
            .is_ok());
    }

    #[test]
    fn test_schema_content_must_parse() {
        let topic = Topic::new("t", 1).with_value_schema(Schema::avro("{\"type\": \"nope\"}"));
        let domain = Domain::new("a", "User:a")
            .with_visibility(Visibility::new(VisibilityType::Public).with_topic(topic));
        let report = Validator::default().validate(&DeclaredTopology::new(vec![unit(domain)]), None);
        assert_eq!(rules_hit(&report), vec![RuleId::ValidSchemaContent]);
    }

    #[test]
    fn test_topic_config_violations() {
        let topic = Topic::new("t", 1)
            .with_config("cleanup.policy", "archive")
            .with_config("no.such.key", "1")
            .with_config("retention.ms", "3d");
        let domain = Domain::new("a", "User:a")
            .with_visibility(Visibility::new(VisibilityType::Private).with_topic(topic));
        let report = Validator::default().validate(&DeclaredTopology::new(vec![unit(domain)]), None);
        assert_eq!(
            rules_hit(&report),
            vec![RuleId::ValidTopicConfig, RuleId::ValidTopicConfig]
        );
    }

    #[test]
    fn test_principal_exists() {
        let domain = Domain::new("a", "User:a").with_visibility(
            Visibility::new(VisibilityType::Protected)
                .with_consumer(Consumer::new("User:ghost"))
                .with_topic(public_topic("t")),
        );
        let topology = DeclaredTopology::new(vec![unit(domain)]);
        let report = Validator::default().validate(&topology, None);
        assert_eq!(rules_hit(&report), vec![RuleId::PrincipalExists]);

        let with_external =
            Validator::new(ValidationConfig::default().with_external_principal("User:ghost"));
        assert!(with_external.validate(&topology, None).is_ok());
    }

    #[test]
    fn test_private_consumers_ignored_by_principal_exists() {
        let domain = Domain::new("a", "User:a").with_visibility(
            Visibility::new(VisibilityType::Private)
                .with_consumer(Consumer::new("User:ghost"))
                .with_topic(Topic::new("t", 1)),
        );
        let report = Validator::default().validate(&DeclaredTopology::new(vec![unit(domain)]), None);
        assert!(report.is_ok());
    }

    #[test]
    fn test_unit_name_and_unique_domain() {
        let bad_source = TopologyUnit::new("Orders", Domain::new("orders", "User:o"));
        let mismatched = TopologyUnit::new("billing", Domain::new("orders", "User:o"));
        let topology = DeclaredTopology::new(vec![bad_source, mismatched]);

        let report = Validator::default().validate(&topology, None);
        assert_eq!(
            rules_hit(&report),
            vec![RuleId::UnitName, RuleId::UnitName, RuleId::UniqueDomain]
        );
    }

    #[test]
    fn test_topic_shape_and_principal_format() {
        let domain = Domain::new("a", "svc-a").with_visibility(
            Visibility::new(VisibilityType::Private)
                .with_topic(Topic::new("bad name", 0).with_replication_factor(0)),
        );
        let report = Validator::default().validate(&DeclaredTopology::new(vec![unit(domain)]), None);
        let hits = rules_hit(&report);
        assert_eq!(hits.iter().filter(|r| **r == RuleId::TopicShape).count(), 3);
        assert!(hits.contains(&RuleId::PrincipalFormat));
    }

    #[test]
    fn test_report_for_domains() {
        let a = Domain::new("a", "User:a").with_visibility(
            Visibility::new(VisibilityType::Public).with_topic(Topic::new("t", 1)),
        );
        let b = Domain::new("b", "User:b").with_visibility(
            Visibility::new(VisibilityType::Public).with_topic(Topic::new("t", 1)),
        );
        let report = Validator::default().validate(&DeclaredTopology::new(vec![unit(a), unit(b)]), None);
        assert_eq!(report.violations.len(), 2);

        let scoped = report.for_domains(&["b".to_string()]);
        assert_eq!(scoped.violations.len(), 1);
        assert_eq!(scoped.violations[0].entity, "b.public.t");
    }

    #[test]
    fn test_rule_id_roundtrips_through_display() {
        for rule in default_rules() {
            assert_eq!(rule.id.to_string().parse::<RuleId>().unwrap(), rule.id);
        }
    }
}
