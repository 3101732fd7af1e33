//! Declared topology model
//!
//! A [`DeclaredTopology`] is the list of [`TopologyUnit`]s read from the store;
//! each unit declares exactly one [`Domain`]. Domains own their
//! [`Visibility`] groups and topics by composition. Derived names (prefixes,
//! full topic names, schema subjects) are computed here and nowhere else.

use crate::schema::{BoundSchema, Schema, SchemaRole};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Default replication factor for declared topics
pub const DEFAULT_REPLICATION_FACTOR: i16 = 3;

/// Pattern for domain names and topology unit source names
pub static DOMAIN_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9_-]*[a-z0-9])?$").expect("valid domain name pattern")
});

/// Access scope of a group of topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VisibilityType {
    /// Readable by declared consumers
    Public,
    /// Readable by declared consumers, not advertised
    Protected,
    /// Owner only
    Private,
}

impl VisibilityType {
    /// All visibility types
    pub const ALL: [VisibilityType; 3] = [
        VisibilityType::Public,
        VisibilityType::Protected,
        VisibilityType::Private,
    ];

    /// Lowercase segment used in topic prefixes
    pub fn segment(&self) -> &'static str {
        match self {
            VisibilityType::Public => "public",
            VisibilityType::Protected => "protected",
            VisibilityType::Private => "private",
        }
    }

    /// Whether declared consumers are granted read access
    pub fn grants_consumers(&self) -> bool {
        matches!(self, VisibilityType::Public | VisibilityType::Protected)
    }
}

impl std::fmt::Display for VisibilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VisibilityType::Public => write!(f, "PUBLIC"),
            VisibilityType::Protected => write!(f, "PROTECTED"),
            VisibilityType::Private => write!(f, "PRIVATE"),
        }
    }
}

impl std::str::FromStr for VisibilityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PUBLIC" => Ok(VisibilityType::Public),
            "PROTECTED" => Ok(VisibilityType::Protected),
            "PRIVATE" => Ok(VisibilityType::Private),
            _ => Err(format!("Invalid visibility type: {}", s)),
        }
    }
}

crate::string_enum_serde!(VisibilityType);

/// Strip the `Type:` part of a principal (`User:analytics` -> `analytics`)
pub fn principal_name(principal: &str) -> &str {
    principal
        .split_once(':')
        .map(|(_, name)| name)
        .unwrap_or(principal)
}

/// Whether a principal has the `Type:name` form
pub fn is_valid_principal(principal: &str) -> bool {
    match principal.split_once(':') {
        Some((kind, name)) => {
            !kind.is_empty()
                && !name.is_empty()
                && kind.chars().all(|c| c.is_ascii_alphanumeric())
                && !name.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// A principal granted read access to a visibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    pub principal: String,
    /// Consumer group prefix; defaults to the principal name plus `.`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_prefix: Option<String>,
}

impl Consumer {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            group_prefix: None,
        }
    }

    /// Set an explicit consumer group prefix
    pub fn with_group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_prefix = Some(prefix.into());
        self
    }

    /// Effective consumer group prefix
    pub fn group_prefix(&self) -> String {
        match &self.group_prefix {
            Some(prefix) => prefix.clone(),
            None => format!("{}.", principal_name(&self.principal)),
        }
    }
}

/// A declared topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub name: String,
    pub partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i16,
    /// Dynamic topic config; scalar YAML values are accepted and kept as strings
    #[serde(
        default,
        deserialize_with = "deserialize_config",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub config: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_schema: Option<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_schema: Option<Schema>,
}

fn default_replication_factor() -> i16 {
    DEFAULT_REPLICATION_FACTOR
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

fn deserialize_config<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, ConfigScalar>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                ConfigScalar::Bool(b) => b.to_string(),
                ConfigScalar::Int(i) => i.to_string(),
                ConfigScalar::Float(f) => f.to_string(),
                ConfigScalar::Str(s) => s,
            };
            (key, value)
        })
        .collect())
}

impl Topic {
    pub fn new(name: impl Into<String>, partitions: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            config: BTreeMap::new(),
            key_schema: None,
            value_schema: None,
        }
    }

    pub fn with_replication_factor(mut self, replication_factor: i16) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_key_schema(mut self, schema: Schema) -> Self {
        self.key_schema = Some(schema);
        self
    }

    pub fn with_value_schema(mut self, schema: Schema) -> Self {
        self.value_schema = Some(schema);
        self
    }
}

/// A group of topics sharing an access scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    #[serde(rename = "type")]
    pub kind: VisibilityType,
    /// Ignored for PRIVATE visibilities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumers: Vec<Consumer>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl Visibility {
    pub fn new(kind: VisibilityType) -> Self {
        Self {
            kind,
            consumers: Vec::new(),
            topics: Vec::new(),
        }
    }

    pub fn with_consumer(mut self, consumer: Consumer) -> Self {
        self.consumers.push(consumer);
        self
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topics.push(topic);
        self
    }

    /// Topic prefix of this visibility within `domain`
    pub fn prefix(&self, domain: &str) -> String {
        format!("{}.{}.", domain, self.kind.segment())
    }

    /// Consumers that receive grants (none for PRIVATE)
    pub fn effective_consumers(&self) -> &[Consumer] {
        if self.kind.grants_consumers() {
            &self.consumers
        } else {
            &[]
        }
    }
}

/// An ownership unit: a namespace root with a service principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub name: String,
    #[serde(default)]
    pub maintainer: String,
    pub principal: String,
    #[serde(default)]
    pub visibilities: Vec<Visibility>,
}

impl Domain {
    pub fn new(name: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maintainer: String::new(),
            principal: principal.into(),
            visibilities: Vec::new(),
        }
    }

    pub fn with_maintainer(mut self, maintainer: impl Into<String>) -> Self {
        self.maintainer = maintainer.into();
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibilities.push(visibility);
        self
    }

    /// Namespace prefix shared by every resource of this domain
    pub fn prefix(&self) -> String {
        domain_prefix(&self.name)
    }

    /// Visibility of the given type, if declared
    pub fn visibility(&self, kind: VisibilityType) -> Option<&Visibility> {
        self.visibilities.iter().find(|v| v.kind == kind)
    }
}

/// Namespace prefix of a domain name
pub fn domain_prefix(name: &str) -> String {
    format!("{}.", name)
}

/// One declared-topology source (a file) holding one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyUnit {
    /// Source name, the file stem for file-backed stores
    pub source: String,
    pub domain: Domain,
}

impl TopologyUnit {
    pub fn new(source: impl Into<String>, domain: Domain) -> Self {
        Self {
            source: source.into(),
            domain,
        }
    }

    /// Unit named after its domain
    pub fn for_domain(domain: Domain) -> Self {
        Self {
            source: domain.name.clone(),
            domain,
        }
    }
}

/// A declared topic together with its owning unit and visibility
#[derive(Debug, Clone, Copy)]
pub struct TopicRef<'a> {
    pub unit: &'a TopologyUnit,
    pub visibility: &'a Visibility,
    pub topic: &'a Topic,
}

impl<'a> TopicRef<'a> {
    pub fn domain(&self) -> &'a Domain {
        &self.unit.domain
    }

    /// `<domain>.<visibility>.<name>`
    pub fn full_name(&self) -> String {
        format!(
            "{}{}",
            self.visibility.prefix(&self.unit.domain.name),
            self.topic.name
        )
    }

    /// Declared schemas bound to this topic's full name
    pub fn schemas(&self) -> Vec<BoundSchema> {
        let full_name = self.full_name();
        [
            (SchemaRole::Key, self.topic.key_schema.as_ref()),
            (SchemaRole::Value, self.topic.value_schema.as_ref()),
        ]
        .into_iter()
        .filter_map(|(role, schema)| schema.map(|s| s.bind(&full_name, role)))
        .collect()
    }
}

/// The full declared topology of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclaredTopology {
    pub units: Vec<TopologyUnit>,
}

impl DeclaredTopology {
    pub fn new(units: Vec<TopologyUnit>) -> Self {
        Self { units }
    }

    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.units.iter().map(|u| &u.domain)
    }

    pub fn find_domain(&self, name: &str) -> Option<&Domain> {
        self.domains().find(|d| d.name == name)
    }

    /// Every declared topic in declaration order
    pub fn topics(&self) -> Vec<TopicRef<'_>> {
        self.units
            .iter()
            .flat_map(|unit| {
                unit.domain.visibilities.iter().flat_map(move |visibility| {
                    visibility.topics.iter().map(move |topic| TopicRef {
                        unit,
                        visibility,
                        topic,
                    })
                })
            })
            .collect()
    }

    /// Topics owned by the given domains, or all topics when `domains` is `None`
    pub fn topics_in<'a>(&'a self, domains: Option<&[String]>) -> Vec<TopicRef<'a>> {
        self.topics()
            .into_iter()
            .filter(|t| domains.map_or(true, |d| d.contains(&t.domain().name)))
            .collect()
    }

    /// Every declared domain principal
    pub fn principals(&self) -> impl Iterator<Item = &str> {
        self.domains().map(|d| d.principal.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Domain {
        Domain::new("orders", "User:svc-orders")
            .with_visibility(
                Visibility::new(VisibilityType::Public)
                    .with_consumer(Consumer::new("User:svc-billing"))
                    .with_topic(Topic::new("created", 6)),
            )
            .with_visibility(
                Visibility::new(VisibilityType::Private).with_topic(Topic::new("internal", 1)),
            )
    }

    #[test]
    fn test_visibility_type_parse() {
        assert_eq!(
            "PUBLIC".parse::<VisibilityType>().unwrap(),
            VisibilityType::Public
        );
        assert_eq!(
            "protected".parse::<VisibilityType>().unwrap(),
            VisibilityType::Protected
        );
        assert!("SECRET".parse::<VisibilityType>().is_err());
        assert_eq!(VisibilityType::Private.to_string(), "PRIVATE");
    }

    #[test]
    fn test_prefixes_and_full_names() {
        let unit = TopologyUnit::for_domain(orders());
        assert_eq!(unit.domain.prefix(), "orders.");

        let topology = DeclaredTopology::new(vec![unit]);
        let names: Vec<String> = topology.topics().iter().map(|t| t.full_name()).collect();
        assert_eq!(names, vec!["orders.public.created", "orders.private.internal"]);
    }

    #[test]
    fn test_consumer_group_prefix() {
        assert_eq!(Consumer::new("User:analytics").group_prefix(), "analytics.");
        assert_eq!(
            Consumer::new("User:analytics")
                .with_group_prefix("bi.")
                .group_prefix(),
            "bi."
        );
    }

    #[test]
    fn test_private_visibility_has_no_effective_consumers() {
        let vis = Visibility::new(VisibilityType::Private).with_consumer(Consumer::new("User:x"));
        assert!(vis.effective_consumers().is_empty());
    }

    #[test]
    fn test_principal_helpers() {
        assert_eq!(principal_name("User:svc-orders"), "svc-orders");
        assert_eq!(principal_name("plain"), "plain");
        assert!(is_valid_principal("User:svc-orders"));
        assert!(!is_valid_principal("svc-orders"));
        assert!(!is_valid_principal("User:"));
    }

    #[test]
    fn test_domain_name_pattern() {
        assert!(DOMAIN_NAME_PATTERN.is_match("orders"));
        assert!(DOMAIN_NAME_PATTERN.is_match("order-events_v2"));
        assert!(!DOMAIN_NAME_PATTERN.is_match("Orders"));
        assert!(!DOMAIN_NAME_PATTERN.is_match("orders.eu"));
        assert!(!DOMAIN_NAME_PATTERN.is_match("-orders"));
    }

    #[test]
    fn test_topic_config_accepts_scalars() {
        let yaml = r#"
name: created
partitions: 3
config:
  retention.ms: 604800000
  preallocate: true
  min.cleanable.dirty.ratio: 0.5
  cleanup.policy: compact
"#;
        let topic: Topic = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(topic.replication_factor, DEFAULT_REPLICATION_FACTOR);
        assert_eq!(topic.config["retention.ms"], "604800000");
        assert_eq!(topic.config["preallocate"], "true");
        assert_eq!(topic.config["min.cleanable.dirty.ratio"], "0.5");
        assert_eq!(topic.config["cleanup.policy"], "compact");
    }

    #[test]
    fn test_topics_in_filters_by_domain() {
        let billing = Domain::new("billing", "User:svc-billing").with_visibility(
            Visibility::new(VisibilityType::Private).with_topic(Topic::new("ledger", 3)),
        );
        let topology = DeclaredTopology::new(vec![
            TopologyUnit::for_domain(orders()),
            TopologyUnit::for_domain(billing),
        ]);

        let filter = vec!["billing".to_string()];
        let scoped = topology.topics_in(Some(&filter));
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].full_name(), "billing.private.ledger");
        assert_eq!(topology.topics_in(None).len(), 3);
    }
}
