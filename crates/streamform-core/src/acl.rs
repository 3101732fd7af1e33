//! Access-control entries and filters
//!
//! The same [`AccessEntry`] type is used for entries derived from declared
//! ownership and for entries listed from the cluster, so diffing is plain set
//! arithmetic.

use serde::{Deserialize, Serialize};

/// Host value matching every client address
pub const ANY_HOST: &str = "*";

/// Kind of resource an entry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceType {
    Topic,
    Group,
    TransactionalId,
    Cluster,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Topic => write!(f, "TOPIC"),
            ResourceType::Group => write!(f, "GROUP"),
            ResourceType::TransactionalId => write!(f, "TRANSACTIONAL_ID"),
            ResourceType::Cluster => write!(f, "CLUSTER"),
        }
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TOPIC" => Ok(ResourceType::Topic),
            "GROUP" => Ok(ResourceType::Group),
            "TRANSACTIONAL_ID" => Ok(ResourceType::TransactionalId),
            "CLUSTER" => Ok(ResourceType::Cluster),
            _ => Err(format!("Invalid resource type: {}", s)),
        }
    }
}

crate::string_enum_serde!(ResourceType);

/// How the resource name is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PatternType {
    Literal,
    Prefixed,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternType::Literal => write!(f, "LITERAL"),
            PatternType::Prefixed => write!(f, "PREFIXED"),
        }
    }
}

impl std::str::FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LITERAL" => Ok(PatternType::Literal),
            "PREFIXED" => Ok(PatternType::Prefixed),
            _ => Err(format!("Invalid pattern type: {}", s)),
        }
    }
}

crate::string_enum_serde!(PatternType);

/// Operation granted or denied by an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operation {
    All,
    Read,
    Write,
    Create,
    Delete,
    Alter,
    Describe,
    ClusterAction,
    DescribeConfigs,
    AlterConfigs,
    IdempotentWrite,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::All => "ALL",
            Operation::Read => "READ",
            Operation::Write => "WRITE",
            Operation::Create => "CREATE",
            Operation::Delete => "DELETE",
            Operation::Alter => "ALTER",
            Operation::Describe => "DESCRIBE",
            Operation::ClusterAction => "CLUSTER_ACTION",
            Operation::DescribeConfigs => "DESCRIBE_CONFIGS",
            Operation::AlterConfigs => "ALTER_CONFIGS",
            Operation::IdempotentWrite => "IDEMPOTENT_WRITE",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ALL" => Ok(Operation::All),
            "READ" => Ok(Operation::Read),
            "WRITE" => Ok(Operation::Write),
            "CREATE" => Ok(Operation::Create),
            "DELETE" => Ok(Operation::Delete),
            "ALTER" => Ok(Operation::Alter),
            "DESCRIBE" => Ok(Operation::Describe),
            "CLUSTER_ACTION" => Ok(Operation::ClusterAction),
            "DESCRIBE_CONFIGS" => Ok(Operation::DescribeConfigs),
            "ALTER_CONFIGS" => Ok(Operation::AlterConfigs),
            "IDEMPOTENT_WRITE" => Ok(Operation::IdempotentWrite),
            _ => Err(format!("Invalid operation: {}", s)),
        }
    }
}

crate::string_enum_serde!(Operation);

/// Whether an entry allows or denies the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Permission {
    Allow,
    Deny,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Allow => write!(f, "ALLOW"),
            Permission::Deny => write!(f, "DENY"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ALLOW" => Ok(Permission::Allow),
            "DENY" => Ok(Permission::Deny),
            _ => Err(format!("Invalid permission: {}", s)),
        }
    }
}

crate::string_enum_serde!(Permission);

/// One access-control entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    pub principal: String,
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub pattern_type: PatternType,
    pub operation: Operation,
    pub permission: Permission,
    pub host: String,
}

impl AccessEntry {
    /// ALLOW entry for any host
    pub fn allow(
        principal: impl Into<String>,
        resource_type: ResourceType,
        resource_name: impl Into<String>,
        pattern_type: PatternType,
        operation: Operation,
    ) -> Self {
        Self {
            principal: principal.into(),
            resource_type,
            resource_name: resource_name.into(),
            pattern_type,
            operation,
            permission: Permission::Allow,
            host: ANY_HOST.to_string(),
        }
    }

    /// PREFIXED ALLOW entry for any host
    pub fn prefixed(
        principal: impl Into<String>,
        resource_type: ResourceType,
        prefix: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self::allow(
            principal,
            resource_type,
            prefix,
            PatternType::Prefixed,
            operation,
        )
    }

    /// Whether this entry grants `operation` on the named topic
    pub fn grants_topic(&self, topic: &str, operation: Operation) -> bool {
        self.resource_type == ResourceType::Topic
            && self.permission == Permission::Allow
            && (self.operation == operation || self.operation == Operation::All)
            && match self.pattern_type {
                PatternType::Literal => self.resource_name == topic || self.resource_name == "*",
                PatternType::Prefixed => topic.starts_with(&self.resource_name),
            }
    }
}

impl std::fmt::Display for AccessEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} on {}:{}:{} from {}",
            self.permission,
            self.principal,
            self.operation,
            self.resource_type,
            self.pattern_type,
            self.resource_name,
            self.host
        )
    }
}

/// Filter over access entries; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessFilter {
    pub principal: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub resource_name: Option<String>,
    pub pattern_type: Option<PatternType>,
    pub operation: Option<Operation>,
    pub permission: Option<Permission>,
    pub host: Option<String>,
}

impl AccessFilter {
    /// Filter matching every entry
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter matching exactly one entry
    pub fn exact(entry: &AccessEntry) -> Self {
        Self {
            principal: Some(entry.principal.clone()),
            resource_type: Some(entry.resource_type),
            resource_name: Some(entry.resource_name.clone()),
            pattern_type: Some(entry.pattern_type),
            operation: Some(entry.operation),
            permission: Some(entry.permission),
            host: Some(entry.host.clone()),
        }
    }

    pub fn for_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &AccessEntry) -> bool {
        self.principal.as_ref().map_or(true, |p| *p == entry.principal)
            && self.resource_type.map_or(true, |t| t == entry.resource_type)
            && self
                .resource_name
                .as_ref()
                .map_or(true, |n| *n == entry.resource_name)
            && self.pattern_type.map_or(true, |p| p == entry.pattern_type)
            && self.operation.map_or(true, |o| o == entry.operation)
            && self.permission.map_or(true, |p| p == entry.permission)
            && self.host.as_ref().map_or(true, |h| *h == entry.host)
    }
}

impl std::fmt::Display for AccessFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn or_any<T: ToString>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "*".to_string())
        }
        write!(
            f,
            "{} {} {} on {}:{}:{} from {}",
            or_any(&self.permission),
            or_any(&self.principal),
            or_any(&self.operation),
            or_any(&self.resource_type),
            or_any(&self.pattern_type),
            or_any(&self.resource_name),
            or_any(&self.host)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_mapping() {
        assert_eq!(
            "transactional_id".parse::<ResourceType>().unwrap(),
            ResourceType::TransactionalId
        );
        assert_eq!(Operation::IdempotentWrite.to_string(), "IDEMPOTENT_WRITE");
        assert_eq!(
            "IDEMPOTENT_WRITE".parse::<Operation>().unwrap(),
            Operation::IdempotentWrite
        );
        assert!("MATCH".parse::<PatternType>().is_err());
    }

    #[test]
    fn test_exact_filter_matches_only_its_entry() {
        let entry = AccessEntry::prefixed("User:a", ResourceType::Topic, "a.", Operation::Read);
        let other = AccessEntry::prefixed("User:a", ResourceType::Topic, "a.", Operation::Write);
        let filter = AccessFilter::exact(&entry);
        assert!(filter.matches(&entry));
        assert!(!filter.matches(&other));
        assert!(AccessFilter::any().matches(&other));
        assert!(AccessFilter::for_principal("User:a").matches(&other));
    }

    #[test]
    fn test_grants_topic() {
        let prefixed = AccessEntry::prefixed("User:a", ResourceType::Topic, "a.", Operation::Write);
        assert!(prefixed.grants_topic("a.public.x", Operation::Write));
        assert!(!prefixed.grants_topic("b.public.x", Operation::Write));
        assert!(!prefixed.grants_topic("a.public.x", Operation::Read));

        let literal = AccessEntry::allow(
            "User:a",
            ResourceType::Topic,
            "a.public.x",
            PatternType::Literal,
            Operation::All,
        );
        assert!(literal.grants_topic("a.public.x", Operation::Read));
        assert!(!literal.grants_topic("a.public.y", Operation::Read));
    }

    #[test]
    fn test_entry_serde_uses_wire_names() {
        let entry = AccessEntry::prefixed("User:a", ResourceType::Group, "a.", Operation::Read);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"resourceType\":\"GROUP\""));
        assert!(json.contains("\"patternType\":\"PREFIXED\""));
    }
}
