//! Declared schemas, subject naming and content checks

use serde::{Deserialize, Serialize};

/// Schema serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SchemaFormat {
    #[default]
    Avro,
    Json,
    Protobuf,
}

impl std::fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaFormat::Avro => write!(f, "AVRO"),
            SchemaFormat::Json => write!(f, "JSON"),
            SchemaFormat::Protobuf => write!(f, "PROTOBUF"),
        }
    }
}

impl std::str::FromStr for SchemaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AVRO" => Ok(SchemaFormat::Avro),
            "JSON" => Ok(SchemaFormat::Json),
            "PROTOBUF" => Ok(SchemaFormat::Protobuf),
            _ => Err(format!("Invalid schema format: {}", s)),
        }
    }
}

crate::string_enum_serde!(SchemaFormat);

/// Registry compatibility mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompatibilityMode {
    #[default]
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
    None,
}

impl std::fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompatibilityMode::Backward => "BACKWARD",
            CompatibilityMode::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityMode::Forward => "FORWARD",
            CompatibilityMode::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityMode::Full => "FULL",
            CompatibilityMode::FullTransitive => "FULL_TRANSITIVE",
            CompatibilityMode::None => "NONE",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CompatibilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BACKWARD" => Ok(CompatibilityMode::Backward),
            "BACKWARD_TRANSITIVE" => Ok(CompatibilityMode::BackwardTransitive),
            "FORWARD" => Ok(CompatibilityMode::Forward),
            "FORWARD_TRANSITIVE" => Ok(CompatibilityMode::ForwardTransitive),
            "FULL" => Ok(CompatibilityMode::Full),
            "FULL_TRANSITIVE" => Ok(CompatibilityMode::FullTransitive),
            "NONE" => Ok(CompatibilityMode::None),
            _ => Err(format!("Invalid compatibility mode: {}", s)),
        }
    }
}

crate::string_enum_serde!(CompatibilityMode);

/// Whether a schema describes record keys or values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SchemaRole {
    Key,
    Value,
}

impl SchemaRole {
    /// Subject suffix without the dash
    pub fn suffix(&self) -> &'static str {
        match self {
            SchemaRole::Key => "key",
            SchemaRole::Value => "value",
        }
    }
}

impl std::fmt::Display for SchemaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

impl std::str::FromStr for SchemaRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "key" => Ok(SchemaRole::Key),
            "value" => Ok(SchemaRole::Value),
            _ => Err(format!("Invalid schema role: {}", s)),
        }
    }
}

crate::string_enum_serde!(SchemaRole);

/// `<topic>-<key|value>`
pub fn subject_name(topic: &str, role: SchemaRole) -> String {
    format!("{}-{}", topic, role.suffix())
}

/// Split a subject following the topic naming strategy into topic and role
pub fn split_subject(subject: &str) -> Option<(&str, SchemaRole)> {
    if let Some(topic) = subject.strip_suffix("-key") {
        return (!topic.is_empty()).then_some((topic, SchemaRole::Key));
    }
    if let Some(topic) = subject.strip_suffix("-value") {
        return (!topic.is_empty()).then_some((topic, SchemaRole::Value));
    }
    None
}

/// A schema as declared on a topic
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Explicit subject; derived from the topic when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub format: SchemaFormat,
    #[serde(default)]
    pub compatibility: CompatibilityMode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Path of the content file, relative to the topology directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Schema {
    pub fn new(format: SchemaFormat, content: impl Into<String>) -> Self {
        Self {
            subject: None,
            format,
            compatibility: CompatibilityMode::default(),
            content: content.into(),
            file: None,
        }
    }

    pub fn avro(content: impl Into<String>) -> Self {
        Self::new(SchemaFormat::Avro, content)
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_compatibility(mut self, compatibility: CompatibilityMode) -> Self {
        self.compatibility = compatibility;
        self
    }

    /// Bind this schema to its owning topic
    pub fn bind(&self, topic: &str, role: SchemaRole) -> BoundSchema {
        BoundSchema {
            subject: self
                .subject
                .clone()
                .unwrap_or_else(|| subject_name(topic, role)),
            role,
            topic: topic.to_string(),
            format: self.format,
            compatibility: self.compatibility,
            content: self.content.clone(),
        }
    }
}

/// A declared schema resolved against its owning topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundSchema {
    pub subject: String,
    pub role: SchemaRole,
    /// Full name of the owning topic
    pub topic: String,
    pub format: SchemaFormat,
    pub compatibility: CompatibilityMode,
    pub content: String,
}

impl BoundSchema {
    /// Subject this schema must carry
    pub fn expected_subject(&self) -> String {
        subject_name(&self.topic, self.role)
    }
}

/// Latest registered version of a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredSchema {
    pub subject: String,
    pub id: u32,
    pub version: u32,
    pub format: SchemaFormat,
    pub content: String,
}

/// Parse schema content with the parser for its format
pub fn parse_content(format: SchemaFormat, content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Empty schema content".to_string());
    }
    match format {
        #[cfg(feature = "avro")]
        SchemaFormat::Avro => {
            apache_avro::Schema::parse_str(content)
                .map_err(|e| format!("Invalid Avro schema: {}", e))?;
            Ok(())
        }
        #[cfg(not(feature = "avro"))]
        SchemaFormat::Avro => {
            serde_json::from_str::<serde_json::Value>(content)
                .map_err(|e| format!("Invalid JSON: {}", e))?;
            Ok(())
        }
        #[cfg(feature = "json-schema")]
        SchemaFormat::Json => {
            let value: serde_json::Value =
                serde_json::from_str(content).map_err(|e| format!("Invalid JSON: {}", e))?;
            jsonschema::JSONSchema::compile(&value)
                .map_err(|e| format!("Invalid JSON Schema: {}", e))?;
            Ok(())
        }
        #[cfg(not(feature = "json-schema"))]
        SchemaFormat::Json => {
            serde_json::from_str::<serde_json::Value>(content)
                .map_err(|e| format!("Invalid JSON: {}", e))?;
            Ok(())
        }
        SchemaFormat::Protobuf => check_protobuf(content),
    }
}

/// Structural check: balanced braces and at least one top-level definition
fn check_protobuf(content: &str) -> Result<(), String> {
    let mut depth: i64 = 0;
    for c in content.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err("Invalid protobuf schema: unbalanced braces".to_string());
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("Invalid protobuf schema: unbalanced braces".to_string());
    }

    let has_definition = content.lines().any(|line| {
        let line = line.trim_start();
        ["message ", "enum ", "service "]
            .iter()
            .any(|kw| line.starts_with(kw))
    });
    if !has_definition {
        return Err("Invalid protobuf schema: no message, enum or service".to_string());
    }
    Ok(())
}

/// Canonical form used to compare declared and registered content
pub fn normalize_content(format: SchemaFormat, content: &str) -> String {
    match format {
        SchemaFormat::Avro | SchemaFormat::Json => {
            match serde_json::from_str::<serde_json::Value>(content) {
                Ok(value) => value.to_string(),
                Err(_) => content.trim().to_string(),
            }
        }
        SchemaFormat::Protobuf => content.trim().to_string(),
    }
}
