//! Schema reconciler

use super::OrphanScope;
use crate::schema::{
    normalize_content, split_subject, BoundSchema, CompatibilityMode, RegisteredSchema,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Subjects present in the registry, with the latest version of those the
/// declared topology also names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisteredSubjects {
    pub subjects: BTreeSet<String>,
    pub latest: BTreeMap<String, RegisteredSchema>,
    /// Subject-level modes that could be read; `None` when the subject
    /// follows the global default
    pub compatibility: BTreeMap<String, Option<CompatibilityMode>>,
}

impl RegisteredSubjects {
    pub fn new(subjects: impl IntoIterator<Item = String>) -> Self {
        Self {
            subjects: subjects.into_iter().collect(),
            latest: BTreeMap::new(),
            compatibility: BTreeMap::new(),
        }
    }

    pub fn with_latest(mut self, schema: RegisteredSchema) -> Self {
        self.subjects.insert(schema.subject.clone());
        self.latest.insert(schema.subject.clone(), schema);
        self
    }

    pub fn with_compatibility(
        mut self,
        subject: impl Into<String>,
        mode: Option<CompatibilityMode>,
    ) -> Self {
        self.compatibility.insert(subject.into(), mode);
        self
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.subjects.contains(subject)
    }
}

/// Why a schema is queued for registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SchemaChangeReason {
    /// Subject absent from the registry
    New,
    /// Latest registered content differs after normalization
    ContentChanged { previous_version: Option<u32> },
}

/// A schema to register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub schema: BoundSchema,
    pub reason: SchemaChangeReason,
}

/// A subject whose registered content matches but whose mode does not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityChange {
    pub subject: String,
    pub previous: Option<CompatibilityMode>,
    pub mode: CompatibilityMode,
}

/// Planned schema changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    pub register: Vec<SchemaChange>,
    /// Mode changes of subjects not queued for registration
    pub set_compatibility: Vec<CompatibilityChange>,
    /// Registered subjects whose topic nothing declares
    pub orphaned: Vec<String>,
}

impl SchemaPlan {
    pub fn is_empty(&self) -> bool {
        self.register.is_empty() && self.set_compatibility.is_empty() && self.orphaned.is_empty()
    }
}

/// Diff declared schemas against the registry
pub fn plan_schema_changes(
    declared: &[BoundSchema],
    registered: &RegisteredSubjects,
    declared_topics: &BTreeSet<String>,
    scope: &OrphanScope,
) -> SchemaPlan {
    let mut register = Vec::new();
    let mut set_compatibility = Vec::new();
    for schema in declared {
        if !registered.contains(&schema.subject) {
            register.push(SchemaChange {
                schema: schema.clone(),
                reason: SchemaChangeReason::New,
            });
            continue;
        }
        match registered.latest.get(&schema.subject) {
            Some(latest)
                if normalize_content(schema.format, &latest.content)
                    == normalize_content(schema.format, &schema.content) =>
            {
                // Registration sets the mode itself; only unchanged content needs this
                match registered.compatibility.get(&schema.subject) {
                    Some(&previous) if previous != Some(schema.compatibility) => {
                        set_compatibility.push(CompatibilityChange {
                            subject: schema.subject.clone(),
                            previous,
                            mode: schema.compatibility,
                        })
                    }
                    _ => {}
                }
            }
            Some(latest) => register.push(SchemaChange {
                schema: schema.clone(),
                reason: SchemaChangeReason::ContentChanged {
                    previous_version: Some(latest.version),
                },
            }),
            None => register.push(SchemaChange {
                schema: schema.clone(),
                reason: SchemaChangeReason::ContentChanged {
                    previous_version: None,
                },
            }),
        }
    }

    let declared_subjects: BTreeSet<&str> = declared.iter().map(|s| s.subject.as_str()).collect();
    let orphaned = registered
        .subjects
        .iter()
        .filter(|subject| !declared_subjects.contains(subject.as_str()))
        .filter(|subject| {
            split_subject(subject).is_some_and(|(topic, _)| !declared_topics.contains(topic))
        })
        .filter(|subject| scope.covers_subject(subject))
        .cloned()
        .collect();

    SchemaPlan {
        register,
        set_compatibility,
        orphaned,
    }
}
