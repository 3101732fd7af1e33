//! Engine configuration and per-run options

use crate::domain::is_valid_principal;
use crate::error::{validation_message, Result, StreamformError};
use crate::validation::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Default timeout for a single collaborator call
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

fn validate_protected_prefixes(prefixes: &[String]) -> std::result::Result<(), ValidationError> {
    if prefixes.iter().any(|p| p.is_empty()) {
        return Err(ValidationError::new("empty_prefix")
            .with_message("an empty protected prefix would protect every topic".into()));
    }
    Ok(())
}

fn validate_validation_config(
    config: &ValidationConfig,
) -> std::result::Result<(), ValidationError> {
    if let Some(principal) = config
        .external_principals
        .iter()
        .find(|p| !is_valid_principal(p))
    {
        return Err(ValidationError::new("invalid_principal").with_message(
            format!("external principal '{}' is not of the form Type:name", principal).into(),
        ));
    }
    Ok(())
}

/// Settings of the reconciliation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound for every collaborator call
    #[validate(range(min = 1, max = 600, message = "operationTimeoutSecs must be between 1 and 600"))]
    pub operation_timeout_secs: u64,

    /// Policy rule settings
    #[validate(custom(function = "validate_validation_config"))]
    pub validation: ValidationConfig,

    /// Topics under these prefixes are never reported as orphans
    #[validate(custom(function = "validate_protected_prefixes"))]
    pub protected_topic_prefixes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            validation: ValidationConfig::default(),
            protected_topic_prefixes: vec!["_".to_string()],
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.checked()
    }

    /// Validate and return self
    pub fn checked(self) -> Result<Self> {
        if let Err(errors) = self.validate() {
            return Err(StreamformError::Config(validation_message(&errors)));
        }
        Ok(self)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_protected_prefixes(mut self, prefixes: impl IntoIterator<Item = String>) -> Self {
        self.protected_topic_prefixes = prefixes.into_iter().collect();
        self
    }
}

/// Options of a single deploy run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOptions {
    /// Plan and report without calling any mutating port method
    pub dry_run: bool,
    pub allow_delete_topics: bool,
    pub allow_delete_acls: bool,
    pub allow_delete_subjects: bool,
    /// Restrict the run to one domain; disables orphan planning
    pub domain_filter: Option<String>,
}

impl DeployOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn allow_delete_topics(mut self, allow: bool) -> Self {
        self.allow_delete_topics = allow;
        self
    }

    pub fn allow_delete_acls(mut self, allow: bool) -> Self {
        self.allow_delete_acls = allow;
        self
    }

    pub fn allow_delete_subjects(mut self, allow: bool) -> Self {
        self.allow_delete_subjects = allow;
        self
    }

    /// Open every deletion gate
    pub fn allow_all_deletes(self) -> Self {
        self.allow_delete_topics(true)
            .allow_delete_acls(true)
            .allow_delete_subjects(true)
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain_filter = Some(domain.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VisibilityType;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
        assert_eq!(config.protected_topic_prefixes, vec!["_".to_string()]);
        assert!(config
            .validation
            .schema_required
            .contains(&VisibilityType::Public));
        assert!(config.checked().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
operationTimeoutSecs: 10
protectedTopicPrefixes: ["_", "connect-"]
validation:
  schemaRequired: [PUBLIC]
  externalPrincipals: ["User:legacy-etl"]
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.operation_timeout_secs, 10);
        assert_eq!(config.protected_topic_prefixes.len(), 2);
        assert_eq!(config.validation.schema_required.len(), 1);
        assert!(config
            .validation
            .external_principals
            .contains("User:legacy-etl"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml_str("operationTimeoutSecs: 5").unwrap();
        assert_eq!(config.protected_topic_prefixes, vec!["_".to_string()]);
        assert_eq!(config.validation, ValidationConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = EngineConfig::from_yaml_str("operationTimeoutSecs: 0").unwrap_err();
        assert!(err.to_string().contains("operationTimeoutSecs"));

        let err = EngineConfig::from_yaml_str("protectedTopicPrefixes: ['']").unwrap_err();
        assert!(matches!(err, StreamformError::Config(_)));

        let err = EngineConfig::from_yaml_str("validation:\n  externalPrincipals: [etl]")
            .unwrap_err();
        assert!(err.to_string().contains("etl"));
    }

    #[test]
    fn test_deploy_options_builder() {
        let options = DeployOptions::new()
            .dry_run(true)
            .allow_all_deletes()
            .domain("orders");
        assert!(options.dry_run);
        assert!(options.allow_delete_topics && options.allow_delete_acls && options.allow_delete_subjects);
        assert_eq!(options.domain_filter.as_deref(), Some("orders"));
    }
}
