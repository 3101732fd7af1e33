//! Error types for the streamform engine

use crate::validation::Violation;
use std::time::Duration;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Errors that abort a whole engine operation
#[derive(Error, Debug)]
pub enum StreamformError {
    /// Declared topology failed one or more validation rules
    #[error("Validation failed with {} violation(s)", .0.len())]
    Validation(Vec<Violation>),

    /// Topology store failure
    #[error("Topology store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid engine configuration or run options
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Domain filter names a domain that is not declared or observed
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    /// A collaborator call failed in a phase that cannot degrade per resource
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// YAML (de)serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, StreamformError>;

impl StreamformError {
    /// Violations carried by a validation failure
    pub fn violations(&self) -> &[Violation] {
        match self {
            StreamformError::Validation(violations) => violations,
            _ => &[],
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamformError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Errors returned by the cluster admin and schema registry ports
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The call did not complete within the operation timeout
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Broker or registry transiently unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Authentication or authorization failure
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed or rejected request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Schema evolution rejected by the registry's compatibility rules
    #[error("Incompatible schema: {0}")]
    Incompatible(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backing client cannot express this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. } | TransportError::Unavailable(_)
        )
    }

    /// Short stable label for reports and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout { .. } => "timeout",
            TransportError::Unavailable(_) => "unavailable",
            TransportError::Unauthorized(_) => "unauthorized",
            TransportError::InvalidRequest(_) => "invalid_request",
            TransportError::Incompatible(_) => "incompatible",
            TransportError::NotFound(_) => "not_found",
            TransportError::Unsupported(_) => "unsupported",
        }
    }
}

/// Errors raised by topology store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem I/O failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A unit could not be parsed
    #[error("Failed to parse {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// A unit could not be serialized
    #[error("Failed to serialize {source_name}: {message}")]
    Serialize {
        source_name: String,
        message: String,
    },

    /// Unit does not exist
    #[error("Topology unit not found: {0}")]
    NotFound(String),
}

/// Flatten `validator` errors into one sorted `field: message` list
///
/// Nested structs are reported as `outer.inner` and list items as
/// `field[index]`.
pub fn validation_message(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_messages("", errors, &mut messages);
    messages.sort();
    messages.join("; ")
}

fn collect_messages(prefix: &str, errors: &ValidationErrors, messages: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                messages.extend(errs.iter().map(|e| match &e.message {
                    Some(message) => format!("{}: {}", path, message),
                    None => format!("{}: {}", path, e.code),
                }))
            }
            ValidationErrorsKind::Struct(nested) => collect_messages(&path, nested, messages),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_messages(&format!("{}[{}]", path, index), nested, messages);
                }
            }
        }
    }
}
