//! Registry client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use streamform_core::error::validation_message;
use streamform_core::{Result, StreamformError};
use validator::Validate;

/// Default HTTP request timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection settings of a Confluent-compatible schema registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegistryClientConfig {
    /// Base URL, e.g. `http://localhost:8081`
    #[validate(url(message = "url must be an absolute URL"))]
    pub url: String,

    /// Basic auth user
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 600, message = "timeoutSecs must be between 1 and 600"))]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl RegistryClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate and return self
    pub fn checked(self) -> Result<Self> {
        if let Err(errors) = self.validate() {
            return Err(StreamformError::Config(validation_message(&errors)));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(StreamformError::Config(
                "username and password must be set together".to_string(),
            ));
        }
        Ok(self)
    }
}
