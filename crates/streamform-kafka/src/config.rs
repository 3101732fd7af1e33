//! Cluster connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use streamform_core::error::validation_message;
use streamform_core::{Result, StreamformError};
use validator::{Validate, ValidationError};

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: i32 = 30_000;

fn validate_brokers(brokers: &[String]) -> std::result::Result<(), ValidationError> {
    if brokers.is_empty() {
        return Err(ValidationError::new("no_brokers")
            .with_message("at least one bootstrap broker is required".into()));
    }
    let malformed = |broker: &&String| match broker.rsplit_once(':') {
        Some((host, port)) => host.is_empty() || port.parse::<u16>().is_err(),
        None => true,
    };
    if let Some(broker) = brokers.iter().find(malformed) {
        return Err(ValidationError::new("invalid_broker")
            .with_message(format!("broker '{}' is not of the form host:port", broker).into()));
    }
    Ok(())
}

/// SASL PLAIN credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SaslPlain {
    #[validate(length(min = 1, message = "username must not be empty"))]
    pub username: String,
    pub password: String,
}

/// Connection settings of the Kafka cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct KafkaAdminConfig {
    /// Bootstrap brokers as `host:port`
    #[validate(custom(function = "validate_brokers"))]
    pub brokers: Vec<String>,

    /// SASL PLAIN authentication (the only mechanism rskafka supports)
    #[serde(default)]
    #[validate(nested)]
    pub sasl: Option<SaslPlain>,

    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 100, max = 600000, message = "connectTimeoutMs must be between 100 and 600000"))]
    pub connect_timeout_ms: u64,

    /// Broker-side timeout of topic creation and deletion
    #[serde(default = "default_request_timeout_ms")]
    #[validate(range(min = 100, max = 600000, message = "requestTimeoutMs must be between 100 and 600000"))]
    pub request_timeout_ms: i32,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_request_timeout_ms() -> i32 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Split a comma separated broker list
pub fn parse_brokers(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(String::from)
        .collect()
}

impl KafkaAdminConfig {
    pub fn new(brokers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            sasl: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    pub fn with_sasl_plain(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.sasl = Some(SaslPlain {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate and return self
    pub fn checked(self) -> Result<Self> {
        if let Err(errors) = self.validate() {
            return Err(StreamformError::Config(validation_message(&errors)));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_brokers() {
        assert_eq!(
            parse_brokers("kafka-1:9092, kafka-2:9092,,"),
            vec!["kafka-1:9092".to_string(), "kafka-2:9092".to_string()]
        );
        assert!(parse_brokers("").is_empty());
    }

    #[test]
    fn test_valid_config() {
        let config = KafkaAdminConfig::new(["localhost:9092"]).with_sasl_plain("admin", "secret");
        let config = config.checked().unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_brokers() {
        let empty = KafkaAdminConfig::new(Vec::<String>::new()).checked().unwrap_err();
        assert!(empty.to_string().contains("at least one bootstrap broker"));

        let no_port = KafkaAdminConfig::new(["localhost"]).checked().unwrap_err();
        assert!(no_port.to_string().contains("host:port"));
    }

    #[test]
    fn test_from_yaml() {
        let config: KafkaAdminConfig = serde_yaml::from_str(
            "brokers: [\"kafka:9092\"]\nsasl:\n  username: admin\n  password: secret\nrequestTimeoutMs: 5000\n",
        )
        .unwrap();
        assert_eq!(config.request_timeout_ms, 5000);
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert!(config.checked().is_ok());
    }
}
