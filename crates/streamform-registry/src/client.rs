//! HTTP client for the Confluent schema registry API

use crate::config::RegistryClientConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use streamform_core::ports::PortResult;
use streamform_core::schema::RegisteredSchema;
use streamform_core::{
    CompatibilityMode, Result, SchemaFormat, SchemaRegistryPort, StreamformError, TransportError,
};
use tracing::{debug, info, instrument};

const REGISTRY_MEDIA_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Debug, Serialize)]
struct SchemaRequest<'a> {
    schema: &'a str,
    /// Omitted for AVRO, the registry default
    #[serde(rename = "schemaType", skip_serializing_if = "Option::is_none")]
    schema_type: Option<String>,
}

impl<'a> SchemaRequest<'a> {
    fn new(content: &'a str, format: SchemaFormat) -> Self {
        Self {
            schema: content,
            schema_type: (format != SchemaFormat::Avro).then(|| format.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct SubjectVersionResponse {
    subject: String,
    version: u32,
    id: u32,
    schema: String,
    #[serde(rename = "schemaType", default)]
    schema_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompatibilityResponse {
    is_compatible: bool,
}

#[derive(Debug, Serialize)]
struct ConfigRequest {
    compatibility: String,
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    #[serde(rename = "compatibilityLevel")]
    compatibility_level: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error_code: Option<u32>,
    message: Option<String>,
}

/// Map a failed registry response onto a transport error
pub fn status_error(status: StatusCode, body: &str) -> TransportError {
    let (code, message) = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => (
            err.error_code,
            err.message.unwrap_or_else(|| body.to_string()),
        ),
        Err(_) => (None, body.to_string()),
    };
    let message = format!("{}: {}", status, message);

    if matches!(code, Some(40401..=40499)) || status == StatusCode::NOT_FOUND {
        TransportError::NotFound(message)
    } else if code == Some(409) || status == StatusCode::CONFLICT {
        TransportError::Incompatible(message)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        TransportError::Unauthorized(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        TransportError::Unavailable(message)
    } else {
        TransportError::InvalidRequest(message)
    }
}

/// Schema registry port over the Confluent REST API
pub struct HttpSchemaRegistry {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSchemaRegistry {
    pub fn new(config: RegistryClientConfig) -> Result<Self> {
        let config = config.checked()?;
        let mut builder = Client::builder().timeout(config.timeout());

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            use base64::Engine;

            let credentials = format!("{}:{}", username, password);
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
            let mut headers = HeaderMap::new();
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Basic {}", encoded))
                    .map_err(|e| StreamformError::Config(e.to_string()))?,
            );
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| StreamformError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request_error(&self, operation: &str, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                operation: operation.to_string(),
                after: self.timeout,
            }
        } else {
            TransportError::Unavailable(format!("{}: {}", operation, error))
        }
    }

    /// Send a request and fail on a non-success status
    async fn execute(&self, operation: &str, request: RequestBuilder) -> PortResult<Response> {
        let response = request
            .header(ACCEPT, REGISTRY_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| self.request_error(operation, e))?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(operation, %status, body = %body, "Registry request failed");
        Err(status_error(status, &body))
    }

    async fn json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> PortResult<T> {
        let response = self.execute(operation, request).await?;
        response.json().await.map_err(|e| {
            TransportError::InvalidRequest(format!("{}: malformed response: {}", operation, e))
        })
    }
}

#[async_trait]
impl SchemaRegistryPort for HttpSchemaRegistry {
    async fn list_subjects(&self) -> PortResult<Vec<String>> {
        self.json("list_subjects", self.client.get(self.url("subjects")))
            .await
    }

    #[instrument(skip(self))]
    async fn get_schema(&self, subject: &str) -> PortResult<RegisteredSchema> {
        let response: SubjectVersionResponse = self
            .json(
                "get_schema",
                self.client
                    .get(self.url(&format!("subjects/{}/versions/latest", subject))),
            )
            .await?;

        let format = match response.schema_type.as_deref() {
            Some(schema_type) => schema_type
                .parse()
                .map_err(TransportError::InvalidRequest)?,
            None => SchemaFormat::Avro,
        };
        Ok(RegisteredSchema {
            subject: response.subject,
            id: response.id,
            version: response.version,
            format,
            content: response.schema,
        })
    }

    #[instrument(skip(self, content))]
    async fn register_schema(
        &self,
        subject: &str,
        content: &str,
        format: SchemaFormat,
    ) -> PortResult<u32> {
        let response: RegisterResponse = self
            .json(
                "register_schema",
                self.client
                    .post(self.url(&format!("subjects/{}/versions", subject)))
                    .header(CONTENT_TYPE, REGISTRY_MEDIA_TYPE)
                    .json(&SchemaRequest::new(content, format)),
            )
            .await?;
        info!(subject, schema_id = response.id, "Registered schema");
        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn delete_subject(&self, subject: &str) -> PortResult<Vec<u32>> {
        let versions: Vec<u32> = self
            .json(
                "delete_subject",
                self.client.delete(self.url(&format!("subjects/{}", subject))),
            )
            .await?;
        info!(subject, versions = ?versions, "Deleted subject");
        Ok(versions)
    }

    #[instrument(skip(self, content))]
    async fn check_compatibility(
        &self,
        subject: &str,
        content: &str,
        format: SchemaFormat,
    ) -> PortResult<bool> {
        let request = self
            .client
            .post(self.url(&format!(
                "compatibility/subjects/{}/versions/latest",
                subject
            )))
            .header(CONTENT_TYPE, REGISTRY_MEDIA_TYPE)
            .json(&SchemaRequest::new(content, format));

        match self
            .json::<CompatibilityResponse>("check_compatibility", request)
            .await
        {
            Ok(response) => Ok(response.is_compatible),
            // No registered version to compare against
            Err(TransportError::NotFound(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn set_compatibility(&self, subject: &str, mode: CompatibilityMode) -> PortResult<()> {
        self.execute(
            "set_compatibility",
            self.client
                .put(self.url(&format!("config/{}", subject)))
                .header(CONTENT_TYPE, REGISTRY_MEDIA_TYPE)
                .json(&ConfigRequest {
                    compatibility: mode.to_string(),
                }),
        )
        .await?;
        Ok(())
    }

    async fn get_compatibility(&self, subject: &str) -> PortResult<Option<CompatibilityMode>> {
        let request = self.client.get(self.url(&format!("config/{}", subject)));
        match self.json::<ConfigResponse>("get_compatibility", request).await {
            Ok(config) => config
                .compatibility_level
                .parse()
                .map(Some)
                .map_err(TransportError::InvalidRequest),
            Err(TransportError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_mapping() {
        let not_found = status_error(
            StatusCode::NOT_FOUND,
            r#"{"error_code": 40401, "message": "Subject not found."}"#,
        );
        assert!(matches!(not_found, TransportError::NotFound(m) if m.contains("Subject not found")));

        let conflict = status_error(
            StatusCode::CONFLICT,
            r#"{"error_code": 409, "message": "incompatible"}"#,
        );
        assert!(matches!(conflict, TransportError::Incompatible(_)));

        let invalid = status_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error_code": 42201, "message": "Invalid schema"}"#,
        );
        assert!(matches!(invalid, TransportError::InvalidRequest(_)));

        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            TransportError::Unauthorized(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "denied"),
            TransportError::Unauthorized(_)
        ));

        let unavailable = status_error(StatusCode::SERVICE_UNAVAILABLE, "<html>down</html>");
        assert!(unavailable.is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
    }

    #[test]
    fn test_schema_request_type() {
        let avro = serde_json::to_value(SchemaRequest::new("{}", SchemaFormat::Avro)).unwrap();
        assert!(avro.get("schemaType").is_none());

        let proto =
            serde_json::to_value(SchemaRequest::new("syntax", SchemaFormat::Protobuf)).unwrap();
        assert_eq!(proto["schemaType"], "PROTOBUF");
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(HttpSchemaRegistry::new(RegistryClientConfig::new("not a url")).is_err());
    }
}
