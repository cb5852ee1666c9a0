use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::models::failure::{FailureKind, FailureRecord};

/// Default timeout for backend HTTP requests. Image generation can take a while.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle returned by a start-async call.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncHandle {
    pub handle: String,
}

/// State reported by the backend for an async job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncState {
    InProgress,
    Completed,
    Failed,
}

/// Result of one async status check.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncStatus {
    pub state: AsyncState,
    pub output_location: Option<String>,
    pub failure_message: Option<String>,
    pub submit_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// The generative backend the orchestrator drives.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Run a model synchronously and return its response body.
    async fn invoke(&self, model_id: &str, body: &Value) -> Result<Value, BackendError>;

    /// Start an async job whose output is written under `output_location`.
    async fn start_async(
        &self,
        model_id: &str,
        body: &Value,
        output_location: &str,
    ) -> Result<AsyncHandle, BackendError>;

    /// Check an async job.
    async fn get_async_status(&self, handle: &str) -> Result<AsyncStatus, BackendError>;
}

/// Client for a bearer-token REST gateway in front of the model runtime.
pub struct HttpBackend {
    http: Client,
    base_url: String,
    api_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartAsyncResponse {
    invocation_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsyncStatusResponse {
    status: String,
    #[serde(default)]
    output_data_config: Option<OutputDataConfig>,
    #[serde(default)]
    failure_message: Option<String>,
    #[serde(default)]
    submit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputDataConfig {
    s3_output_data_config: S3OutputDataConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3OutputDataConfig {
    s3_uri: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_token: &str) -> Result<Self, BackendError> {
        if api_token.is_empty() {
            return Err(BackendError::Credentials("missing backend API token".to_string()));
        }

        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, BackendError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| BackendError::Decode(format!("invalid backend URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Decode("backend URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = request.bearer_auth(&self.api_token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::from_status(status, body))
    }
}

#[async_trait]
impl GenerativeBackend for HttpBackend {
    async fn invoke(&self, model_id: &str, body: &Value) -> Result<Value, BackendError> {
        let url = self.url(&["model", model_id, "invoke"])?;
        let response = self.send(self.http.post(url).json(body)).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn start_async(
        &self,
        model_id: &str,
        body: &Value,
        output_location: &str,
    ) -> Result<AsyncHandle, BackendError> {
        let url = self.url(&["async-invoke"])?;
        let request_body = json!({
            "modelId": model_id,
            "modelInput": body,
            "outputDataConfig": {
                "s3OutputDataConfig": { "s3Uri": output_location }
            },
        });

        let response = self.send(self.http.post(url).json(&request_body)).await?;
        let started: StartAsyncResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        Ok(AsyncHandle {
            handle: started.invocation_arn,
        })
    }

    async fn get_async_status(&self, handle: &str) -> Result<AsyncStatus, BackendError> {
        let url = self.url(&["async-invoke", handle])?;
        let response = self.send(self.http.get(url)).await?;
        let status: AsyncStatusResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let state = match status.status.as_str() {
            "Completed" => AsyncState::Completed,
            "Failed" => AsyncState::Failed,
            _ => AsyncState::InProgress,
        };

        Ok(AsyncStatus {
            state,
            output_location: status
                .output_data_config
                .map(|config| config.s3_output_data_config.s3_uri),
            failure_message: status.failure_message,
            submit_time: status.submit_time,
            end_time: status.end_time,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Self::Credentials(body),
            StatusCode::FORBIDDEN => Self::AccessDenied(body),
            StatusCode::NOT_FOUND => Self::ModelNotFound(body),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::Rejected(body),
            _ => Self::Status {
                status: status.as_u16(),
                body,
            },
        }
    }

    /// Failure record attached to the job this error terminated.
    pub fn failure_record(&self) -> FailureRecord {
        let kind = match self {
            Self::Credentials(_) => FailureKind::CredentialsError,
            Self::AccessDenied(_) => FailureKind::AccessDenied,
            Self::ModelNotFound(_) => FailureKind::ModelNotFound,
            Self::Rejected(_) => FailureKind::ValidationError,
            Self::Http(_) | Self::Status { .. } | Self::Decode(_) => FailureKind::UnknownError,
        };
        FailureRecord::new(kind, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StatusCode::UNAUTHORIZED, FailureKind::CredentialsError),
            (StatusCode::FORBIDDEN, FailureKind::AccessDenied),
            (StatusCode::NOT_FOUND, FailureKind::ModelNotFound),
            (StatusCode::BAD_REQUEST, FailureKind::ValidationError),
            (StatusCode::TOO_MANY_REQUESTS, FailureKind::UnknownError),
            (StatusCode::BAD_GATEWAY, FailureKind::UnknownError),
        ];
        for (status, kind) in cases {
            let record = BackendError::from_status(status, "body".to_string()).failure_record();
            assert_eq!(record.kind, kind, "status {}", status);
        }
    }

    #[test]
    fn test_throttling_is_retriable() {
        let record =
            BackendError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()).failure_record();
        assert!(record.retriable);
    }

    #[test]
    fn test_handle_is_single_path_segment() {
        let backend = HttpBackend::new("https://runtime.example.com/v1/", "token").unwrap();
        let url = backend
            .url(&["async-invoke", "arn:aws:bedrock:us-east-1:123:async-invoke/abc"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://runtime.example.com/v1/async-invoke/arn:aws:bedrock:us-east-1:123:async-invoke%2Fabc"
        );
    }

    #[test]
    fn test_missing_token_rejected() {
        assert!(matches!(
            HttpBackend::new("https://runtime.example.com", ""),
            Err(BackendError::Credentials(_))
        ));
    }
}
