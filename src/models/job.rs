use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::failure::FailureRecord;

/// Kind of creative a job produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Text,
}

/// Status of a generation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Where an artifact's content lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Inline {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Stored {
        location: String,
    },
}

/// Media produced by a completed job.
///
/// `payload` is `None` when the backend finished but the produced object could
/// not be retrieved or uploaded; the reason is kept under `metadata.artifact_error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub media_type: MediaType,
    pub payload: Option<ArtifactPayload>,
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Artifact {
    pub fn inline(
        media_type: MediaType,
        data: Vec<u8>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            media_type,
            payload: Some(ArtifactPayload::Inline { data }),
            filename: filename.into(),
            content_type: content_type.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn inline_data(&self) -> Option<&[u8]> {
        match &self.payload {
            Some(ArtifactPayload::Inline { data }) => Some(data),
            _ => None,
        }
    }

    /// Copy suitable for durable records: inline bytes are replaced by the
    /// stored location when one is known, and dropped otherwise.
    pub fn for_record(&self) -> Self {
        let payload = match &self.payload {
            Some(ArtifactPayload::Inline { .. }) => self
                .metadata
                .get("storage_location")
                .and_then(|v| v.as_str())
                .map(|location| ArtifactPayload::Stored {
                    location: location.to_string(),
                }),
            other => other.clone(),
        };
        Self {
            payload,
            ..self.clone()
        }
    }
}

/// A tracked unit of generation work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub media_type: MediaType,
    pub model_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub backend_handle: Option<String>,
    pub execution_ref: Option<String>,
    pub correlation_id: Option<String>,
    pub result: Option<Artifact>,
    pub error: Option<FailureRecord>,
}

impl Job {
    pub fn new(id: Uuid, media_type: MediaType, model_id: impl Into<String>) -> Self {
        Self {
            id,
            media_type,
            model_id: model_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            backend_handle: None,
            execution_ref: None,
            correlation_id: None,
            result: None,
            error: None,
        }
    }

    /// Merge a patch into this job.
    ///
    /// Terminal jobs are never mutated. A terminal patch must carry the field
    /// its status requires (result for Completed, error for Failed).
    pub fn apply(&mut self, patch: JobPatch) -> Result<(), PatchError> {
        if self.status.is_terminal() {
            return Err(PatchError::Terminal(self.status));
        }

        let next_status = patch.status.unwrap_or(self.status);
        match next_status {
            JobStatus::Completed if patch.result.is_none() && self.result.is_none() => {
                return Err(PatchError::MissingResult);
            }
            JobStatus::Failed if patch.error.is_none() && self.error.is_none() => {
                return Err(PatchError::MissingError);
            }
            _ => {}
        }

        self.status = next_status;
        if let Some(handle) = patch.backend_handle {
            self.backend_handle = handle;
        }
        if let Some(execution_ref) = patch.execution_ref {
            self.execution_ref = Some(execution_ref);
        }

        match next_status {
            JobStatus::Completed => {
                self.result = patch.result.or(self.result.take());
                self.error = None;
            }
            JobStatus::Failed => {
                self.error = patch.error.or(self.error.take());
                self.result = None;
            }
            _ => {}
        }

        if next_status.is_terminal() {
            self.backend_handle = None;
            self.completed_at = Some(patch.completed_at.unwrap_or_else(Utc::now));
        }

        Ok(())
    }

    /// Copy suitable for durable records (see [`Artifact::for_record`]).
    pub fn for_record(&self) -> Self {
        Self {
            result: self.result.as_ref().map(Artifact::for_record),
            ..self.clone()
        }
    }
}

/// Partial update merged by the ledger. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub backend_handle: Option<Option<String>>,
    pub execution_ref: Option<String>,
    pub result: Option<Artifact>,
    pub error: Option<FailureRecord>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn processing() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            ..Self::default()
        }
    }

    pub fn polling(handle: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            backend_handle: Some(Some(handle.into())),
            ..Self::default()
        }
    }

    pub fn workflow(execution_ref: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            execution_ref: Some(execution_ref.into()),
            ..Self::default()
        }
    }

    pub fn completed(artifact: Artifact) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(artifact),
            ..Self::default()
        }
    }

    pub fn failed(error: FailureRecord) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Patch that brings a local copy in line with a terminal record.
    pub fn from_terminal(record: &Job) -> Option<Self> {
        match record.status {
            JobStatus::Completed => Some(Self {
                completed_at: record.completed_at,
                ..Self::completed(record.result.clone()?)
            }),
            JobStatus::Failed => Some(Self {
                completed_at: record.completed_at,
                ..Self::failed(record.error.clone()?)
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("job is already {0}")]
    Terminal(JobStatus),

    #[error("completed job requires a result")]
    MissingResult,

    #[error("failed job requires an error")]
    MissingError,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
