use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::failure::FailureRecord;
use crate::models::job::{Artifact, Job, JobStatus, MediaType};

/// A request to generate one creative. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub media_type: MediaType,
    pub prompt: String,
    /// Media-specific settings, decoded by the invocation adapter.
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub explicit_model_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Set for persisted-creative flows: the artifact is uploaded and recorded.
    #[serde(default)]
    pub creative_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(media_type: MediaType, prompt: impl Into<String>) -> Self {
        Self {
            media_type,
            prompt: prompt.into(),
            settings: serde_json::Value::Null,
            explicit_model_id: None,
            correlation_id: None,
            creative_id: None,
        }
    }

    pub fn with_settings<S: Serialize>(mut self, settings: &S) -> Self {
        self.settings = serde_json::to_value(settings).unwrap_or(serde_json::Value::Null);
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.explicit_model_id = Some(model_id.into());
        self
    }

    pub fn with_creative(mut self, creative_id: impl Into<String>) -> Self {
        self.creative_id = Some(creative_id.into());
        self
    }
}

/// Image generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageSettings {
    pub width: u32,
    pub height: u32,
    pub number_of_images: u32,
    pub cfg_scale: f32,
    pub quality: String,
    /// Caller-supplied seed for reproducible output.
    pub seed: Option<u32>,
    pub negative_prompt: Option<String>,
    /// Base64-encoded reference image.
    pub reference_image: Option<String>,
    /// Outpaint around the reference image (logo inclusion) instead of varying it.
    pub include_logo: bool,
    pub similarity_strength: f32,
    pub mask_prompt: Option<String>,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            number_of_images: 1,
            cfg_scale: 8.0,
            quality: "standard".to_string(),
            seed: None,
            negative_prompt: None,
            reference_image: None,
            include_logo: false,
            similarity_strength: 0.7,
            mask_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoMode {
    #[default]
    Single,
    Multi,
}

/// Video generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoSettings {
    pub mode: VideoMode,
    pub duration_seconds: u32,
    pub seed: Option<u32>,
    /// Base64-encoded starting frame (single-shot only).
    pub reference_image: Option<String>,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            mode: VideoMode::Single,
            duration_seconds: 6,
            seed: None,
            reference_image: None,
        }
    }
}

/// Text generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TextSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub system: Option<String>,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 0.9,
            system: None,
        }
    }
}

/// Body of `POST /api/v1/generations`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitGenerationRequest {
    #[garde(skip)]
    pub media_type: MediaType,

    #[garde(length(max = 8000))]
    pub prompt: String,

    #[garde(skip)]
    #[serde(default)]
    pub settings: serde_json::Value,

    #[garde(length(min = 1, max = 200))]
    pub model_id: Option<String>,

    #[garde(length(min = 1, max = 200))]
    pub correlation_id: Option<String>,

    #[garde(length(min = 1, max = 200))]
    pub creative_id: Option<String>,
}

impl From<SubmitGenerationRequest> for GenerationRequest {
    fn from(body: SubmitGenerationRequest) -> Self {
        Self {
            media_type: body.media_type,
            prompt: body.prompt,
            settings: body.settings,
            explicit_model_id: body.model_id,
            correlation_id: body.correlation_id,
            creative_id: body.creative_id,
        }
    }
}

/// Response for job submission and status queries.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub media_type: MediaType,
    pub model_id: String,
    pub status: JobStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub result: Option<Artifact>,
    pub error: Option<FailureRecord>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            media_type: job.media_type,
            model_id: job.model_id,
            status: job.status,
            created_at: job.created_at,
            completed_at: job.completed_at,
            result: job.result,
            error: job.error,
        }
    }
}

/// Error body returned for rejected submissions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}
