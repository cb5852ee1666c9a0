use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use serde_json::Value;
use tracing::{info, warn};

use crate::models::failure::FailureRecord;
use crate::models::job::{Artifact, Job, JobPatch, JobStatus, MediaType};
use crate::services::adapter::PreparedInvocation;
use crate::services::backend::GenerativeBackend;
use crate::services::gateway::{ArtifactTarget, Gateway};
use crate::services::ledger::Ledger;

/// Image and text generation: one backend call, then a terminal job.
pub struct SyncPath {
    backend: Arc<dyn GenerativeBackend>,
    ledger: Arc<Ledger>,
    gateway: Arc<Gateway>,
}

impl SyncPath {
    pub fn new(backend: Arc<dyn GenerativeBackend>, ledger: Arc<Ledger>, gateway: Arc<Gateway>) -> Self {
        Self {
            backend,
            ledger,
            gateway,
        }
    }

    /// Run the invocation for `job` and settle it. Always returns a terminal job.
    pub async fn execute(
        &self,
        job: &Job,
        invocation: &PreparedInvocation,
        target: &ArtifactTarget,
    ) -> Job {
        self.mark_processing(job).await;

        let start = Instant::now();
        let response = self
            .backend
            .invoke(invocation.model_id(), &invocation.body)
            .await;
        metrics::histogram!("generation_backend_seconds", "media_type" => job.media_type.to_string())
            .record(start.elapsed().as_secs_f64());

        let patch = match response.map_err(|e| e.failure_record()).and_then(|body| {
            decode_artifact(job, invocation, &body)
        }) {
            Ok(artifact) => {
                let artifact = self.gateway.persist_artifact(job.id, target, artifact).await;
                info!(
                    job_id = %job.id,
                    media_type = %job.media_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Synchronous generation completed"
                );
                JobPatch::completed(artifact)
            }
            Err(failure) => {
                warn!(
                    job_id = %job.id,
                    media_type = %job.media_type,
                    kind = %failure.kind,
                    error = %failure.message,
                    "Synchronous generation failed"
                );
                JobPatch::failed(failure)
            }
        };

        let settled = self.ledger.settle(job, patch);
        if settled.is_transition() {
            self.gateway.job_transitioned(settled.job()).await;
        }
        settled.into_job()
    }

    /// Pending -> Processing while the backend call is in flight.
    async fn mark_processing(&self, job: &Job) {
        if job.status != JobStatus::Pending {
            return;
        }
        if let Ok(processing) = self.ledger.update(job.id, JobPatch::processing()) {
            self.gateway.job_transitioned(&processing).await;
        }
    }
}

fn decode_artifact(
    job: &Job,
    invocation: &PreparedInvocation,
    body: &Value,
) -> Result<Artifact, FailureRecord> {
    let artifact = match job.media_type {
        MediaType::Image => {
            let (encoded, count) = extract_image(body).ok_or_else(|| no_media(body))?;
            let data = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| FailureRecord::unknown(format!("image payload is not base64: {}", e)))?;
            let (extension, content_type) = match image::guess_format(&data) {
                Ok(image::ImageFormat::Jpeg) => ("jpg", "image/jpeg"),
                Ok(image::ImageFormat::WebP) => ("webp", "image/webp"),
                _ => ("png", "image/png"),
            };
            Artifact::inline(
                MediaType::Image,
                data,
                format!("image-{}.{}", job.id, extension),
                content_type,
            )
            .with_metadata("images_returned", count)
        }
        MediaType::Text => {
            let text = extract_text(body).ok_or_else(|| no_media(body))?;
            Artifact::inline(
                MediaType::Text,
                text.into_bytes(),
                format!("text-{}.txt", job.id),
                "text/plain; charset=utf-8",
            )
        }
        MediaType::Video => {
            return Err(FailureRecord::unknown(
                "video is not generated synchronously",
            ))
        }
    };

    let mut artifact = artifact.with_metadata("model_id", invocation.model_id());
    if let Some(task_type) = invocation.body.get("taskType") {
        artifact = artifact.with_metadata("task_type", task_type.clone());
    }
    if let Some(seed) = invocation.body.pointer("/imageGenerationConfig/seed") {
        artifact = artifact.with_metadata("seed", seed.clone());
    }
    Ok(artifact)
}

fn no_media(body: &Value) -> FailureRecord {
    match body.get("error").and_then(Value::as_str) {
        Some(message) if !message.is_empty() => FailureRecord::backend_reported(message),
        _ => FailureRecord::unknown("no media in response"),
    }
}

/// Find the first base64 image, checking known response shapes in order.
/// Returns the payload and how many images the response carried.
pub fn extract_image(body: &Value) -> Option<(&str, usize)> {
    if let Some(images) = body.get("images").and_then(Value::as_array) {
        if let Some(first) = images.first().and_then(Value::as_str) {
            return Some((first, images.len()));
        }
    }
    if let Some(artifacts) = body.get("artifacts").and_then(Value::as_array) {
        if let Some(first) = artifacts
            .first()
            .and_then(|a| a.get("base64"))
            .and_then(Value::as_str)
        {
            return Some((first, artifacts.len()));
        }
    }
    if let Some(data) = body.get("data").and_then(Value::as_array) {
        if let Some(first) = data
            .first()
            .and_then(|d| d.get("b64_json"))
            .and_then(Value::as_str)
        {
            return Some((first, data.len()));
        }
    }
    body.get("image").and_then(Value::as_str).map(|image| (image, 1))
}

/// Find the generated text, checking known response shapes in order.
pub fn extract_text(body: &Value) -> Option<String> {
    if let Some(content) = body.get("content").and_then(Value::as_array) {
        let text: Vec<&str> = content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str).unwrap_or("text") == "text")
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();
        if !text.is_empty() {
            return Some(text.concat());
        }
    }

    [
        "/output/message/content/0/text",
        "/results/0/outputText",
        "/completion",
        "/generation",
    ]
    .iter()
    .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
    .map(str::to_string)
}
