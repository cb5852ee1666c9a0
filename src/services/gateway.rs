//! Persistence and notification gateway.
//!
//! Every write here is fire-and-forget from the job's point of view: failures are
//! logged and counted, never propagated, and never change a job's status.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::generation::GenerationRequest;
use crate::models::job::{Artifact, Job, JobStatus};
use crate::services::queue::{EventBus, MessageQueue};
use crate::services::records::RecordStore;
use crate::services::storage::ObjectStore;

/// Names of the tables, queue and bus the gateway writes to.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub jobs_table: String,
    pub creatives_table: String,
    pub notification_queue: String,
    pub event_bus: String,
    pub event_source: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            jobs_table: "generation_jobs".to_string(),
            creatives_table: "creatives".to_string(),
            notification_queue: "creative_orchestrator:notifications".to_string(),
            event_bus: "creative_orchestrator:events".to_string(),
            event_source: "creative.orchestrator".to_string(),
        }
    }
}

/// Where a completed job's content is uploaded before the job settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactTarget {
    /// Kept inline for the caller; the job's record carries no content.
    Inline,
    /// Uploaded under the creative and written to the creatives table.
    Creative(String),
    /// Uploaded under the job id so the job's record points at it.
    Job,
}

impl ArtifactTarget {
    /// Target for a job run directly for the caller that submitted it.
    pub fn for_request(request: &GenerationRequest) -> Self {
        match &request.creative_id {
            Some(creative_id) => Self::Creative(creative_id.clone()),
            None => Self::Inline,
        }
    }

    /// Target for a workflow execution, whose caller only ever sees the record.
    pub fn for_workflow(request: &GenerationRequest) -> Self {
        match &request.creative_id {
            Some(creative_id) => Self::Creative(creative_id.clone()),
            None => Self::Job,
        }
    }
}

pub struct Gateway {
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn MessageQueue>,
    events: Arc<dyn EventBus>,
    objects: Arc<dyn ObjectStore>,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn MessageQueue>,
        events: Arc<dyn EventBus>,
        objects: Arc<dyn ObjectStore>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            records,
            queue,
            events,
            objects,
            settings,
        }
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    /// Record a newly submitted job and announce it.
    pub async fn job_submitted(&self, job: &Job, request: &GenerationRequest) {
        let mut fields = job_fields(job);
        fields["prompt"] = json!(request.prompt);
        if let Some(creative_id) = &request.creative_id {
            fields["creative_id"] = json!(creative_id);
        }

        if let Err(e) = self
            .records
            .put_item(&self.settings.jobs_table, &job.id.to_string(), &fields)
            .await
        {
            failed("put_item", job.id, &e);
        }

        self.publish(job, "GenerationJobSubmitted").await;
    }

    /// Record a status change. Terminal transitions also notify the work queue.
    pub async fn job_transitioned(&self, job: &Job) {
        if let Err(e) = self
            .records
            .update_item(&self.settings.jobs_table, &job.id.to_string(), &job_fields(job))
            .await
        {
            failed("update_item", job.id, &e);
        }

        let detail_type = match job.status {
            JobStatus::Pending => return,
            JobStatus::Processing => "GenerationJobProcessing",
            JobStatus::Completed => {
                metrics::counter!("generation_jobs_completed", "media_type" => job.media_type.to_string())
                    .increment(1);
                "GenerationJobCompleted"
            }
            JobStatus::Failed => {
                let kind = job
                    .error
                    .as_ref()
                    .map(|e| e.kind.to_string())
                    .unwrap_or_default();
                metrics::counter!("generation_jobs_failed", "kind" => kind).increment(1);
                "GenerationJobFailed"
            }
        };
        self.publish(job, detail_type).await;

        if job.status.is_terminal() {
            let message = json!({
                "job_id": job.id,
                "status": job.status,
                "media_type": job.media_type,
                "correlation_id": job.correlation_id,
            });
            if let Err(e) = self
                .queue
                .enqueue_message(&self.settings.notification_queue, &message)
                .await
            {
                failed("enqueue_message", job.id, &e);
            }
        }
    }

    /// Upload an artifact to `target` before its job settles.
    ///
    /// Returns the artifact annotated with its storage location. With nothing to
    /// upload, or an inline-only target, the artifact comes back unchanged. A
    /// failed upload for a job-scoped target is noted under `artifact_error`,
    /// since the job's record will then carry no content.
    pub async fn persist_artifact(&self, job_id: Uuid, target: &ArtifactTarget, artifact: Artifact) -> Artifact {
        let key = match target {
            ArtifactTarget::Inline => return artifact,
            ArtifactTarget::Creative(creative_id) => format!("creatives/{}/{}", creative_id, artifact.filename),
            ArtifactTarget::Job => format!("jobs/{}/{}", job_id, artifact.filename),
        };
        let Some(data) = artifact.inline_data() else {
            return artifact;
        };

        let location = match self.objects.put_object(&key, data, &artifact.content_type).await {
            Ok(location) => location,
            Err(e) => {
                failed("put_object", job_id, &e);
                return match target {
                    ArtifactTarget::Job => {
                        artifact.with_metadata("artifact_error", format!("artifact upload failed: {}", e))
                    }
                    _ => artifact,
                };
            }
        };

        if let ArtifactTarget::Creative(creative_id) = target {
            let record = json!({
                "creative_id": creative_id,
                "job_id": job_id,
                "media_type": artifact.media_type,
                "location": location,
                "filename": artifact.filename,
                "content_type": artifact.content_type,
            });
            if let Err(e) = self
                .records
                .put_item(&self.settings.creatives_table, creative_id, &record)
                .await
            {
                failed("put_item", job_id, &e);
            }
        }

        debug!(job_id = %job_id, key = %key, location = %location, "Artifact persisted");
        artifact.with_metadata("storage_location", location)
    }

    /// Read back the durable copy of a job, if one exists and parses.
    pub async fn load_job(&self, job_id: Uuid) -> Option<Job> {
        match self
            .records
            .get_item(&self.settings.jobs_table, &job_id.to_string())
            .await
        {
            Ok(Some(fields)) => match serde_json::from_value::<Job>(fields) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Stored job record is unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                failed("get_item", job_id, &e);
                None
            }
        }
    }

    async fn publish(&self, job: &Job, detail_type: &str) {
        let detail = json!({
            "job_id": job.id,
            "media_type": job.media_type,
            "model_id": job.model_id,
            "status": job.status,
            "correlation_id": job.correlation_id,
            "error": job.error,
        });
        if let Err(e) = self
            .events
            .publish_event(
                &self.settings.event_bus,
                &self.settings.event_source,
                detail_type,
                &detail,
            )
            .await
        {
            failed("publish_event", job.id, &e);
        }
    }
}

fn job_fields(job: &Job) -> serde_json::Value {
    serde_json::to_value(job.for_record()).unwrap_or_else(|_| json!({ "id": job.id }))
}

fn failed(operation: &'static str, job_id: Uuid, error: &dyn std::fmt::Display) {
    metrics::counter!("gateway_failures_total", "operation" => operation).increment(1);
    warn!(job_id = %job_id, operation, error = %error, "Gateway write failed");
}
