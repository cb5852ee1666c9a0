//! Status poller for async (video) jobs.
//!
//! Each Processing job gets its own task: wait the initial delay, then check the
//! backend at a fixed interval until it reports a terminal state or the attempt
//! budget runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::failure::FailureRecord;
use crate::models::job::{Artifact, ArtifactPayload, Job, JobPatch, MediaType};
use crate::services::backend::{AsyncState, AsyncStatus, GenerativeBackend};
use crate::services::gateway::{ArtifactTarget, Gateway};
use crate::services::ledger::Ledger;

/// Name of the object the video model writes under its output location.
pub const VIDEO_OUTPUT_OBJECT: &str = "output.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    /// Wait before the first check; the backend needs time to provision.
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Maximum number of status checks per job (at least 1).
    pub max_attempts: u32,
}

impl PollerSettings {
    pub fn new(initial_delay: Duration, interval: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(10), 30)
    }
}

/// One scheduled status check. Lives only inside the poll loop.
#[derive(Debug, Clone)]
struct PollAttempt {
    job_id: Uuid,
    backend_handle: String,
    attempt_number: u32,
    next_attempt_at: Instant,
}

impl PollAttempt {
    fn first(job_id: Uuid, backend_handle: String, delay: Duration) -> Self {
        Self {
            job_id,
            backend_handle,
            attempt_number: 1,
            next_attempt_at: Instant::now() + delay,
        }
    }

    fn next(self, interval: Duration) -> Self {
        Self {
            attempt_number: self.attempt_number + 1,
            next_attempt_at: Instant::now() + interval,
            ..self
        }
    }
}

pub struct StatusPoller {
    backend: Arc<dyn GenerativeBackend>,
    ledger: Arc<Ledger>,
    gateway: Arc<Gateway>,
    settings: PollerSettings,
}

impl StatusPoller {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        ledger: Arc<Ledger>,
        gateway: Arc<Gateway>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            backend,
            ledger,
            gateway,
            settings,
        }
    }

    pub fn settings(&self) -> PollerSettings {
        self.settings
    }

    /// Spawn the poll loop for a Processing job and register it with the ledger
    /// so that removing the job cancels the loop.
    pub fn spawn(self: &Arc<Self>, job: Job, target: ArtifactTarget) -> JoinHandle<Option<Job>> {
        let poller = Arc::clone(self);
        let job_id = job.id;
        let task = tokio::spawn(async move { poller.run(job, target).await });
        self.ledger.attach_poll(job_id, task.abort_handle());
        task
    }

    /// Poll until the job settles. Returns `None` if the job has no backend
    /// handle or stopped being tracked before settling.
    pub async fn run(&self, job: Job, target: ArtifactTarget) -> Option<Job> {
        let handle = job.backend_handle.clone()?;
        let max_attempts = self.settings.max_attempts;
        let mut attempt = PollAttempt::first(job.id, handle, self.settings.initial_delay);

        loop {
            sleep_until(attempt.next_attempt_at).await;

            if !self.ledger.contains(attempt.job_id) {
                debug!(job_id = %attempt.job_id, "Job no longer tracked, stopping poll");
                return None;
            }

            metrics::counter!("generation_poll_attempts_total").increment(1);
            let patch = match self.backend.get_async_status(&attempt.backend_handle).await {
                Ok(status) => match status.state {
                    AsyncState::Completed => {
                        let artifact = self.stage_artifact(&job, &status, &target).await;
                        Some(JobPatch::completed(artifact))
                    }
                    AsyncState::Failed => Some(JobPatch::failed(FailureRecord::backend_reported(
                        status
                            .failure_message
                            .unwrap_or_else(|| "backend reported failure".to_string()),
                    ))),
                    AsyncState::InProgress => None,
                },
                Err(e) => {
                    warn!(
                        job_id = %attempt.job_id,
                        attempt = attempt.attempt_number,
                        error = %e,
                        "Status check failed"
                    );
                    None
                }
            };

            let patch = match patch {
                Some(patch) => patch,
                None if attempt.attempt_number >= max_attempts => {
                    warn!(job_id = %attempt.job_id, attempts = max_attempts, "Poll budget exhausted");
                    JobPatch::failed(FailureRecord::timeout(max_attempts))
                }
                None => {
                    debug!(
                        job_id = %attempt.job_id,
                        attempt = attempt.attempt_number,
                        "Job still in progress"
                    );
                    attempt = attempt.next(self.settings.interval);
                    continue;
                }
            };

            let settled = self.ledger.settle(&job, patch);
            if settled.is_transition() {
                info!(
                    job_id = %attempt.job_id,
                    status = %settled.job().status,
                    attempts = attempt.attempt_number,
                    "Async generation settled"
                );
                self.gateway.job_transitioned(settled.job()).await;
            }
            return Some(settled.into_job());
        }
    }

    /// Fetch the produced video. A failed fetch still yields an artifact, with
    /// no payload and the reason under `artifact_error`.
    async fn stage_artifact(&self, job: &Job, status: &AsyncStatus, target: &ArtifactTarget) -> Artifact {
        let filename = format!("video-{}.mp4", job.id);
        let mut artifact = Artifact {
            media_type: MediaType::Video,
            payload: None,
            filename,
            content_type: "video/mp4".to_string(),
            metadata: serde_json::Map::new(),
        }
        .with_metadata("model_id", job.model_id.as_str());
        if let Some(submit_time) = status.submit_time {
            artifact = artifact.with_metadata("submit_time", submit_time.to_rfc3339());
        }
        if let Some(end_time) = status.end_time {
            artifact = artifact.with_metadata("end_time", end_time.to_rfc3339());
        }

        let Some(output_location) = status.output_location.as_deref() else {
            warn!(job_id = %job.id, "Completed job reported no output location");
            return artifact.with_metadata("artifact_error", "backend reported no output location");
        };

        let object_location = format!(
            "{}/{}",
            output_location.trim_end_matches('/'),
            VIDEO_OUTPUT_OBJECT
        );
        artifact = artifact.with_metadata("output_location", object_location.as_str());

        match self.gateway.objects().fetch_object(&object_location).await {
            Ok(data) => {
                let artifact = Artifact {
                    payload: Some(ArtifactPayload::Inline { data }),
                    ..artifact
                };
                self.gateway.persist_artifact(job.id, target, artifact).await
            }
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    location = %object_location,
                    error = %e,
                    "Artifact fetch failed, completing without content"
                );
                artifact.with_metadata("artifact_error", e.to_string())
            }
        }
    }
}
