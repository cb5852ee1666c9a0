use std::sync::Arc;

use tracing::{info, warn};

use crate::models::job::{Job, JobPatch};
use crate::services::adapter::PreparedInvocation;
use crate::services::backend::GenerativeBackend;
use crate::services::gateway::Gateway;
use crate::services::ledger::Ledger;

/// Video generation: start a backend job and hand back a Processing job.
pub struct AsyncPath {
    backend: Arc<dyn GenerativeBackend>,
    ledger: Arc<Ledger>,
    gateway: Arc<Gateway>,
    output_root: String,
}

impl AsyncPath {
    /// `output_root` is the `s3://bucket/prefix` under which each job writes its output.
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        ledger: Arc<Ledger>,
        gateway: Arc<Gateway>,
        output_root: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            ledger,
            gateway,
            output_root: output_root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn output_location(&self, job: &Job) -> String {
        format!("{}/{}", self.output_root, job.id)
    }

    /// Start the backend job. Returns Processing with a handle, or Failed if the
    /// start call itself failed. Start failures are not retried.
    pub async fn start(&self, job: &Job, invocation: &PreparedInvocation) -> Job {
        let output_location = self.output_location(job);
        let patch = match self
            .backend
            .start_async(invocation.model_id(), &invocation.body, &output_location)
            .await
        {
            Ok(started) => {
                info!(
                    job_id = %job.id,
                    handle = %started.handle,
                    output_location = %output_location,
                    "Async generation started"
                );
                JobPatch::polling(started.handle)
            }
            Err(e) => {
                let failure = e.failure_record();
                warn!(
                    job_id = %job.id,
                    kind = %failure.kind,
                    error = %failure.message,
                    "Async generation failed to start"
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
}
