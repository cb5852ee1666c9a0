//! Caller-facing generation orchestrator.
//!
//! One `Orchestrator` owns one [`Ledger`]; route handlers and the workflow
//! worker share it through an `Arc`.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::failure::FailureRecord;
use crate::models::generation::GenerationRequest;
use crate::models::job::{Job, JobPatch};
use crate::services::adapter::{AdapterError, InvocationAdapter};
use crate::services::async_path::AsyncPath;
use crate::services::backend::GenerativeBackend;
use crate::services::dispatch::{DirectDispatcher, Dispatched};
use crate::services::fallback::FallbackController;
use crate::services::gateway::{ArtifactTarget, Gateway};
use crate::services::ledger::Ledger;
use crate::services::poller::{PollerSettings, StatusPoller};
use crate::services::sync_path::SyncPath;
use crate::services::workflow::{WorkflowEngine, WorkflowExecution};

pub struct Orchestrator {
    adapter: InvocationAdapter,
    ledger: Arc<Ledger>,
    gateway: Arc<Gateway>,
    direct: Arc<DirectDispatcher>,
    fallback: Option<FallbackController>,
}

impl Orchestrator {
    /// Build an orchestrator that runs every job through the direct paths.
    ///
    /// `video_output_root` is the `s3://bucket/prefix` async jobs write under.
    pub fn new(
        adapter: InvocationAdapter,
        backend: Arc<dyn GenerativeBackend>,
        gateway: Arc<Gateway>,
        poller_settings: PollerSettings,
        video_output_root: &str,
    ) -> Self {
        let ledger = Arc::new(Ledger::new());
        let sync_path = SyncPath::new(Arc::clone(&backend), Arc::clone(&ledger), Arc::clone(&gateway));
        let async_path = AsyncPath::new(
            Arc::clone(&backend),
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            video_output_root,
        );
        let poller = Arc::new(StatusPoller::new(
            backend,
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            poller_settings,
        ));

        Self {
            adapter,
            ledger,
            gateway,
            direct: Arc::new(DirectDispatcher::new(sync_path, async_path, poller)),
            fallback: None,
        }
    }

    /// Prefer the durable workflow engine, falling back to the direct paths.
    pub fn with_workflow(mut self, engine: Arc<dyn WorkflowEngine>, workflow_ref: &str) -> Self {
        self.fallback = Some(FallbackController::new(
            engine,
            workflow_ref,
            Arc::clone(&self.ledger),
            Arc::clone(&self.gateway),
            Arc::clone(&self.direct),
        ));
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Submit a request. Image and text return a terminal job; video returns
    /// Processing (or Failed if the backend refused to start it).
    pub async fn submit(&self, request: GenerationRequest) -> Result<Job, OrchestratorError> {
        Ok(self.submit_tracked(request).await?.job)
    }

    /// Like [`Orchestrator::submit`], also handing back the poll task, if any.
    pub async fn submit_tracked(&self, request: GenerationRequest) -> Result<Dispatched, OrchestratorError> {
        let invocation = self.adapter.prepare(&request)?;

        let mut job = Job::new(Uuid::new_v4(), request.media_type, invocation.model_id());
        job.correlation_id = request.correlation_id.clone();
        self.ledger.add(job.clone());
        metrics::counter!("generation_jobs_total", "media_type" => request.media_type.to_string())
            .increment(1);
        info!(
            job_id = %job.id,
            media_type = %job.media_type,
            model_id = %job.model_id,
            "Generation job submitted"
        );
        self.gateway.job_submitted(&job, &request).await;

        let dispatched = match &self.fallback {
            Some(fallback) => fallback.submit(&job, &request, &invocation).await,
            None => {
                self.direct
                    .dispatch(&job, &invocation, &ArtifactTarget::for_request(&request))
                    .await
            }
        };
        Ok(dispatched)
    }

    /// Current state of a tracked job.
    ///
    /// Jobs handed to the workflow engine are refreshed from their durable
    /// record, where the workflow worker writes its progress.
    pub async fn get_status(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        let job = self
            .ledger
            .get(job_id)
            .ok_or(OrchestratorError::NotFound(job_id))?;
        Ok(self.refresh(job).await)
    }

    /// Tracked jobs, most recent first, with workflow jobs refreshed as in
    /// [`Orchestrator::get_status`].
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs = self.ledger.list();
        for job in jobs.iter_mut() {
            *job = self.refresh(job.clone()).await;
        }
        jobs
    }

    async fn refresh(&self, job: Job) -> Job {
        if job.status.is_terminal() || job.execution_ref.is_none() {
            return job;
        }

        let Some(patch) = self
            .gateway
            .load_job(job.id)
            .await
            .as_ref()
            .and_then(JobPatch::from_terminal)
        else {
            return job;
        };

        debug!(job_id = %job.id, "Workflow job settled, refreshing local copy");
        self.ledger.settle(&job, patch).into_job()
    }

    /// Stop tracking a job. Its local poll task is cancelled; the backend job is not.
    pub fn remove(&self, job_id: Uuid) -> Option<Job> {
        let removed = self.ledger.remove(job_id);
        if removed.is_some() {
            info!(job_id = %job_id, "Generation job removed from ledger");
        }
        removed
    }

    /// Run one durable workflow execution to completion through the direct paths.
    ///
    /// The artifact is always uploaded (under its creative, or else under the job
    /// id) so the record the submitting side reads carries its location. Returns `None` when the job's record shows it already settled, e.g. because
    /// the submitting side fell back to a direct run.
    pub async fn execute_workflow(&self, execution: WorkflowExecution) -> Option<Job> {
        let record = self.gateway.load_job(execution.job_id).await;
        if let Some(record) = &record {
            if record.status.is_terminal() {
                info!(
                    job_id = %execution.job_id,
                    status = %record.status,
                    "Skipping workflow execution for settled job"
                );
                return None;
            }
        }

        let request = execution.request;
        let model_id = request
            .explicit_model_id
            .clone()
            .or_else(|| {
                self.adapter
                    .catalog()
                    .default_for(request.media_type)
                    .map(|m| m.id.clone())
            })
            .unwrap_or_default();

        let mut job = Job::new(execution.job_id, request.media_type, model_id);
        job.correlation_id = request.correlation_id.clone();
        job.execution_ref = Some(execution.execution_ref.clone());
        if let Some(record) = &record {
            job.created_at = record.created_at;
        }
        self.ledger.add(job.clone());

        let invocation = match self.adapter.prepare(&request) {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Workflow execution rejected");
                let settled = self
                    .ledger
                    .settle(&job, JobPatch::failed(FailureRecord::validation(e.to_string())));
                self.gateway.job_transitioned(settled.job()).await;
                self.ledger.remove(job.id);
                return Some(settled.into_job());
            }
        };

        let job = self
            .ledger
            .update(job.id, JobPatch::processing())
            .unwrap_or(job);
        self.gateway.job_transitioned(&job).await;

        let finished = self
            .direct
            .dispatch(&job, &invocation, &ArtifactTarget::for_workflow(&request))
            .await
            .finish()
            .await;
        self.ledger.remove(finished.id);
        Some(finished)
    }

    /// Number of jobs still being resolved.
    pub fn in_flight(&self) -> usize {
        self.ledger
            .list()
            .iter()
            .filter(|job| !job.status.is_terminal())
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(#[from] AdapterError),

    #[error("job {0} not found")]
    NotFound(Uuid),
}

impl OrchestratorError {
    /// The failure record a rejected submission corresponds to.
    pub fn failure_record(&self) -> Option<FailureRecord> {
        match self {
            Self::Validation(e) => Some(FailureRecord::validation(e.to_string())),
            Self::NotFound(_) => None,
        }
    }
}

