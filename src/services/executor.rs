//! Concurrent runner for durable workflow executions.
//!
//! Each dequeued execution runs on its own task, so a video that polls for
//! minutes never holds up the image and text executions queued behind it.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::models::job::Job;
use crate::services::orchestrator::Orchestrator;
use crate::services::workflow::{ExecutionQueue, WorkflowError};

pub struct ExecutionRunner {
    queue: Arc<dyn ExecutionQueue>,
    orchestrator: Arc<Orchestrator>,
    workflow_ref: String,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ExecutionRunner {
    pub fn new(
        queue: Arc<dyn ExecutionQueue>,
        orchestrator: Arc<Orchestrator>,
        workflow_ref: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            queue,
            orchestrator,
            workflow_ref: workflow_ref.into(),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Dequeue the next execution and start it on its own task.
    ///
    /// Waits for a free slot first. Returns `None` when nothing was queued. The
    /// task marks the execution complete once the job has settled.
    pub async fn run_next(&self) -> Result<Option<JoinHandle<Option<Job>>>, WorkflowError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| WorkflowError::Closed)?;

        let Some((execution, raw)) = self.queue.dequeue(&self.workflow_ref).await? else {
            return Ok(None);
        };

        let job_id = execution.job_id;
        info!(
            job_id = %job_id,
            execution_ref = %execution.execution_ref,
            media_type = %execution.request.media_type,
            "Running workflow execution"
        );

        let queue = Arc::clone(&self.queue);
        let orchestrator = Arc::clone(&self.orchestrator);
        let workflow_ref = self.workflow_ref.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            let finished = orchestrator.execute_workflow(execution).await;
            match &finished {
                Some(job) => info!(job_id = %job_id, status = %job.status, "Workflow execution finished"),
                None => debug!(job_id = %job_id, "Workflow execution skipped"),
            }

            if let Err(e) = queue.complete(&workflow_ref, &raw).await {
                error!(job_id = %job_id, error = %e, "Failed to mark workflow execution complete");
            }
            finished
        });
        Ok(Some(task))
    }

    /// Executions currently running.
    pub fn running(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }
}
