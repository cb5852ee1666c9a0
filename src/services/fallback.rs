use std::sync::Arc;

use tracing::{info, warn};

use crate::models::generation::GenerationRequest;
use crate::models::job::{Job, JobPatch};
use crate::services::adapter::PreparedInvocation;
use crate::services::dispatch::{DirectDispatcher, Dispatched};
use crate::services::gateway::{ArtifactTarget, Gateway};
use crate::services::ledger::Ledger;
use crate::services::workflow::{WorkflowEngine, WorkflowExecution};

/// Prefers the durable workflow engine and falls back to the direct paths.
///
/// The workflow start is keyed by job id, so a retried start never launches a
/// second execution. A start error is logged and masked by the direct outcome.
pub struct FallbackController {
    engine: Arc<dyn WorkflowEngine>,
    workflow_ref: String,
    ledger: Arc<Ledger>,
    gateway: Arc<Gateway>,
    direct: Arc<DirectDispatcher>,
}

impl FallbackController {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        workflow_ref: impl Into<String>,
        ledger: Arc<Ledger>,
        gateway: Arc<Gateway>,
        direct: Arc<DirectDispatcher>,
    ) -> Self {
        Self {
            engine,
            workflow_ref: workflow_ref.into(),
            ledger,
            gateway,
            direct,
        }
    }

    pub fn workflow_ref(&self) -> &str {
        &self.workflow_ref
    }

    pub async fn submit(
        &self,
        job: &Job,
        request: &GenerationRequest,
        invocation: &PreparedInvocation,
    ) -> Dispatched {
        let execution = WorkflowExecution {
            execution_ref: String::new(),
            job_id: job.id,
            request: request.clone(),
        };

        match self
            .engine
            .start_execution(&self.workflow_ref, &execution, &job.id.to_string())
            .await
        {
            Ok(execution_ref) => {
                info!(
                    job_id = %job.id,
                    execution_ref = %execution_ref,
                    "Job submitted to workflow engine"
                );
                let settled = self.ledger.settle(job, JobPatch::workflow(execution_ref));
                if settled.is_transition() {
                    self.gateway.job_transitioned(settled.job()).await;
                }
                Dispatched::settled(settled.into_job())
            }
            Err(e) => {
                metrics::counter!("generation_workflow_fallbacks_total").increment(1);
                warn!(
                    job_id = %job.id,
                    workflow_ref = %self.workflow_ref,
                    error = %e,
                    "Workflow submission failed, running direct path"
                );
                self.direct
                    .dispatch(job, invocation, &ArtifactTarget::for_request(request))
                    .await
            }
        }
    }
}
