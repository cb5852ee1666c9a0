use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::generation::GenerationRequest;

/// How long an idempotency key outlives its execution (24 hours).
const IDEMPOTENCY_TTL_SECS: u64 = 24 * 60 * 60;

/// Durable workflow engine preferred over direct execution.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start an execution. Repeated calls with the same key return the first
    /// execution's reference instead of starting another.
    async fn start_execution(
        &self,
        workflow_ref: &str,
        input: &WorkflowExecution,
        idempotency_key: &str,
    ) -> Result<String, WorkflowError>;
}

/// Source of queued executions for the workflow worker.
#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    /// Take the next execution, with the raw payload to hand back to `complete`.
    async fn dequeue(&self, workflow_ref: &str) -> Result<Option<(WorkflowExecution, String)>, WorkflowError>;

    /// Mark an execution as finished.
    async fn complete(&self, workflow_ref: &str, raw_payload: &str) -> Result<(), WorkflowError>;
}

/// Input of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecution {
    #[serde(default)]
    pub execution_ref: String,
    pub job_id: Uuid,
    pub request: GenerationRequest,
}

/// Workflow engine on Redis lists, consumed by the `workflow-worker` binary.
pub struct RedisWorkflowEngine {
    client: redis::Client,
}

fn executions_key(workflow_ref: &str) -> String {
    format!("{}:executions", workflow_ref)
}

fn processing_key(workflow_ref: &str) -> String {
    format!("{}:processing", workflow_ref)
}

fn idempotency_key_for(workflow_ref: &str, key: &str) -> String {
    format!("{}:idempotency:{}", workflow_ref, key)
}

impl RedisWorkflowEngine {
    pub fn new(redis_url: &str) -> Result<Self, WorkflowError> {
        let client = redis::Client::open(redis_url).map_err(WorkflowError::Redis)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WorkflowEngine for RedisWorkflowEngine {
    async fn start_execution(
        &self,
        workflow_ref: &str,
        input: &WorkflowExecution,
        idempotency_key: &str,
    ) -> Result<String, WorkflowError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(WorkflowError::Redis)?;
        let guard_key = idempotency_key_for(workflow_ref, idempotency_key);
        let execution_ref = format!("{}:{}", workflow_ref, Uuid::new_v4());

        let claimed: bool = redis::cmd("SET")
            .arg(&guard_key)
            .arg(&execution_ref)
            .arg("NX")
            .arg("EX")
            .arg(IDEMPOTENCY_TTL_SECS)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(WorkflowError::Redis)?
            .is_some();

        if !claimed {
            let existing: Option<String> = conn.get(&guard_key).await.map_err(WorkflowError::Redis)?;
            return existing.ok_or_else(|| {
                WorkflowError::Rejected(format!("idempotency key {} expired mid-start", idempotency_key))
            });
        }

        let execution = WorkflowExecution {
            execution_ref: execution_ref.clone(),
            ..input.clone()
        };
        let payload = serde_json::to_string(&execution).map_err(WorkflowError::Serialize)?;

        if let Err(e) = conn
            .lpush::<_, _, ()>(executions_key(workflow_ref), &payload)
            .await
        {
            // Release the key; nothing was enqueued under it.
            let _: Result<(), _> = conn.del(&guard_key).await;
            return Err(WorkflowError::Redis(e));
        }

        Ok(execution_ref)
    }
}

#[async_trait]
impl ExecutionQueue for RedisWorkflowEngine {
    /// Dequeue an execution for processing (moved to the processing list).
    async fn dequeue(&self, workflow_ref: &str) -> Result<Option<(WorkflowExecution, String)>, WorkflowError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(WorkflowError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(executions_key(workflow_ref), processing_key(workflow_ref))
            .await
            .map_err(WorkflowError::Redis)?;

        match result {
            Some(payload) => {
                let execution: WorkflowExecution =
                    serde_json::from_str(&payload).map_err(WorkflowError::Serialize)?;
                Ok(Some((execution, payload)))
            }
            None => Ok(None),
        }
    }

    /// Remove a finished execution from the processing list.
    async fn complete(&self, workflow_ref: &str, raw_payload: &str) -> Result<(), WorkflowError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(WorkflowError::Redis)?;
        conn.lrem::<_, _, ()>(processing_key(workflow_ref), 1, raw_payload)
            .await
            .map_err(WorkflowError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Workflow start rejected: {0}")]
    Rejected(String),

    #[error("Execution runner is shut down")]
    Closed,
}
