//! In-memory collaborators for driving the orchestrator without infrastructure.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use creative_orchestrator::{
    services::{
        adapter::InvocationAdapter,
        backend::{AsyncHandle, AsyncState, AsyncStatus, BackendError, GenerativeBackend},
        catalog::{ModelCatalog, TextEnvelope},
        gateway::{Gateway, GatewaySettings},
        orchestrator::Orchestrator,
        poller::PollerSettings,
        queue::{EventBus, MessageQueue, QueueError},
        records::{RecordError, RecordStore},
        storage::{ObjectStore, StorageError},
        workflow::{ExecutionQueue, WorkflowEngine, WorkflowError, WorkflowExecution},
    },
};

pub const IMAGE_MODEL: &str = "amazon.titan-image-generator-v2:0";
pub const VIDEO_MODEL: &str = "amazon.nova-reel-v1:0";
pub const TEXT_MODEL: &str = "anthropic.claude-3-haiku-20240307-v1:0";
pub const OUTPUT_ROOT: &str = "s3://artifacts/video-jobs";
pub const WORKFLOW_REF: &str = "creative-gen";

/// Smallest byte string `image::guess_format` recognizes as PNG.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

pub fn image_response() -> Value {
    json!({ "images": [base64::engine::general_purpose::STANDARD.encode(PNG_BYTES)] })
}

pub fn text_response(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

pub fn in_progress() -> StatusReply {
    StatusReply::Status(AsyncStatus {
        state: AsyncState::InProgress,
        output_location: None,
        failure_message: None,
        submit_time: None,
        end_time: None,
    })
}

pub fn completed_at(output_location: &str) -> StatusReply {
    StatusReply::Status(AsyncStatus {
        state: AsyncState::Completed,
        output_location: Some(output_location.to_string()),
        failure_message: None,
        submit_time: Some(chrono::Utc::now()),
        end_time: Some(chrono::Utc::now()),
    })
}

pub fn failed_with(message: &str) -> StatusReply {
    StatusReply::Status(AsyncStatus {
        state: AsyncState::Failed,
        output_location: None,
        failure_message: Some(message.to_string()),
        submit_time: None,
        end_time: None,
    })
}

/// Scripted answer to one status check.
#[derive(Debug, Clone)]
pub enum StatusReply {
    Status(AsyncStatus),
    /// Transport-level failure of the check itself.
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct StartedJob {
    pub model_id: String,
    pub body: Value,
    pub output_location: String,
    pub handle: String,
}

/// Backend with scripted replies and call accounting.
#[derive(Default)]
pub struct FakeBackend {
    invoke_reply: Mutex<Option<Result<Value, (u16, String)>>>,
    invoke_delay: Mutex<Option<Duration>>,
    start_error: Mutex<Option<(u16, String)>>,
    statuses: Mutex<HashMap<String, VecDeque<StatusReply>>>,
    pub invoke_calls: AtomicUsize,
    pub invoked_bodies: Mutex<Vec<Value>>,
    pub started: Mutex<Vec<StartedJob>>,
    pub status_checks: Mutex<Vec<(String, Instant)>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply_with(&self, body: Value) {
        *self.invoke_reply.lock().unwrap() = Some(Ok(body));
    }

    pub fn reply_status(&self, status: u16, body: &str) {
        *self.invoke_reply.lock().unwrap() = Some(Err((status, body.to_string())));
    }

    pub fn delay_invoke(&self, delay: Duration) {
        *self.invoke_delay.lock().unwrap() = Some(delay);
    }

    pub fn refuse_start(&self, status: u16, body: &str) {
        *self.start_error.lock().unwrap() = Some((status, body.to_string()));
    }

    /// Queue replies for the async job started with `handle`. Once the script
    /// runs out the job reports InProgress.
    pub fn script(&self, handle: &str, replies: Vec<StatusReply>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(handle.to_string(), replies.into());
    }

    pub fn invocations(&self) -> usize {
        self.invoke_calls.load(Ordering::SeqCst)
    }

    pub fn checks_for(&self, handle: &str) -> Vec<Instant> {
        self.status_checks
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == handle)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn last_started(&self) -> Option<StartedJob> {
        self.started.lock().unwrap().last().cloned()
    }

    /// Handle the next `start_async` call will return.
    pub fn next_handle(&self) -> String {
        handle_for(self.started.lock().unwrap().len() + 1)
    }
}

fn handle_for(n: usize) -> String {
    format!("arn:async-invoke/job-{}", n)
}

fn status_error(status: u16, body: String) -> BackendError {
    BackendError::from_status(
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        body,
    )
}

#[async_trait]
impl GenerativeBackend for FakeBackend {
    async fn invoke(&self, _model_id: &str, body: &Value) -> Result<Value, BackendError> {
        self.invoke_calls.fetch_add(1, Ordering::SeqCst);
        self.invoked_bodies.lock().unwrap().push(body.clone());

        let delay = *self.invoke_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.invoke_reply.lock().unwrap().clone();
        match reply {
            Some(Ok(body)) => Ok(body),
            Some(Err((status, body))) => Err(status_error(status, body)),
            None => Err(status_error(500, "no reply scripted".to_string())),
        }
    }

    async fn start_async(
        &self,
        model_id: &str,
        body: &Value,
        output_location: &str,
    ) -> Result<AsyncHandle, BackendError> {
        let refused = self.start_error.lock().unwrap().clone();
        if let Some((status, body)) = refused {
            return Err(status_error(status, body));
        }

        let mut started = self.started.lock().unwrap();
        let handle = handle_for(started.len() + 1);
        started.push(StartedJob {
            model_id: model_id.to_string(),
            body: body.clone(),
            output_location: output_location.to_string(),
            handle: handle.clone(),
        });
        Ok(AsyncHandle { handle })
    }

    async fn get_async_status(&self, handle: &str) -> Result<AsyncStatus, BackendError> {
        self.status_checks
            .lock()
            .unwrap()
            .push((handle.to_string(), Instant::now()));

        let reply = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(handle)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(in_progress);
        match reply {
            StatusReply::Status(status) => Ok(status),
            StatusReply::Unreachable => Err(status_error(503, "status endpoint unavailable".to_string())),
        }
    }
}

/// Object store over a map of `s3://bucket/key` locations. `fail` makes
/// uploads fail; fetches still work.
#[derive(Default)]
pub struct FakeObjectStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fail: AtomicBool,
}

impl FakeObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, location: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(location.to_string(), data.to_vec());
    }

    pub fn get(&self, location: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(location).cloned()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn fetch_object(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        self.get(location)
            .ok_or_else(|| StorageError::NotFound(location.to_string()))
    }

    async fn put_object(&self, key: &str, data: &[u8], _content_type: &str) -> Result<String, StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Config("object store offline".to_string()));
        }
        let location = format!("s3://artifacts/{}", key);
        self.insert(&location, data);
        Ok(location)
    }
}

/// Record store over a map, with a switch to make every call fail.
#[derive(Default)]
pub struct FakeRecordStore {
    records: Mutex<HashMap<(String, String), Value>>,
    pub fail: AtomicBool,
}

impl FakeRecordStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, table: &str, key: &str) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(&(table.to_string(), key.to_string()))
            .cloned()
    }

    pub fn count(&self, table: &str) -> usize {
        self.records
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| t == table)
            .count()
    }

    fn check(&self) -> Result<(), RecordError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RecordError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn put_item(&self, table: &str, key: &str, fields: &Value) -> Result<(), RecordError> {
        self.check()?;
        self.records
            .lock()
            .unwrap()
            .insert((table.to_string(), key.to_string()), fields.clone());
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &str) -> Result<Option<Value>, RecordError> {
        self.check()?;
        Ok(self.record(table, key))
    }

    async fn update_item(&self, table: &str, key: &str, fields: &Value) -> Result<(), RecordError> {
        self.check()?;
        let Some(update) = fields.as_object() else {
            return Err(RecordError::NotAnObject);
        };
        let mut records = self.records.lock().unwrap();
        let entry = records
            .entry((table.to_string(), key.to_string()))
            .or_insert_with(|| json!({}));
        if let Some(existing) = entry.as_object_mut() {
            for (k, v) in update {
                existing.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }
}

/// Queue and event bus in one, recording everything sent.
#[derive(Default)]
pub struct FakeBus {
    pub messages: Mutex<Vec<(String, Value)>>,
    pub events: Mutex<Vec<(String, Value)>>,
    pub fail: AtomicBool,
}

impl FakeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Detail types published for one job, in order.
    pub fn event_types_for(&self, job_id: uuid::Uuid) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, detail)| detail["job_id"] == json!(job_id))
            .map(|(detail_type, _)| detail_type.clone())
            .collect()
    }

    pub fn messages_for(&self, job_id: uuid::Uuid) -> Vec<Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, payload)| payload["job_id"] == json!(job_id))
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

fn offline(what: &'static str) -> QueueError {
    QueueError::Redis(redis::RedisError::from((redis::ErrorKind::IoError, what)))
}

#[async_trait]
impl MessageQueue for FakeBus {
    async fn enqueue_message(&self, queue: &str, payload: &Value) -> Result<(), QueueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(offline("queue offline"));
        }
        self.messages
            .lock()
            .unwrap()
            .push((queue.to_string(), payload.clone()));
        Ok(())
    }
}

#[async_trait]
impl EventBus for FakeBus {
    async fn publish_event(
        &self,
        _bus: &str,
        _source: &str,
        detail_type: &str,
        payload: &Value,
    ) -> Result<(), QueueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(offline("bus offline"));
        }
        self.events
            .lock()
            .unwrap()
            .push((detail_type.to_string(), payload.clone()));
        Ok(())
    }
}

/// Workflow engine that records starts; idempotent per key like the Redis engine.
/// Started executions are dequeued in start order.
#[derive(Default)]
pub struct FakeWorkflow {
    pub started: Mutex<Vec<WorkflowExecution>>,
    pub completed: Mutex<Vec<String>>,
    keys: Mutex<HashMap<String, String>>,
    pub start_attempts: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeWorkflow {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<WorkflowExecution> {
        std::mem::take(&mut *self.started.lock().unwrap())
    }
}

#[async_trait]
impl WorkflowEngine for FakeWorkflow {
    async fn start_execution(
        &self,
        workflow_ref: &str,
        input: &WorkflowExecution,
        idempotency_key: &str,
    ) -> Result<String, WorkflowError> {
        self.start_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(WorkflowError::Rejected("state machine unavailable".to_string()));
        }

        let mut keys = self.keys.lock().unwrap();
        if let Some(existing) = keys.get(idempotency_key) {
            return Ok(existing.clone());
        }
        let execution_ref = format!("{}:exec-{}", workflow_ref, keys.len() + 1);
        keys.insert(idempotency_key.to_string(), execution_ref.clone());
        self.started.lock().unwrap().push(WorkflowExecution {
            execution_ref: execution_ref.clone(),
            ..input.clone()
        });
        Ok(execution_ref)
    }
}

#[async_trait]
impl ExecutionQueue for FakeWorkflow {
    async fn dequeue(&self, _workflow_ref: &str) -> Result<Option<(WorkflowExecution, String)>, WorkflowError> {
        let mut started = self.started.lock().unwrap();
        if started.is_empty() {
            return Ok(None);
        }
        let execution = started.remove(0);
        let raw = serde_json::to_string(&execution)?;
        Ok(Some((execution, raw)))
    }

    async fn complete(&self, _workflow_ref: &str, raw_payload: &str) -> Result<(), WorkflowError> {
        self.completed.lock().unwrap().push(raw_payload.to_string());
        Ok(())
    }
}

/// One orchestrator wired to fakes. Harnesses built with [`Harness::sharing`]
/// see the same records, objects and bus, like a server and its worker.
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub objects: Arc<FakeObjectStore>,
    pub records: Arc<FakeRecordStore>,
    pub bus: Arc<FakeBus>,
    pub workflow: Arc<FakeWorkflow>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn settings() -> PollerSettings {
    PollerSettings::new(Duration::from_secs(10), Duration::from_secs(10), 30)
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(poller: PollerSettings) -> Self {
        Self::build(
            FakeBackend::new(),
            FakeObjectStore::new(),
            FakeRecordStore::new(),
            FakeBus::new(),
            FakeWorkflow::new(),
            poller,
            false,
        )
    }

    /// Orchestrator that prefers the workflow engine.
    pub fn with_workflow() -> Self {
        Self::build(
            FakeBackend::new(),
            FakeObjectStore::new(),
            FakeRecordStore::new(),
            FakeBus::new(),
            FakeWorkflow::new(),
            settings(),
            true,
        )
    }

    /// A direct-only orchestrator over the same stores and backend.
    pub fn sharing(&self) -> Self {
        Self::build(
            Arc::clone(&self.backend),
            Arc::clone(&self.objects),
            Arc::clone(&self.records),
            Arc::clone(&self.bus),
            Arc::clone(&self.workflow),
            settings(),
            false,
        )
    }

    fn build(
        backend: Arc<FakeBackend>,
        objects: Arc<FakeObjectStore>,
        records: Arc<FakeRecordStore>,
        bus: Arc<FakeBus>,
        workflow: Arc<FakeWorkflow>,
        poller: PollerSettings,
        use_workflow: bool,
    ) -> Self {
        let gateway = Gateway::new(
            records.clone(),
            bus.clone(),
            bus.clone(),
            objects.clone(),
            GatewaySettings::default(),
        );
        let catalog = ModelCatalog::new(IMAGE_MODEL, VIDEO_MODEL, TEXT_MODEL, TextEnvelope::Messages);
        let mut orchestrator = Orchestrator::new(
            InvocationAdapter::new(catalog),
            backend.clone(),
            Arc::new(gateway),
            poller,
            OUTPUT_ROOT,
        );
        if use_workflow {
            orchestrator = orchestrator.with_workflow(workflow.clone(), WORKFLOW_REF);
        }

        Self {
            backend,
            objects,
            records,
            bus,
            workflow,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn job_record(&self, job_id: uuid::Uuid) -> Option<Value> {
        self.records
            .record(&GatewaySettings::default().jobs_table, &job_id.to_string())
    }
}
