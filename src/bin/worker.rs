use creative_orchestrator::{
    config::AppConfig,
    db,
    services::{
        adapter::InvocationAdapter,
        backend::HttpBackend,
        executor::ExecutionRunner,
        gateway::Gateway,
        orchestrator::Orchestrator,
        queue::RedisBus,
        records::PgRecordStore,
        storage::S3ObjectStore,
        workflow::RedisWorkflowEngine,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting workflow worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let workflow_ref = config
        .workflow_ref
        .clone()
        .expect("WORKFLOW_REF must be set for the workflow worker");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let objects = S3ObjectStore::new(
        &config.artifact_bucket,
        &config.s3_region,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize S3 client");

    let bus = Arc::new(RedisBus::new(&config.redis_url).expect("Failed to initialize Redis bus"));
    let engine =
        RedisWorkflowEngine::new(&config.redis_url).expect("Failed to initialize workflow engine");
    let backend = HttpBackend::new(&config.backend_url, &config.backend_api_token)
        .expect("Failed to initialize model runtime client");

    let gateway = Gateway::new(
        Arc::new(PgRecordStore::new(db_pool)),
        bus.clone(),
        bus,
        Arc::new(objects),
        config.gateway_settings(),
    );

    // Executions always run through the direct paths here.
    let orchestrator = Orchestrator::new(
        InvocationAdapter::new(config.model_catalog()),
        Arc::new(backend),
        Arc::new(gateway),
        config.poller_settings(),
        &config.video_output_root(),
    );
    let runner = ExecutionRunner::new(
        Arc::new(engine),
        Arc::new(orchestrator),
        workflow_ref.as_str(),
        config.worker_concurrency,
    );

    tracing::info!(
        workflow_ref = %workflow_ref,
        concurrency = config.worker_concurrency,
        "Worker ready, starting execution loop"
    );

    loop {
        match runner.run_next().await {
            Ok(Some(_)) => {
                tracing::debug!(running = runner.running(), "Execution started, checking for next one");
            }
            Ok(None) => {
                tracing::trace!("No executions available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error dequeuing execution, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}
