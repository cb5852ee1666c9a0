mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{
    adapter::InvocationAdapter,
    backend::HttpBackend,
    gateway::Gateway,
    orchestrator::Orchestrator,
    queue::RedisBus,
    records::PgRecordStore,
    storage::S3ObjectStore,
    workflow::RedisWorkflowEngine,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing creative-orchestrator server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("generation_jobs_total", "Total generation jobs submitted");
    metrics::describe_counter!("generation_jobs_completed", "Total generation jobs completed");
    metrics::describe_counter!("generation_jobs_failed", "Total generation jobs that failed");
    metrics::describe_counter!("generation_poll_attempts_total", "Async status checks issued");
    metrics::describe_counter!(
        "generation_workflow_fallbacks_total",
        "Workflow starts that failed and ran the direct path instead"
    );
    metrics::describe_counter!(
        "gateway_failures_total",
        "Persistence or notification writes that failed"
    );
    metrics::describe_histogram!(
        "generation_backend_seconds",
        "Time spent in synchronous model invocations"
    );
    metrics::describe_gauge!(
        "notification_queue_depth",
        "Current number of messages in the notification queue"
    );

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing artifact storage client");
    let objects = S3ObjectStore::new(
        &config.artifact_bucket,
        &config.s3_region,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize S3 client");

    tracing::info!("Connecting to Redis");
    let bus = Arc::new(RedisBus::new(&config.redis_url).expect("Failed to initialize Redis bus"));

    tracing::info!("Initializing model runtime client");
    let backend = HttpBackend::new(&config.backend_url, &config.backend_api_token)
        .expect("Failed to initialize model runtime client");

    let gateway = Gateway::new(
        Arc::new(PgRecordStore::new(db_pool.clone())),
        bus.clone(),
        bus.clone(),
        Arc::new(objects),
        config.gateway_settings(),
    );

    let mut orchestrator = Orchestrator::new(
        InvocationAdapter::new(config.model_catalog()),
        Arc::new(backend),
        Arc::new(gateway),
        config.poller_settings(),
        &config.video_output_root(),
    );
    if let Some(workflow_ref) = &config.workflow_ref {
        tracing::info!(workflow_ref = %workflow_ref, "Durable workflow enabled");
        let engine = RedisWorkflowEngine::new(&config.redis_url)
            .expect("Failed to initialize workflow engine");
        orchestrator = orchestrator.with_workflow(Arc::new(engine), workflow_ref);
    }

    let state = AppState::new(db_pool, bus, orchestrator, &config.notification_queue);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/generations",
            get(routes::generations::list_generations).post(routes::generations::submit_generation),
        )
        .route(
            "/api/v1/generations/{job_id}",
            get(routes::generations::get_generation).delete(routes::generations::remove_generation),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
