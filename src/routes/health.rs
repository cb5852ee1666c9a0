use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
    pub jobs: JobCounts,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct JobCounts {
    pub tracked: usize,
    pub in_flight: usize,
    pub active_polls: usize,
}

impl ComponentHealth {
    fn ok(start: std::time::Instant) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn error() -> Self {
        Self {
            status: "error".to_string(),
            latency_ms: None,
        }
    }
}

/// GET /health: dependency status plus ledger counts.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();
    let db_check = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ComponentHealth::ok(start),
        Err(_) => ComponentHealth::error(),
    };

    let redis_start = std::time::Instant::now();
    let redis_check = match state.bus.health_check().await {
        Ok(_) => ComponentHealth::ok(redis_start),
        Err(_) => ComponentHealth::error(),
    };

    if let Ok(depth) = state.bus.queue_depth(&state.notification_queue).await {
        metrics::gauge!("notification_queue_depth").set(depth as f64);
    }

    let orchestrator = &state.orchestrator;
    let jobs = JobCounts {
        tracked: orchestrator.ledger().len(),
        in_flight: orchestrator.in_flight(),
        active_polls: orchestrator.ledger().active_polls(),
    };

    let all_healthy = db_check.status == "ok" && redis_check.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database: db_check,
            redis: redis_check,
        },
        jobs,
    };

    (status_code, Json(response))
}
