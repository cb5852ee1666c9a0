use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::failure::FailureKind;
use crate::models::generation::{ErrorResponse, JobStatusResponse, SubmitGenerationRequest};
use crate::models::job::JobStatus;
use crate::services::orchestrator::OrchestratorError;

/// Errors surfaced by the generation endpoints.
#[derive(Debug)]
pub enum ApiError {
    Invalid(String),
    Orchestrator(OrchestratorError),
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self::Orchestrator(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Invalid(error) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error,
                    kind: FailureKind::ValidationError.to_string(),
                },
            ),
            Self::Orchestrator(e @ OrchestratorError::NotFound(_)) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: e.to_string(),
                    kind: "not_found".to_string(),
                },
            ),
            Self::Orchestrator(e) => {
                let kind = e
                    .failure_record()
                    .map(|f| f.kind)
                    .unwrap_or(FailureKind::ValidationError);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorResponse {
                        error: e.to_string(),
                        kind: kind.to_string(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// POST /api/v1/generations: Submit a generation request.
///
/// Image and text requests are resolved before responding (200); video requests
/// answer 202 with the Processing job and keep polling in the background.
pub async fn submit_generation(
    State(state): State<AppState>,
    Json(body): Json<SubmitGenerationRequest>,
) -> Result<(StatusCode, Json<JobStatusResponse>), ApiError> {
    body.validate()
        .map_err(|e| ApiError::Invalid(e.to_string()))?;

    let job = state.orchestrator.submit(body.into()).await?;
    let status = match job.status {
        JobStatus::Pending | JobStatus::Processing => StatusCode::ACCEPTED,
        JobStatus::Completed | JobStatus::Failed => StatusCode::OK,
    };
    Ok((status, Json(job.into())))
}

/// GET /api/v1/generations: Tracked jobs, most recent first.
pub async fn list_generations(State(state): State<AppState>) -> Json<Vec<JobStatusResponse>> {
    Json(
        state
            .orchestrator
            .list()
            .await
            .into_iter()
            .map(JobStatusResponse::from)
            .collect(),
    )
}

/// GET /api/v1/generations/{job_id}: Check generation job status.
pub async fn get_generation(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.orchestrator.get_status(job_id).await?;
    Ok(Json(job.into()))
}

/// DELETE /api/v1/generations/{job_id}: Stop tracking a job.
pub async fn remove_generation(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> StatusCode {
    match state.orchestrator.remove(job_id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}
