//! Job API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use magpie_core::{EngineError, JobQuery, JobSpec, ProgressSnapshot};

use crate::state::AppState;

/// Request body for submitting a job
#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    /// Source name, must be configured.
    pub source: String,
    /// Tag query; mutually exclusive with `urls`.
    pub tags: Option<Vec<String>>,
    /// Direct item URLs; mutually exclusive with `tags`.
    pub urls: Option<Vec<String>>,
    /// Output root override.
    pub dest_dir: Option<PathBuf>,
    /// Extra blacklist tags for this job.
    #[serde(default)]
    pub blacklist_tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
}

type JobError = (StatusCode, Json<JobErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> JobError {
    (
        status,
        Json(JobErrorResponse {
            error: message.into(),
        }),
    )
}

fn engine_error(e: EngineError) -> JobError {
    let status = match &e {
        EngineError::UnknownSource(_) => StatusCode::BAD_REQUEST,
        EngineError::JobNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::DestinationUnusable(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    error(status, e.to_string())
}

/// Submit a new job
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitJobBody>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), JobError> {
    let query = match (body.tags, body.urls) {
        (Some(tags), None) if !tags.is_empty() => JobQuery::Tags(tags),
        (None, Some(urls)) if !urls.is_empty() => JobQuery::Urls(urls),
        _ => {
            return Err(error(
                StatusCode::BAD_REQUEST,
                "exactly one of 'tags' or 'urls' must be provided and non-empty",
            ))
        }
    };

    let spec = JobSpec {
        source: body.source,
        query,
        dest_dir: body.dest_dir,
        extra_blacklist_tags: body.blacklist_tags,
    };

    let job_id = state.engine().submit(spec).await.map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(SubmitJobResponse { job_id })))
}

/// List progress of all known jobs (live and drained)
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<ProgressSnapshot>> {
    Json(state.engine().all_snapshots().await)
}

/// Snapshot of one job
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProgressSnapshot>, JobError> {
    state
        .engine()
        .snapshot(&id)
        .await
        .map(Json)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("Job not found: {}", id)))
}

/// Cancel a job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, JobError> {
    state
        .engine()
        .cancel(&id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(engine_error)
}
