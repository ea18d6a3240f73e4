use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use magpie_core::{EventFilter, EventRecord, ProxyStatus, SanitizedConfig};

use crate::metrics::encode_metrics;
use crate::state::AppState;

/// Hard cap on event/history queries.
const MAX_LIMIT: i64 = 1000;
const DEFAULT_LIMIT: i64 = 100;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

#[derive(Serialize)]
pub struct SourceResponse {
    pub name: String,
    pub rate_per_sec: Option<f32>,
    /// Tokens currently available, when the source has been used.
    pub tokens_available: Option<f32>,
    pub throttled: bool,
}

pub async fn list_sources(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<SourceResponse>> {
    let mut sources = Vec::new();
    for source in &state.config().sources {
        let status = state.engine().rate_status(&source.name).await;
        sources.push(SourceResponse {
            name: source.name.clone(),
            rate_per_sec: source.rate_per_sec,
            tokens_available: status.as_ref().map(|s| s.tokens_available),
            throttled: status.map(|s| s.throttled).unwrap_or(false),
        });
    }
    Json(sources)
}

pub async fn list_proxies(State(state): State<Arc<AppState>>) -> Json<Vec<ProxyStatus>> {
    Json(state.proxy_pool().status().await)
}

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub job_id: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub async fn query_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Vec<EventRecord>>, (StatusCode, Json<ErrorResponse>)> {
    let mut filter =
        EventFilter::new().with_limit(params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT));
    if let Some(job_id) = params.job_id {
        filter = filter.with_job_id(job_id);
    }
    if let Some(event_type) = params.event_type {
        filter = filter.with_event_type(event_type);
    }

    state.event_store().query(&filter).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })
}

#[derive(Debug, Deserialize)]
pub struct DownloadsParams {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct DownloadResponse {
    pub source: String,
    pub remote_id: String,
    pub path: String,
    pub bytes: u64,
    pub downloaded_at: String,
}

pub async fn recent_downloads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DownloadsParams>,
) -> Result<Json<Vec<DownloadResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    state
        .history()
        .recent(limit)
        .map(|entries| {
            Json(
                entries
                    .into_iter()
                    .map(|e| DownloadResponse {
                        source: e.source,
                        remote_id: e.remote_id,
                        path: e.path,
                        bytes: e.bytes,
                        downloaded_at: e.downloaded_at.to_rfc3339(),
                    })
                    .collect(),
            )
        })
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })
}

pub async fn metrics() -> String {
    encode_metrics()
}
