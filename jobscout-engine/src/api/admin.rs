//! Admin endpoints: pipeline triggers, discovery, scheduler, analytics

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::pipeline::FullPipelineFlags;
use crate::types::AtsType;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/analytics", get(analytics))
        .route("/pipeline/status", get(pipeline_status))
        .route("/pipeline/run", post(run_pipeline))
        .route("/pipeline/crawl", post(run_crawl))
        .route("/pipeline/enrich", post(run_enrich))
        .route("/pipeline/embeddings", post(run_embeddings))
        .route("/maintenance/run", post(run_maintenance))
        .route("/discovery/run", post(run_discovery))
        .route("/discovery/process-queue", post(process_queue))
        .route("/scheduler/start", post(scheduler_start))
        .route("/scheduler/stop", post(scheduler_stop))
}

fn map_launch_error(error: jobscout_common::Error) -> ApiError {
    match error {
        jobscout_common::Error::Conflict(msg) => ApiError::Conflict(msg),
        other => ApiError::Internal(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    30
}

/// GET /api/admin/analytics?days=
async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if !(1..=365).contains(&query.days) {
        return Err(ApiError::BadRequest("days must be in 1..=365".into()));
    }
    let report = state.pipeline.analytics(query.days).await?;
    Ok(Json(report))
}

/// GET /api/admin/pipeline/status
async fn pipeline_status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let mut status = state.pipeline.status().await?;
    status["scheduler"] = state.scheduler.status();
    Ok(Json(status))
}

/// POST /api/admin/pipeline/run
async fn run_pipeline(
    State(state): State<AppState>,
    flags: Option<Json<FullPipelineFlags>>,
) -> ApiResult<Json<serde_json::Value>> {
    let flags = flags.map(|Json(flags)| flags).unwrap_or_default();
    let run_id = Arc::clone(&state.pipeline)
        .start_full_pipeline(flags)
        .await
        .map_err(map_launch_error)?;
    Ok(Json(json!({"status": "started", "run_id": run_id})))
}

#[derive(Debug, Deserialize)]
struct CrawlParams {
    ats_type: Option<String>,
}

/// POST /api/admin/pipeline/crawl
async fn run_crawl(
    State(state): State<AppState>,
    params: Option<Json<CrawlParams>>,
) -> ApiResult<Json<serde_json::Value>> {
    let ats_type = match params.and_then(|Json(p)| p.ats_type) {
        Some(raw) => Some(
            raw.parse::<AtsType>()
                .map_err(|_| ApiError::BadRequest(format!("unknown ats_type: {raw}")))?,
        ),
        None => None,
    };

    let run_id = Arc::clone(&state.pipeline)
        .start_crawl(ats_type)
        .await
        .map_err(map_launch_error)?;
    Ok(Json(json!({"status": "started", "run_id": run_id})))
}

/// POST /api/admin/pipeline/enrich
async fn run_enrich(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let run_id = Arc::clone(&state.pipeline)
        .start_enrichment()
        .await
        .map_err(map_launch_error)?;
    Ok(Json(json!({"status": "started", "run_id": run_id})))
}

/// POST /api/admin/pipeline/embeddings
async fn run_embeddings(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let run_id = Arc::clone(&state.pipeline)
        .start_embeddings()
        .await
        .map_err(map_launch_error)?;
    Ok(Json(json!({"status": "started", "run_id": run_id})))
}

/// POST /api/admin/maintenance/run
async fn run_maintenance(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let run_id = Arc::clone(&state.pipeline)
        .start_maintenance()
        .await
        .map_err(map_launch_error)?;
    Ok(Json(json!({"status": "started", "run_id": run_id})))
}

#[derive(Debug, Deserialize)]
struct DiscoveryParams {
    source_names: Option<Vec<String>>,
}

/// POST /api/admin/discovery/run
async fn run_discovery(
    State(state): State<AppState>,
    params: Option<Json<DiscoveryParams>>,
) -> ApiResult<Json<serde_json::Value>> {
    let source_names = params.and_then(|Json(p)| p.source_names);

    if let Some(names) = &source_names {
        let known = state.pipeline.source_names();
        for name in names {
            if !known.contains(&name.as_str()) {
                return Err(ApiError::BadRequest(format!(
                    "unknown discovery source: {name}"
                )));
            }
        }
    }

    let run_id = Arc::clone(&state.pipeline)
        .start_discovery(source_names)
        .await
        .map_err(map_launch_error)?;
    Ok(Json(json!({"status": "started", "run_id": run_id})))
}

#[derive(Debug, Deserialize)]
struct ProcessQueueQuery {
    #[serde(default = "default_queue_limit")]
    limit: i64,
}

fn default_queue_limit() -> i64 {
    100
}

/// POST /api/admin/discovery/process-queue?limit=
async fn process_queue(
    State(state): State<AppState>,
    Query(query): Query<ProcessQueueQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if query.limit < 1 {
        return Err(ApiError::BadRequest("limit must be >= 1".into()));
    }
    let stats = state.pipeline.process_discovery_queue(query.limit).await?;
    Ok(Json(serde_json::to_value(stats).map_err(|e| ApiError::Internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
struct SchedulerStartQuery {
    interval_hours: Option<i64>,
}

/// POST /api/admin/scheduler/start?interval_hours=
async fn scheduler_start(
    State(state): State<AppState>,
    Query(query): Query<SchedulerStartQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(hours) = query.interval_hours {
        if !(1..=168).contains(&hours) {
            return Err(ApiError::BadRequest(
                "interval_hours must be in 1..=168".into(),
            ));
        }
    }
    state.scheduler.start(query.interval_hours);
    Ok(Json(state.scheduler.status()))
}

/// POST /api/admin/scheduler/stop
async fn scheduler_stop(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.scheduler.stop();
    Ok(Json(state.scheduler.status()))
}
