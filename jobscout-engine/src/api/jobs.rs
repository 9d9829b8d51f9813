//! Public job catalog endpoints

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::db::{companies, jobs, matches};
use crate::error::{ApiError, ApiResult};
use crate::types::{LocationType, RoleFamily, Seniority};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:id", get(get_job))
        .route("/:id/click", post(track_click))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_page_size")]
    page_size: i64,
    role_family: Option<String>,
    seniority: Option<String>,
    location_type: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct CompanyPayload {
    pub id: Uuid,
    pub name: String,
    pub domain: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobPayload {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub source_url: String,
    pub role_family: RoleFamily,
    pub role_specialization: Option<String>,
    pub seniority: Option<Seniority>,
    pub location_type: Option<LocationType>,
    pub locations: Vec<String>,
    pub skills: Vec<String>,
    pub min_salary: Option<i64>,
    pub max_salary: Option<i64>,
    pub employment_type: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub freshness_score: Option<f64>,
    pub is_active: bool,
    pub company: Option<CompanyPayload>,
}

impl JobPayload {
    pub fn from_job(job: jobs::Job, company: Option<companies::Company>) -> Self {
        Self {
            id: job.id,
            title: job.title,
            description: job.description,
            source_url: job.source_url,
            role_family: job.role_family,
            role_specialization: job.role_specialization,
            seniority: job.seniority,
            location_type: job.location_type,
            locations: job.locations,
            skills: job.skills,
            min_salary: job.min_salary,
            max_salary: job.max_salary,
            employment_type: job.employment_type.map(|e| e.as_str().to_string()),
            posted_at: job.posted_at,
            freshness_score: job.freshness_score,
            is_active: job.is_active,
            company: company.map(|c| CompanyPayload {
                id: c.id,
                name: c.name,
                domain: c.domain,
            }),
        }
    }
}

fn parse_filter<T: std::str::FromStr>(
    value: Option<&str>,
    field: &str,
) -> Result<Option<T>, ApiError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("invalid {field}: {raw}"))),
    }
}

/// GET /api/jobs
async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if query.page < 1 {
        return Err(ApiError::BadRequest("page must be >= 1".into()));
    }
    if !(1..=100).contains(&query.page_size) {
        return Err(ApiError::BadRequest("page_size must be in 1..=100".into()));
    }

    let filters = jobs::JobFilters {
        role_family: parse_filter(query.role_family.as_deref(), "role_family")?,
        seniority: parse_filter(query.seniority.as_deref(), "seniority")?,
        location_type: parse_filter(query.location_type.as_deref(), "location_type")?,
    };

    let (page_jobs, total) =
        jobs::list_jobs(&state.db, &filters, query.page, query.page_size).await?;

    let mut payloads = Vec::with_capacity(page_jobs.len());
    for job in page_jobs {
        let company = companies::load_company(&state.db, job.company_id).await?;
        payloads.push(JobPayload::from_job(job, company));
    }

    let has_more = query.page * query.page_size < total;
    Ok(Json(json!({
        "jobs": payloads,
        "total": total,
        "page": query.page,
        "page_size": query.page_size,
        "has_more": has_more,
    })))
}

/// GET /api/jobs/{id}
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobPayload>> {
    let job = jobs::load_job(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {id}")))?;
    let company = companies::load_company(&state.db, job.company_id).await?;
    Ok(Json(JobPayload::from_job(job, company)))
}

#[derive(Debug, Deserialize)]
struct ClickQuery {
    candidate_id: Uuid,
}

/// POST /api/jobs/{id}/click?candidate_id=
async fn track_click(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ClickQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let tracked = matches::record_click(&state.db, query.candidate_id, id).await?;
    if !tracked {
        return Err(ApiError::NotFound(format!(
            "no match for candidate {} and job {id}",
            query.candidate_id
        )));
    }
    Ok(Json(json!({"status": "tracked"})))
}
