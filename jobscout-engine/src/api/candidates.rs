//! Candidate endpoints
//!
//! Profile reads, partial updates, waitlist sync, and match listings.
//! Preference changes queue a background re-embed + re-match for the
//! candidate.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::db::candidates::{self, CandidateProfile};
use crate::db::{companies, jobs, matches};
use crate::embed;
use crate::error::{ApiError, ApiResult};
use crate::matching::{self, MatchOptions};
use crate::types::{LocationType, RoleFamily, Seniority};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync-from-waitlist", post(sync_from_waitlist))
        .route("/:id", get(get_candidate).patch(update_candidate))
        .route("/:id/matches", get(list_matches))
}

#[derive(Debug, Serialize)]
struct CandidatePayload {
    id: Uuid,
    email: String,
    name: Option<String>,
    role_families: Vec<RoleFamily>,
    seniority: Option<Seniority>,
    min_salary: Option<i64>,
    locations: Vec<String>,
    location_types: Vec<LocationType>,
    role_types: Vec<String>,
    skills: Vec<String>,
    exclusions: Vec<String>,
    has_embedding: bool,
    last_matched_at: Option<chrono::DateTime<chrono::Utc>>,
    is_active: bool,
}

impl From<CandidateProfile> for CandidatePayload {
    fn from(profile: CandidateProfile) -> Self {
        Self {
            id: profile.id,
            email: profile.email,
            name: profile.name,
            role_families: profile.role_families,
            seniority: profile.seniority,
            min_salary: profile.min_salary,
            locations: profile.locations,
            location_types: profile.location_types,
            role_types: profile.role_types,
            skills: profile.skills,
            exclusions: profile.exclusions,
            has_embedding: profile.embedding.is_some(),
            last_matched_at: profile.last_matched_at,
            is_active: profile.is_active,
        }
    }
}

/// GET /api/candidates/{id}
async fn get_candidate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CandidatePayload>> {
    let profile = candidates::load_profile(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("candidate not found: {id}")))?;
    Ok(Json(profile.into()))
}

#[derive(Debug, Deserialize)]
struct CandidateUpdate {
    name: Option<String>,
    role_families: Option<Vec<RoleFamily>>,
    seniority: Option<Seniority>,
    min_salary: Option<i64>,
    locations: Option<Vec<String>>,
    location_types: Option<Vec<LocationType>>,
    role_types: Option<Vec<String>>,
    skills: Option<Vec<String>>,
    exclusions: Option<Vec<String>>,
    profile_text: Option<String>,
}

/// PATCH /api/candidates/{id}
async fn update_candidate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<CandidateUpdate>,
) -> ApiResult<Json<CandidatePayload>> {
    let mut profile = candidates::load_profile(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("candidate not found: {id}")))?;

    if let Some(name) = update.name {
        profile.name = Some(name);
    }
    if let Some(role_families) = update.role_families {
        profile.role_families = role_families;
    }
    if let Some(seniority) = update.seniority {
        profile.seniority = Some(seniority);
    }
    if let Some(min_salary) = update.min_salary {
        profile.min_salary = Some(min_salary);
    }
    if let Some(locations) = update.locations {
        profile.locations = locations;
    }
    if let Some(location_types) = update.location_types {
        profile.location_types = location_types;
    }
    if let Some(role_types) = update.role_types {
        profile.role_types = role_types;
    }
    if let Some(skills) = update.skills {
        profile.skills = skills;
    }
    if let Some(exclusions) = update.exclusions {
        profile.exclusions = exclusions;
    }
    if let Some(profile_text) = update.profile_text {
        profile.profile_text = Some(profile_text);
    }

    candidates::save_preferences(&state.db, &profile).await?;
    queue_rematch(&state, id);

    let reloaded = candidates::load_profile(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::Internal("candidate vanished during update".into()))?;
    Ok(Json(reloaded.into()))
}

#[derive(Debug, Deserialize)]
struct WaitlistSync {
    email: String,
    waitlist_id: Option<Uuid>,
    name: Option<String>,
    #[serde(default)]
    role_families: Vec<RoleFamily>,
    seniority: Option<Seniority>,
    min_salary: Option<i64>,
    #[serde(default)]
    locations: Vec<String>,
    #[serde(default)]
    location_types: Vec<LocationType>,
    #[serde(default)]
    role_types: Vec<String>,
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    exclusions: Vec<String>,
    profile_text: Option<String>,
}

/// POST /api/candidates/sync-from-waitlist
async fn sync_from_waitlist(
    State(state): State<AppState>,
    Json(sync): Json<WaitlistSync>,
) -> ApiResult<Json<CandidatePayload>> {
    if sync.email.trim().is_empty() || !sync.email.contains('@') {
        return Err(ApiError::BadRequest("a valid email is required".into()));
    }

    let mut profile = CandidateProfile::new(sync.email.trim().to_lowercase());
    profile.waitlist_id = sync.waitlist_id;
    profile.name = sync.name;
    profile.role_families = sync.role_families;
    profile.seniority = sync.seniority;
    profile.min_salary = sync.min_salary;
    profile.locations = sync.locations;
    profile.location_types = sync.location_types;
    profile.role_types = sync.role_types;
    profile.skills = sync.skills;
    profile.exclusions = sync.exclusions;
    profile.profile_text = sync.profile_text;

    let id = candidates::upsert_profile(&state.db, &profile).await?;
    queue_rematch(&state, id);

    let stored = candidates::load_profile(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::Internal("candidate vanished during sync".into()))?;
    Ok(Json(stored.into()))
}

/// Background re-embed + re-match after a profile change.
fn queue_rematch(state: &AppState, candidate_id: Uuid) {
    let pool = state.db.clone();
    let embedder = state.pipeline.embedder().clone();
    tokio::spawn(async move {
        if embedder.is_available() {
            if let Ok(Some(profile)) = candidates::load_profile(&pool, candidate_id).await {
                if profile.embedding.is_none() {
                    let text = embed::candidate_embedding_text(&profile);
                    match embedder.embed_batch(&[text]).await {
                        Ok(vectors) => {
                            if let Some(vector) = vectors.first() {
                                let _ = candidates::set_embedding(
                                    &pool,
                                    candidate_id,
                                    vector,
                                    embedder.model_version(),
                                )
                                .await;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%candidate_id, error = %error, "Candidate embedding failed");
                        }
                    }
                }
            }
        }

        if let Err(error) = matching::run_matching_for_candidate(
            &pool,
            candidate_id,
            &MatchOptions::default(),
        )
        .await
        {
            tracing::warn!(%candidate_id, error = %error, "Background matching failed");
        }
    });
}

#[derive(Debug, Deserialize)]
struct MatchesQuery {
    #[serde(default)]
    min_score: f64,
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_page_size")]
    page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

/// GET /api/candidates/{id}/matches
async fn list_matches(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<MatchesQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let candidate = candidates::load_profile(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("candidate not found: {id}")))?;

    let (records, total) =
        matches::list_for_candidate(&state.db, id, query.min_score, query.page, query.page_size)
            .await?;

    // An empty list gets a structured explanation rather than silence
    let no_matches_reason = if total == 0 {
        let outcome =
            matching::match_candidate(&state.db, &candidate, &MatchOptions::default()).await?;
        outcome.no_matches_reason.map(|reason| reason.as_str())
    } else {
        None
    };

    let mut payloads = Vec::with_capacity(records.len());
    for record in records {
        let Some(job) = jobs::load_job(&state.db, record.job_id).await? else {
            continue;
        };
        let company = companies::load_company(&state.db, job.company_id).await?;
        payloads.push(json!({
            "id": record.id,
            "job": super::jobs::JobPayload::from_job(job, company),
            "score": record.score,
            "hard_match": record.hard_match,
            "match_reasons": record.match_reasons,
            "shown_at": record.shown_at,
            "clicked_at": record.clicked_at,
            "applied_at": record.applied_at,
            "dismissed_at": record.dismissed_at,
        }));
    }

    let has_more = query.page * query.page_size < total;
    Ok(Json(json!({
        "matches": payloads,
        "total": total,
        "page": query.page,
        "page_size": query.page_size,
        "has_more": has_more,
        "no_matches_reason": no_matches_reason,
    })))
}
