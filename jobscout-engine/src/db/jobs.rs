//! Canonical job persistence and vector retrieval
//!
//! Uniqueness is (company, source_url). The upsert preserves the row id
//! and clears the stored embedding only when the embedding text inputs
//! (title/description) actually changed, so vectors regenerate exactly
//! when they must.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{
    cosine_similarity, decode_embedding, list_from_db, list_to_db, ts_from_db, ts_to_db,
};
use crate::types::{DelistReason, EmploymentType, LocationType, RoleFamily, Seniority};

/// Canonical job record.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub company_id: Uuid,
    pub raw_job_id: Option<Uuid>,
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
    pub employment_type: Option<EmploymentType>,
    pub posted_at: Option<DateTime<Utc>>,
    pub freshness_score: Option<f64>,
    pub embedding: Option<Vec<f32>>,
    pub is_active: bool,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub delisted_at: Option<DateTime<Utc>>,
    pub delist_reason: Option<DelistReason>,
    pub enrich_failed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

const SELECT_COLUMNS: &str = "id, company_id, raw_job_id, title, description, source_url, \
    role_family, role_specialization, seniority, location_type, locations, skills, \
    min_salary, max_salary, employment_type, posted_at, freshness_score, embedding, \
    is_active, last_verified_at, delisted_at, delist_reason, enrich_failed_at, created_at";

fn from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let company_id: String = row.get("company_id");
    let raw_job_id: Option<String> = row.get("raw_job_id");
    let role_family: String = row.get("role_family");
    let seniority: Option<String> = row.get("seniority");
    let location_type: Option<String> = row.get("location_type");
    let employment_type: Option<String> = row.get("employment_type");
    let delist_reason: Option<String> = row.get("delist_reason");
    let embedding: Option<Vec<u8>> = row.get("embedding");

    Ok(Job {
        id: Uuid::parse_str(&id)?,
        company_id: Uuid::parse_str(&company_id)?,
        raw_job_id: raw_job_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
        title: row.get("title"),
        description: row.get("description"),
        source_url: row.get("source_url"),
        role_family: role_family.parse().unwrap_or(RoleFamily::Other),
        role_specialization: row.get("role_specialization"),
        seniority: seniority.as_deref().and_then(|s| s.parse().ok()),
        location_type: location_type.as_deref().and_then(|s| s.parse().ok()),
        locations: list_from_db(row.get("locations")),
        skills: list_from_db(row.get("skills")),
        min_salary: row.get("min_salary"),
        max_salary: row.get("max_salary"),
        employment_type: employment_type.as_deref().and_then(|s| s.parse().ok()),
        posted_at: ts_from_db(row.get("posted_at")),
        freshness_score: row.get("freshness_score"),
        embedding: embedding.as_deref().map(decode_embedding),
        is_active: row.get::<i64, _>("is_active") != 0,
        last_verified_at: ts_from_db(row.get("last_verified_at")),
        delisted_at: ts_from_db(row.get("delisted_at")),
        delist_reason: delist_reason.as_deref().and_then(|s| s.parse().ok()),
        enrich_failed_at: ts_from_db(row.get("enrich_failed_at")),
        created_at: ts_from_db(row.get("created_at")),
    })
}

/// Upsert a normalized job. Returns the persisted id.
pub async fn upsert_job(pool: &SqlitePool, job: &Job) -> Result<Uuid> {
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, company_id, raw_job_id, title, description, source_url, role_family,
            role_specialization, seniority, location_type, locations, skills,
            min_salary, max_salary, employment_type, posted_at, freshness_score,
            is_active, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, datetime('now'))
        ON CONFLICT(company_id, source_url) DO UPDATE SET
            raw_job_id = excluded.raw_job_id,
            embedding = CASE
                WHEN jobs.title != excluded.title
                  OR COALESCE(jobs.description, '') != COALESCE(excluded.description, '')
                THEN NULL
                ELSE jobs.embedding
            END,
            title = excluded.title,
            description = excluded.description,
            role_family = excluded.role_family,
            role_specialization = excluded.role_specialization,
            seniority = excluded.seniority,
            location_type = excluded.location_type,
            locations = excluded.locations,
            skills = excluded.skills,
            min_salary = excluded.min_salary,
            max_salary = excluded.max_salary,
            employment_type = excluded.employment_type,
            posted_at = excluded.posted_at,
            freshness_score = excluded.freshness_score,
            is_active = 1,
            delisted_at = NULL,
            delist_reason = NULL,
            updated_at = datetime('now')
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.company_id.to_string())
    .bind(job.raw_job_id.map(|id| id.to_string()))
    .bind(&job.title)
    .bind(&job.description)
    .bind(&job.source_url)
    .bind(job.role_family.as_str())
    .bind(&job.role_specialization)
    .bind(job.seniority.map(|s| s.as_str()))
    .bind(job.location_type.map(|l| l.as_str()))
    .bind(list_to_db(&job.locations))
    .bind(list_to_db(&job.skills))
    .bind(job.min_salary)
    .bind(job.max_salary)
    .bind(job.employment_type.map(|e| e.as_str()))
    .bind(job.posted_at.map(ts_to_db))
    .bind(job.freshness_score)
    .execute(pool)
    .await?;

    let id: String =
        sqlx::query_scalar("SELECT id FROM jobs WHERE company_id = ? AND source_url = ?")
            .bind(job.company_id.to_string())
            .bind(&job.source_url)
            .fetch_one(pool)
            .await?;

    Ok(Uuid::parse_str(&id)?)
}

pub async fn load_job(pool: &SqlitePool, id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(|r| from_row(&r)).transpose()
}

/// Catalog listing filters for the public API.
#[derive(Debug, Default, Clone)]
pub struct JobFilters {
    pub role_family: Option<RoleFamily>,
    pub seniority: Option<Seniority>,
    pub location_type: Option<LocationType>,
}

/// Paginated active-catalog listing, newest-posted first.
pub async fn list_jobs(
    pool: &SqlitePool,
    filters: &JobFilters,
    page: i64,
    page_size: i64,
) -> Result<(Vec<Job>, i64)> {
    let mut conditions = vec!["is_active = 1".to_string()];
    if let Some(family) = filters.role_family {
        conditions.push(format!("role_family = '{}'", family.as_str()));
    }
    if let Some(seniority) = filters.seniority {
        conditions.push(format!("seniority = '{}'", seniority.as_str()));
    }
    if let Some(location_type) = filters.location_type {
        conditions.push(format!("location_type = '{}'", location_type.as_str()));
    }
    let where_clause = conditions.join(" AND ");

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM jobs WHERE {where_clause}"))
            .fetch_one(pool)
            .await?;

    let offset = (page - 1) * page_size;
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM jobs WHERE {where_clause}
         ORDER BY posted_at IS NULL, posted_at DESC, created_at DESC
         LIMIT ? OFFSET ?"
    ))
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let jobs = rows.iter().map(from_row).collect::<Result<Vec<_>>>()?;
    Ok((jobs, total))
}

/// Active jobs for a company (maintenance reconciliation input).
pub async fn active_jobs_for_company(pool: &SqlitePool, company_id: Uuid) -> Result<Vec<Job>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM jobs WHERE company_id = ? AND is_active = 1"
    ))
    .bind(company_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

/// Jobs whose stored vector is missing or from an older model version.
pub async fn jobs_missing_embedding(
    pool: &SqlitePool,
    model_version: &str,
    limit: i64,
) -> Result<Vec<Job>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM jobs
         WHERE is_active = 1
           AND (embedding IS NULL OR embedding_model_version IS NOT ?)
         LIMIT ?"
    ))
    .bind(model_version)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn set_embedding(
    pool: &SqlitePool,
    id: Uuid,
    embedding: &[f32],
    model_version: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET embedding = ?, embedding_model_version = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(super::encode_embedding(embedding))
    .bind(model_version)
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Jobs with no description that have not already failed enrichment within
/// the current run window (`failed_cutoff` is the full-pipeline run start).
pub async fn jobs_needing_enrichment(
    pool: &SqlitePool,
    failed_cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Job>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM jobs
         WHERE is_active = 1
           AND (description IS NULL OR description = '')
           AND (enrich_failed_at IS NULL OR enrich_failed_at < ?)
         LIMIT ?"
    ))
    .bind(ts_to_db(failed_cutoff))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

/// Write back an enriched description (and a better posted date when the
/// detail endpoint had one). Clears any stale embedding so the next
/// embedding pass regenerates it from the richer text.
pub async fn set_enriched(
    pool: &SqlitePool,
    id: Uuid,
    description: &str,
    posted_at: Option<DateTime<Utc>>,
    freshness_score: Option<f64>,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs
         SET description = ?,
             posted_at = COALESCE(?, posted_at),
             freshness_score = COALESCE(?, freshness_score),
             embedding = NULL,
             enrich_failed_at = NULL,
             updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(description)
    .bind(posted_at.map(ts_to_db))
    .bind(freshness_score)
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_enrich_failed(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE jobs SET enrich_failed_at = ?, updated_at = datetime('now') WHERE id = ?")
        .bind(ts_to_db(Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn touch_verified(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE jobs SET last_verified_at = ?, updated_at = datetime('now') WHERE id = ?")
        .bind(ts_to_db(Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delist_job(pool: &SqlitePool, id: Uuid, reason: DelistReason) -> Result<()> {
    sqlx::query(
        "UPDATE jobs
         SET is_active = 0, delisted_at = ?, delist_reason = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(ts_to_db(Utc::now()))
    .bind(reason.as_str())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Delist every active job of a company in one statement.
pub async fn delist_company_jobs(
    pool: &SqlitePool,
    company_id: Uuid,
    reason: DelistReason,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jobs
         SET is_active = 0, delisted_at = ?, delist_reason = ?, updated_at = datetime('now')
         WHERE company_id = ? AND is_active = 1",
    )
    .bind(ts_to_db(Utc::now()))
    .bind(reason.as_str())
    .bind(company_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn count_active(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE is_active = 1")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Catalog counters for the admin status endpoint:
/// (total, active, with_description, with_embedding).
pub async fn stats(pool: &SqlitePool) -> Result<(i64, i64, i64, i64)> {
    let row = sqlx::query(
        "SELECT COUNT(*),
                SUM(CASE WHEN is_active = 1 THEN 1 ELSE 0 END),
                SUM(CASE WHEN description IS NOT NULL AND description != '' THEN 1 ELSE 0 END),
                SUM(CASE WHEN embedding IS NOT NULL THEN 1 ELSE 0 END)
         FROM jobs",
    )
    .fetch_one(pool)
    .await?;
    Ok((
        row.get::<i64, _>(0),
        row.get::<Option<i64>, _>(1).unwrap_or(0),
        row.get::<Option<i64>, _>(2).unwrap_or(0),
        row.get::<Option<i64>, _>(3).unwrap_or(0),
    ))
}

/// The storage layer's similarity query: top-K active jobs by cosine
/// similarity against `query`, filtered to similarity ≥ `min_similarity`.
///
/// Returns (job_id, similarity) pairs, best first. Also reports how many
/// active jobs carried a vector at all, so the matcher can distinguish an
/// empty catalog from a vector-less one.
pub async fn vector_search(
    pool: &SqlitePool,
    query: &[f32],
    k: usize,
    min_similarity: f32,
) -> Result<VectorSearchResult> {
    let rows = sqlx::query(
        "SELECT id, embedding FROM jobs WHERE is_active = 1 AND embedding IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;

    let candidates_with_vectors = rows.len();
    let mut scored: Vec<(Uuid, f32)> = Vec::with_capacity(rows.len());

    for row in &rows {
        let id: String = row.get("id");
        let bytes: Vec<u8> = row.get("embedding");
        let embedding = decode_embedding(&bytes);
        let similarity = cosine_similarity(query, &embedding);
        if similarity >= min_similarity {
            if let Ok(id) = Uuid::parse_str(&id) {
                scored.push((id, similarity));
            }
        }
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);

    Ok(VectorSearchResult {
        hits: scored,
        candidates_with_vectors,
    })
}

/// Output of [`vector_search`].
#[derive(Debug)]
pub struct VectorSearchResult {
    pub hits: Vec<(Uuid, f32)>,
    pub candidates_with_vectors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::companies::{save_company, Company};
    use crate::db::init_memory_database;

    fn sample_job(company_id: Uuid, url: &str) -> Job {
        Job {
            id: Uuid::new_v4(),
            company_id,
            raw_job_id: None,
            title: "Senior Software Engineer".into(),
            description: Some("Build things in Rust".into()),
            source_url: url.into(),
            role_family: RoleFamily::SoftwareEngineering,
            role_specialization: Some("backend".into()),
            seniority: Some(Seniority::Senior),
            location_type: Some(LocationType::Remote),
            locations: vec!["US".into()],
            skills: vec!["rust".into(), "sql".into()],
            min_salary: Some(150_000),
            max_salary: Some(200_000),
            employment_type: Some(EmploymentType::FullTime),
            posted_at: Some(Utc::now()),
            freshness_score: Some(1.0),
            embedding: None,
            is_active: true,
            last_verified_at: None,
            delisted_at: None,
            delist_reason: None,
            enrich_failed_at: None,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_preserves_id_and_clears_embedding_on_text_change() {
        let pool = init_memory_database().await.unwrap();
        let company = Company::new("Acme".into());
        save_company(&pool, &company).await.unwrap();

        let job = sample_job(company.id, "https://x/jobs/1");
        let id = upsert_job(&pool, &job).await.unwrap();
        set_embedding(&pool, id, &[0.1; 384], "text-embed-v1").await.unwrap();

        // Same text: embedding survives
        let unchanged = sample_job(company.id, "https://x/jobs/1");
        let same_id = upsert_job(&pool, &unchanged).await.unwrap();
        assert_eq!(id, same_id);
        let loaded = load_job(&pool, id).await.unwrap().unwrap();
        assert!(loaded.embedding.is_some());

        // Changed description: embedding cleared for regeneration
        let mut changed = sample_job(company.id, "https://x/jobs/1");
        changed.description = Some("Now with more Rust".into());
        upsert_job(&pool, &changed).await.unwrap();
        let loaded = load_job(&pool, id).await.unwrap().unwrap();
        assert!(loaded.embedding.is_none());
    }

    #[tokio::test]
    async fn delist_and_reactivate_through_upsert() {
        let pool = init_memory_database().await.unwrap();
        let company = Company::new("Acme".into());
        save_company(&pool, &company).await.unwrap();

        let job = sample_job(company.id, "https://x/jobs/1");
        let id = upsert_job(&pool, &job).await.unwrap();

        delist_job(&pool, id, DelistReason::RemovedFromAts).await.unwrap();
        let loaded = load_job(&pool, id).await.unwrap().unwrap();
        assert!(!loaded.is_active);
        assert_eq!(loaded.delist_reason, Some(DelistReason::RemovedFromAts));
        assert!(loaded.delisted_at.is_some());

        // The posting reappearing on the ATS reactivates the row
        upsert_job(&pool, &job).await.unwrap();
        let loaded = load_job(&pool, id).await.unwrap().unwrap();
        assert!(loaded.is_active);
        assert!(loaded.delist_reason.is_none());
    }

    #[tokio::test]
    async fn vector_search_ranks_by_similarity() {
        let pool = init_memory_database().await.unwrap();
        let company = Company::new("Acme".into());
        save_company(&pool, &company).await.unwrap();

        let near = upsert_job(&pool, &sample_job(company.id, "https://x/jobs/near"))
            .await
            .unwrap();
        let far = upsert_job(&pool, &sample_job(company.id, "https://x/jobs/far"))
            .await
            .unwrap();
        let opposite = upsert_job(&pool, &sample_job(company.id, "https://x/jobs/opp"))
            .await
            .unwrap();

        set_embedding(&pool, near, &[1.0, 0.0, 0.0], "v1").await.unwrap();
        set_embedding(&pool, far, &[0.8, 0.6, 0.0], "v1").await.unwrap();
        set_embedding(&pool, opposite, &[-1.0, 0.0, 0.0], "v1").await.unwrap();

        let result = vector_search(&pool, &[1.0, 0.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(result.candidates_with_vectors, 3);
        let ids: Vec<Uuid> = result.hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![near, far]);
        assert!(result.hits[0].1 > result.hits[1].1);
    }

    #[tokio::test]
    async fn enrichment_queue_respects_failed_cutoff() {
        let pool = init_memory_database().await.unwrap();
        let company = Company::new("Acme".into());
        save_company(&pool, &company).await.unwrap();

        let mut job = sample_job(company.id, "https://x/jobs/1");
        job.description = None;
        let id = upsert_job(&pool, &job).await.unwrap();

        let run_start = Utc::now();

        // Not yet failed: eligible
        let due = jobs_needing_enrichment(&pool, run_start, 10).await.unwrap();
        assert_eq!(due.len(), 1);

        // Failed within this run window: skipped
        mark_enrich_failed(&pool, id).await.unwrap();
        let due = jobs_needing_enrichment(&pool, run_start, 10).await.unwrap();
        assert!(due.is_empty());

        // A later full-pipeline run (later cutoff) retries it
        let next_run_start = Utc::now() + chrono::Duration::seconds(1);
        let due = jobs_needing_enrichment(&pool, next_run_start, 10).await.unwrap();
        assert_eq!(due.len(), 1);
    }
}
