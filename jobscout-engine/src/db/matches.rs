//! Match persistence
//!
//! (candidate, job) is unique. Re-matching overwrites the score and
//! reasons; usage timestamps (shown/clicked/applied/dismissed) and
//! created_at are never touched by the matcher.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{ts_from_db, ts_to_db};

/// Persisted candidate–job match.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub score: f64,
    pub hard_match: bool,
    pub match_reasons: Option<serde_json::Value>,
    pub shown_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

fn from_row(row: &SqliteRow) -> Result<MatchRecord> {
    let id: String = row.get("id");
    let candidate_id: String = row.get("candidate_id");
    let job_id: String = row.get("job_id");
    let reasons: Option<String> = row.get("match_reasons");

    Ok(MatchRecord {
        id: Uuid::parse_str(&id)?,
        candidate_id: Uuid::parse_str(&candidate_id)?,
        job_id: Uuid::parse_str(&job_id)?,
        score: row.get("score"),
        hard_match: row.get::<i64, _>("hard_match") != 0,
        match_reasons: reasons.and_then(|s| serde_json::from_str(&s).ok()),
        shown_at: ts_from_db(row.get("shown_at")),
        clicked_at: ts_from_db(row.get("clicked_at")),
        applied_at: ts_from_db(row.get("applied_at")),
        dismissed_at: ts_from_db(row.get("dismissed_at")),
        created_at: ts_from_db(row.get("created_at")),
    })
}

const SELECT_COLUMNS: &str = "id, candidate_id, job_id, score, hard_match, match_reasons, \
    shown_at, clicked_at, applied_at, dismissed_at, created_at";

/// Upsert a match result. Newer score and reasons overwrite; timestamps
/// are preserved.
pub async fn upsert_match(
    pool: &SqlitePool,
    candidate_id: Uuid,
    job_id: Uuid,
    score: f64,
    hard_match: bool,
    reasons: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO matches (id, candidate_id, job_id, score, hard_match, match_reasons)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(candidate_id, job_id) DO UPDATE SET
            score = excluded.score,
            hard_match = excluded.hard_match,
            match_reasons = excluded.match_reasons
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(candidate_id.to_string())
    .bind(job_id.to_string())
    .bind(score)
    .bind(hard_match as i64)
    .bind(serde_json::to_string(reasons)?)
    .execute(pool)
    .await?;

    Ok(())
}

/// Paginated matches for a candidate, highest score first.
pub async fn list_for_candidate(
    pool: &SqlitePool,
    candidate_id: Uuid,
    min_score: f64,
    page: i64,
    page_size: i64,
) -> Result<(Vec<MatchRecord>, i64)> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM matches WHERE candidate_id = ? AND score >= ?",
    )
    .bind(candidate_id.to_string())
    .bind(min_score)
    .fetch_one(pool)
    .await?;

    let offset = (page - 1) * page_size;
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM matches
         WHERE candidate_id = ? AND score >= ?
         ORDER BY score DESC
         LIMIT ? OFFSET ?"
    ))
    .bind(candidate_id.to_string())
    .bind(min_score)
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let matches = rows.iter().map(from_row).collect::<Result<Vec<_>>>()?;
    Ok((matches, total))
}

pub async fn load_match(
    pool: &SqlitePool,
    candidate_id: Uuid,
    job_id: Uuid,
) -> Result<Option<MatchRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM matches WHERE candidate_id = ? AND job_id = ?"
    ))
    .bind(candidate_id.to_string())
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;
    row.map(|r| from_row(&r)).transpose()
}

/// Record a click on the (candidate, job) match. Returns false when no
/// such match exists.
pub async fn record_click(pool: &SqlitePool, candidate_id: Uuid, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE matches SET clicked_at = ? WHERE candidate_id = ? AND job_id = ?",
    )
    .bind(ts_to_db(Utc::now()))
    .bind(candidate_id.to_string())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_matches(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM matches")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::candidates::{upsert_profile, CandidateProfile};
    use crate::db::companies::{save_company, Company};
    use crate::db::init_memory_database;
    use crate::db::jobs::{upsert_job, Job};
    use crate::types::RoleFamily;
    use serde_json::json;

    async fn seed(pool: &SqlitePool) -> (Uuid, Uuid) {
        let company = Company::new("Acme".into());
        save_company(pool, &company).await.unwrap();

        let job = Job {
            id: Uuid::new_v4(),
            company_id: company.id,
            raw_job_id: None,
            title: "Engineer".into(),
            description: None,
            source_url: "https://x/jobs/1".into(),
            role_family: RoleFamily::SoftwareEngineering,
            role_specialization: None,
            seniority: None,
            location_type: None,
            locations: vec![],
            skills: vec![],
            min_salary: None,
            max_salary: None,
            employment_type: None,
            posted_at: None,
            freshness_score: Some(0.5),
            embedding: None,
            is_active: true,
            last_verified_at: None,
            delisted_at: None,
            delist_reason: None,
            enrich_failed_at: None,
            created_at: None,
        };
        let job_id = upsert_job(pool, &job).await.unwrap();

        let candidate_id = upsert_profile(pool, &CandidateProfile::new("a@b.test".into()))
            .await
            .unwrap();
        (candidate_id, job_id)
    }

    #[tokio::test]
    async fn rematch_overwrites_score_but_keeps_click() {
        let pool = init_memory_database().await.unwrap();
        let (candidate_id, job_id) = seed(&pool).await;

        upsert_match(&pool, candidate_id, job_id, 0.8, true, &json!({"a": 1}))
            .await
            .unwrap();
        assert!(record_click(&pool, candidate_id, job_id).await.unwrap());

        upsert_match(&pool, candidate_id, job_id, 0.6, true, &json!({"a": 2}))
            .await
            .unwrap();

        let loaded = load_match(&pool, candidate_id, job_id).await.unwrap().unwrap();
        assert!((loaded.score - 0.6).abs() < 1e-9);
        assert!(loaded.clicked_at.is_some());
        assert_eq!(count_matches(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn min_score_filter_applies() {
        let pool = init_memory_database().await.unwrap();
        let (candidate_id, job_id) = seed(&pool).await;

        upsert_match(&pool, candidate_id, job_id, 0.3, false, &json!({}))
            .await
            .unwrap();

        let (matches, total) = list_for_candidate(&pool, candidate_id, 0.5, 1, 20)
            .await
            .unwrap();
        assert!(matches.is_empty());
        assert_eq!(total, 0);

        let (matches, total) = list_for_candidate(&pool, candidate_id, 0.0, 1, 20)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(total, 1);
    }
}
