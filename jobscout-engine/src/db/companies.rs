//! Company persistence
//!
//! Companies are created by discovery intake or ATS detection, mutated by
//! the detector and maintenance, and deactivated rather than deleted.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{ts_from_db, ts_to_db};
use crate::types::AtsType;

/// Company record.
#[derive(Debug, Clone)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub domain: Option<String>,
    pub careers_url: Option<String>,
    pub website_url: Option<String>,
    pub ats_type: AtsType,
    pub ats_identifier: Option<String>,
    pub crawl_priority: i64,
    pub is_active: bool,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub last_maintenance_at: Option<DateTime<Utc>>,
    pub crawl_attempts: i64,
    pub careers_not_found_streak: i64,
    pub discovery_source: Option<String>,
    pub discovered_at: Option<DateTime<Utc>>,
    pub country: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub employee_count: Option<i64>,
    pub funding_stage: Option<String>,
    pub ats_detection_attempts: i64,
    pub ats_detection_last_at: Option<DateTime<Utc>>,
}

impl Company {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            domain: None,
            careers_url: None,
            website_url: None,
            ats_type: AtsType::Unknown,
            ats_identifier: None,
            crawl_priority: 50,
            is_active: true,
            last_crawled_at: None,
            last_maintenance_at: None,
            crawl_attempts: 0,
            careers_not_found_streak: 0,
            discovery_source: None,
            discovered_at: None,
            country: None,
            location: None,
            description: None,
            industry: None,
            employee_count: None,
            funding_stage: None,
            ats_detection_attempts: 0,
            ats_detection_last_at: None,
        }
    }
}

fn from_row(row: &SqliteRow) -> Result<Company> {
    let id: String = row.get("id");
    let ats_type: Option<String> = row.get("ats_type");
    Ok(Company {
        id: Uuid::parse_str(&id)?,
        name: row.get("name"),
        domain: row.get("domain"),
        careers_url: row.get("careers_url"),
        website_url: row.get("website_url"),
        ats_type: ats_type
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(AtsType::Unknown),
        ats_identifier: row.get("ats_identifier"),
        crawl_priority: row.get("crawl_priority"),
        is_active: row.get::<i64, _>("is_active") != 0,
        last_crawled_at: ts_from_db(row.get("last_crawled_at")),
        last_maintenance_at: ts_from_db(row.get("last_maintenance_at")),
        crawl_attempts: row.get("crawl_attempts"),
        careers_not_found_streak: row.get("careers_not_found_streak"),
        discovery_source: row.get("discovery_source"),
        discovered_at: ts_from_db(row.get("discovered_at")),
        country: row.get("country"),
        location: row.get("location"),
        description: row.get("description"),
        industry: row.get("industry"),
        employee_count: row.get("employee_count"),
        funding_stage: row.get("funding_stage"),
        ats_detection_attempts: row.get("ats_detection_attempts"),
        ats_detection_last_at: ts_from_db(row.get("ats_detection_last_at")),
    })
}

const SELECT_COLUMNS: &str = "id, name, domain, careers_url, website_url, ats_type, \
    ats_identifier, crawl_priority, is_active, last_crawled_at, last_maintenance_at, \
    crawl_attempts, careers_not_found_streak, discovery_source, discovered_at, country, \
    location, description, industry, employee_count, funding_stage, \
    ats_detection_attempts, ats_detection_last_at";

/// Insert or update a company. Conflict on domain merges into the existing
/// row; the original id is preserved.
pub async fn save_company(pool: &SqlitePool, company: &Company) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO companies (
            id, name, domain, careers_url, website_url, ats_type, ats_identifier,
            crawl_priority, is_active, last_crawled_at, last_maintenance_at,
            crawl_attempts, careers_not_found_streak, discovery_source, discovered_at,
            country, location, description, industry, employee_count, funding_stage,
            ats_detection_attempts, ats_detection_last_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
        ON CONFLICT(domain) DO UPDATE SET
            name = excluded.name,
            careers_url = COALESCE(excluded.careers_url, companies.careers_url),
            website_url = COALESCE(excluded.website_url, companies.website_url),
            ats_type = excluded.ats_type,
            ats_identifier = excluded.ats_identifier,
            crawl_priority = excluded.crawl_priority,
            is_active = excluded.is_active,
            discovery_source = COALESCE(excluded.discovery_source, companies.discovery_source),
            country = COALESCE(excluded.country, companies.country),
            location = COALESCE(excluded.location, companies.location),
            description = COALESCE(excluded.description, companies.description),
            industry = COALESCE(excluded.industry, companies.industry),
            employee_count = COALESCE(excluded.employee_count, companies.employee_count),
            funding_stage = COALESCE(excluded.funding_stage, companies.funding_stage),
            updated_at = datetime('now')
        "#,
    )
    .bind(company.id.to_string())
    .bind(&company.name)
    .bind(&company.domain)
    .bind(&company.careers_url)
    .bind(&company.website_url)
    .bind(company.ats_type.as_str())
    .bind(&company.ats_identifier)
    .bind(company.crawl_priority)
    .bind(company.is_active as i64)
    .bind(company.last_crawled_at.map(ts_to_db))
    .bind(company.last_maintenance_at.map(ts_to_db))
    .bind(company.crawl_attempts)
    .bind(company.careers_not_found_streak)
    .bind(&company.discovery_source)
    .bind(company.discovered_at.map(ts_to_db))
    .bind(&company.country)
    .bind(&company.location)
    .bind(&company.description)
    .bind(&company.industry)
    .bind(company.employee_count)
    .bind(&company.funding_stage)
    .bind(company.ats_detection_attempts)
    .bind(company.ats_detection_last_at.map(ts_to_db))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_company(pool: &SqlitePool, id: Uuid) -> Result<Option<Company>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM companies WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| from_row(&r)).transpose()
}

pub async fn load_by_domain(pool: &SqlitePool, domain: &str) -> Result<Option<Company>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM companies WHERE domain = ?"
    ))
    .bind(domain)
    .fetch_optional(pool)
    .await?;

    row.map(|r| from_row(&r)).transpose()
}

/// Active companies with a detected ATS that are due for crawling,
/// oldest-crawled first (never-crawled first of all).
pub async fn due_for_crawl(
    pool: &SqlitePool,
    ats_type: Option<AtsType>,
    interval_hours: i64,
    limit: i64,
) -> Result<Vec<Company>> {
    let cutoff = ts_to_db(Utc::now() - Duration::hours(interval_hours));

    let rows = match ats_type {
        Some(ats) => {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM companies
                 WHERE is_active = 1
                   AND ats_type = ?
                   AND (last_crawled_at IS NULL OR last_crawled_at < ?)
                 ORDER BY last_crawled_at IS NOT NULL, last_crawled_at, crawl_priority DESC
                 LIMIT ?"
            ))
            .bind(ats.as_str())
            .bind(&cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM companies
                 WHERE is_active = 1
                   AND ats_type IS NOT NULL AND ats_type != 'unknown'
                   AND (last_crawled_at IS NULL OR last_crawled_at < ?)
                 ORDER BY last_crawled_at IS NOT NULL, last_crawled_at, crawl_priority DESC
                 LIMIT ?"
            ))
            .bind(&cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(from_row).collect()
}

/// Active companies not maintained within the window, never-checked first.
pub async fn due_for_maintenance(
    pool: &SqlitePool,
    window_days: i64,
    limit: i64,
) -> Result<Vec<Company>> {
    let cutoff = ts_to_db(Utc::now() - Duration::days(window_days));
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM companies
         WHERE is_active = 1
           AND careers_url IS NOT NULL
           AND (last_maintenance_at IS NULL OR last_maintenance_at < ?)
         ORDER BY last_maintenance_at IS NOT NULL, last_maintenance_at
         LIMIT ?"
    ))
    .bind(&cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

/// The detector is the sole writer of the four ATS fields.
pub async fn set_ats_fields(
    pool: &SqlitePool,
    id: Uuid,
    ats_type: AtsType,
    ats_identifier: Option<&str>,
    careers_url: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE companies
        SET ats_type = ?,
            ats_identifier = ?,
            careers_url = COALESCE(?, careers_url),
            ats_detection_attempts = ats_detection_attempts + 1,
            ats_detection_last_at = ?,
            updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(ats_type.as_str())
    .bind(ats_identifier)
    .bind(careers_url)
    .bind(ts_to_db(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Bump the crawl clock. Runs on every crawl, changed or not.
pub async fn touch_crawled(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE companies
         SET last_crawled_at = ?, crawl_attempts = crawl_attempts + 1,
             updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(ts_to_db(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn touch_maintained(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE companies SET last_maintenance_at = ?, updated_at = datetime('now') WHERE id = ?",
    )
    .bind(ts_to_db(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Track consecutive not_found results on the careers URL. Returns the new
/// streak so the caller can decide on deactivation.
pub async fn record_careers_not_found(pool: &SqlitePool, id: Uuid) -> Result<i64> {
    sqlx::query(
        "UPDATE companies
         SET careers_not_found_streak = careers_not_found_streak + 1,
             updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(id.to_string())
    .execute(pool)
    .await?;

    let streak: i64 =
        sqlx::query_scalar("SELECT careers_not_found_streak FROM companies WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(streak)
}

pub async fn reset_careers_not_found(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE companies SET careers_not_found_streak = 0, updated_at = datetime('now')
         WHERE id = ? AND careers_not_found_streak != 0",
    )
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Companies are never destroyed, only deactivated.
pub async fn deactivate(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE companies SET is_active = 0, updated_at = datetime('now') WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Aggregate counts for the admin status endpoint.
pub async fn stats(pool: &SqlitePool) -> Result<(i64, i64, i64)> {
    let row = sqlx::query(
        "SELECT COUNT(*),
                SUM(CASE WHEN is_active = 1 THEN 1 ELSE 0 END),
                SUM(CASE WHEN ats_type IS NOT NULL AND ats_type != 'unknown' THEN 1 ELSE 0 END)
         FROM companies",
    )
    .fetch_one(pool)
    .await?;

    Ok((
        row.get::<i64, _>(0),
        row.get::<Option<i64>, _>(1).unwrap_or(0),
        row.get::<Option<i64>, _>(2).unwrap_or(0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let pool = init_memory_database().await.unwrap();

        let mut company = Company::new("Acme".to_string());
        company.domain = Some("acme.test".to_string());
        company.ats_type = AtsType::Greenhouse;
        company.ats_identifier = Some("acme".to_string());

        save_company(&pool, &company).await.unwrap();

        let loaded = load_company(&pool, company.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Acme");
        assert_eq!(loaded.ats_type, AtsType::Greenhouse);
        assert_eq!(loaded.ats_identifier.as_deref(), Some("acme"));
        assert!(loaded.is_active);
    }

    #[tokio::test]
    async fn domain_conflict_merges_metadata() {
        let pool = init_memory_database().await.unwrap();

        let mut first = Company::new("Acme".to_string());
        first.domain = Some("acme.test".to_string());
        first.industry = Some("fintech".to_string());
        save_company(&pool, &first).await.unwrap();

        let mut second = Company::new("Acme Inc".to_string());
        second.domain = Some("acme.test".to_string());
        second.country = Some("US".to_string());
        save_company(&pool, &second).await.unwrap();

        let merged = load_by_domain(&pool, "acme.test").await.unwrap().unwrap();
        // Original id survives, newer non-null metadata enriches the row
        assert_eq!(merged.id, first.id);
        assert_eq!(merged.name, "Acme Inc");
        assert_eq!(merged.industry.as_deref(), Some("fintech"));
        assert_eq!(merged.country.as_deref(), Some("US"));
    }

    #[tokio::test]
    async fn due_for_crawl_orders_never_crawled_first() {
        let pool = init_memory_database().await.unwrap();

        let mut stale = Company::new("Stale".to_string());
        stale.domain = Some("stale.test".to_string());
        stale.ats_type = AtsType::Lever;
        stale.ats_identifier = Some("stale".to_string());
        stale.last_crawled_at = Some(Utc::now() - Duration::days(3));
        save_company(&pool, &stale).await.unwrap();

        let mut fresh = Company::new("Fresh".to_string());
        fresh.domain = Some("fresh.test".to_string());
        fresh.ats_type = AtsType::Lever;
        fresh.ats_identifier = Some("fresh".to_string());
        fresh.last_crawled_at = Some(Utc::now());
        save_company(&pool, &fresh).await.unwrap();

        let mut never = Company::new("Never".to_string());
        never.domain = Some("never.test".to_string());
        never.ats_type = AtsType::Lever;
        never.ats_identifier = Some("never".to_string());
        save_company(&pool, &never).await.unwrap();

        let due = due_for_crawl(&pool, Some(AtsType::Lever), 24, 10).await.unwrap();
        let names: Vec<&str> = due.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Never", "Stale"]);
    }

    #[tokio::test]
    async fn not_found_streak_counts_and_resets() {
        let pool = init_memory_database().await.unwrap();
        let company = Company::new("Gone".to_string());
        save_company(&pool, &company).await.unwrap();

        assert_eq!(record_careers_not_found(&pool, company.id).await.unwrap(), 1);
        assert_eq!(record_careers_not_found(&pool, company.id).await.unwrap(), 2);

        reset_careers_not_found(&pool, company.id).await.unwrap();
        assert_eq!(record_careers_not_found(&pool, company.id).await.unwrap(), 1);
    }
}
