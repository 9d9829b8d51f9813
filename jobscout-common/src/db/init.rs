//! Database initialization
//!
//! Creates the database on first run and applies the schema idempotently.
//! Replaying the schema on an empty store yields an equivalent system:
//! every uniqueness, cascade and check constraint the engine relies on is
//! declared here, not in application code.

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    apply_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database with the full schema, for tests.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePool::connect("sqlite::memory:").await?;
    apply_schema(&pool).await?;
    Ok(pool)
}

/// Apply pragmas and the full schema. Safe to call repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_companies_table(pool).await?;
    create_crawl_snapshots_table(pool).await?;
    create_jobs_raw_table(pool).await?;
    create_jobs_table(pool).await?;
    create_candidate_profiles_table(pool).await?;
    create_matches_table(pool).await?;
    create_pipeline_runs_table(pool).await?;
    create_discovery_queue_table(pool).await?;

    Ok(())
}

async fn create_companies_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            domain TEXT UNIQUE,
            careers_url TEXT,
            website_url TEXT,
            ats_type TEXT,
            ats_identifier TEXT,
            crawl_priority INTEGER NOT NULL DEFAULT 50,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_crawled_at TEXT,
            last_maintenance_at TEXT,
            crawl_attempts INTEGER NOT NULL DEFAULT 0,
            careers_not_found_streak INTEGER NOT NULL DEFAULT 0,
            discovery_source TEXT,
            discovered_at TEXT,
            country TEXT,
            location TEXT,
            description TEXT,
            industry TEXT,
            employee_count INTEGER,
            funding_stage TEXT,
            ats_detection_attempts INTEGER NOT NULL DEFAULT 0,
            ats_detection_last_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            CHECK (
                ats_type NOT IN ('greenhouse', 'lever', 'ashby', 'workday')
                OR (ats_identifier IS NOT NULL AND ats_identifier != '')
            )
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_companies_crawl_due
         ON companies (is_active, ats_type, last_crawled_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_crawl_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawl_snapshots (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            html_hash TEXT,
            html_content TEXT,
            status_code INTEGER,
            rendered INTEGER NOT NULL DEFAULT 0,
            crawled_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_company_url
         ON crawl_snapshots (company_id, url, crawled_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_jobs_raw_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs_raw (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
            source_url TEXT NOT NULL,
            title_raw TEXT,
            description_raw TEXT,
            location_raw TEXT,
            department_raw TEXT,
            employment_type_raw TEXT,
            posted_at_raw TEXT,
            salary_raw TEXT,
            extracted_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (company_id, source_url)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
            raw_job_id TEXT REFERENCES jobs_raw(id) ON DELETE SET NULL,
            title TEXT NOT NULL,
            description TEXT,
            source_url TEXT NOT NULL,
            role_family TEXT NOT NULL,
            role_specialization TEXT,
            seniority TEXT,
            location_type TEXT,
            locations TEXT,
            skills TEXT,
            min_salary INTEGER,
            max_salary INTEGER,
            employment_type TEXT,
            posted_at TEXT,
            freshness_score REAL,
            embedding BLOB,
            embedding_model_version TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_verified_at TEXT,
            delisted_at TEXT,
            delist_reason TEXT,
            enrich_failed_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (company_id, source_url),
            CHECK (min_salary IS NULL OR max_salary IS NULL OR min_salary <= max_salary)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_active ON jobs (is_active, role_family)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_candidate_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS candidate_profiles (
            id TEXT PRIMARY KEY,
            waitlist_id TEXT UNIQUE,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            role_families TEXT,
            seniority TEXT,
            min_salary INTEGER,
            locations TEXT,
            location_types TEXT,
            role_types TEXT,
            skills TEXT,
            exclusions TEXT,
            profile_text TEXT,
            embedding BLOB,
            embedding_model_version TEXT,
            last_matched_at TEXT,
            last_notified_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_matches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            candidate_id TEXT NOT NULL REFERENCES candidate_profiles(id) ON DELETE CASCADE,
            job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            score REAL NOT NULL CHECK (score >= 0.0 AND score <= 1.0),
            hard_match INTEGER NOT NULL DEFAULT 0,
            match_reasons TEXT,
            shown_at TEXT,
            clicked_at TEXT,
            applied_at TEXT,
            dismissed_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (candidate_id, job_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pipeline_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id TEXT PRIMARY KEY,
            stage TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running',
            processed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            current_step TEXT,
            logs TEXT NOT NULL DEFAULT '[]',
            error TEXT,
            "cascade" INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL DEFAULT (datetime('now')),
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_discovery_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS discovery_queue (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            domain TEXT,
            dedupe_key TEXT NOT NULL UNIQUE,
            careers_url TEXT,
            website_url TEXT,
            source TEXT NOT NULL,
            source_url TEXT,
            location TEXT,
            country TEXT,
            description TEXT,
            industry TEXT,
            employee_count INTEGER,
            funding_stage TEXT,
            ats_type TEXT,
            ats_identifier TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            processed_at TEXT,
            company_id TEXT REFERENCES companies(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_discovery_queue_status ON discovery_queue (status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        // Applying again must not fail
        apply_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn creates_database_file_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobscout.db");

        let pool = init_database(&path).await.unwrap();
        assert!(path.exists());

        // Reopening an existing database also works
        drop(pool);
        init_database(&path).await.unwrap();
    }

    #[tokio::test]
    async fn vendor_ats_requires_identifier() {
        let pool = init_memory_database().await.unwrap();

        let bad = sqlx::query(
            "INSERT INTO companies (id, name, ats_type) VALUES ('c1', 'Acme', 'greenhouse')",
        )
        .execute(&pool)
        .await;
        assert!(bad.is_err());

        let ok = sqlx::query(
            "INSERT INTO companies (id, name, ats_type, ats_identifier)
             VALUES ('c1', 'Acme', 'greenhouse', 'acme')",
        )
        .execute(&pool)
        .await;
        assert!(ok.is_ok());

        // custom/unknown carry no identifier requirement
        let custom = sqlx::query(
            "INSERT INTO companies (id, name, ats_type) VALUES ('c2', 'Beta', 'custom')",
        )
        .execute(&pool)
        .await;
        assert!(custom.is_ok());
    }

    #[tokio::test]
    async fn salary_check_constraint_enforced() {
        let pool = init_memory_database().await.unwrap();

        sqlx::query("INSERT INTO companies (id, name) VALUES ('c1', 'Acme')")
            .execute(&pool)
            .await
            .unwrap();

        let bad = sqlx::query(
            "INSERT INTO jobs (id, company_id, title, source_url, role_family, min_salary, max_salary)
             VALUES ('j1', 'c1', 'Engineer', 'https://x/1', 'software_engineering', 200, 100)",
        )
        .execute(&pool)
        .await;
        assert!(bad.is_err());

        let ok = sqlx::query(
            "INSERT INTO jobs (id, company_id, title, source_url, role_family, min_salary, max_salary)
             VALUES ('j1', 'c1', 'Engineer', 'https://x/1', 'software_engineering', 100, 200)",
        )
        .execute(&pool)
        .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn cascade_delete_company_removes_children() {
        let pool = init_memory_database().await.unwrap();

        sqlx::query("INSERT INTO companies (id, name) VALUES ('c1', 'Acme')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO jobs_raw (id, company_id, source_url) VALUES ('r1', 'c1', 'https://x/1')",
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("DELETE FROM companies WHERE id = 'c1'")
            .execute(&pool)
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs_raw")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
