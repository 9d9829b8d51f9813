//! Maintenance: re-verify active jobs and delist removed ones
//!
//! For each company not checked within the window, the listing is
//! re-read through the fetcher + extractor. Jobs still present get
//! `last_verified_at` bumped, absent jobs are delisted, newly appeared
//! jobs are ingested. A careers URL that answers not_found on two
//! consecutive runs deactivates the company.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::db::companies::{self, Company};
use crate::db::jobs;
use crate::db::jobs_raw;
use crate::extract::{ExtractError, ExtractedJob, ExtractorRegistry};
use crate::fetch::{FetchError, Fetcher};
use crate::normalize;
use crate::types::DelistReason;

/// Consecutive not_found results that deactivate a company.
const NOT_FOUND_DEACTIVATION_STREAK: i64 = 2;

/// Outcome of one maintenance pass.
#[derive(Debug, Default, serde::Serialize)]
pub struct MaintenanceStats {
    pub companies_checked: usize,
    pub jobs_verified: usize,
    pub jobs_new: usize,
    pub jobs_delisted: usize,
    pub companies_deactivated: usize,
    pub errors: usize,
}

/// Outcome of reconciling one company.
#[derive(Debug, Default)]
pub struct ReconcileResult {
    pub verified: usize,
    pub new: usize,
    pub delisted: usize,
}

/// Normalize a URL for presence comparison: scheme-insensitive host+path,
/// no query, no trailing slash.
pub fn comparable_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let stripped = without_query
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    stripped.trim_end_matches('/').to_lowercase()
}

/// Reconcile a company's stored jobs against the listing as currently
/// extracted. Pure with respect to the network: callers hand in the
/// extracted set.
pub async fn reconcile_company_jobs(
    pool: &SqlitePool,
    company: &Company,
    extracted: Vec<ExtractedJob>,
) -> anyhow::Result<ReconcileResult> {
    let mut result = ReconcileResult::default();
    let now = Utc::now();

    let current_urls: HashSet<String> = extracted
        .iter()
        .map(|job| comparable_url(&job.source_url))
        .collect();

    let existing = jobs::active_jobs_for_company(pool, company.id).await?;
    let existing_urls: HashSet<String> = existing
        .iter()
        .map(|job| comparable_url(&job.source_url))
        .collect();

    for job in &existing {
        let key = comparable_url(&job.source_url);
        if current_urls.contains(&key) {
            jobs::touch_verified(pool, job.id).await?;
            result.verified += 1;
        } else {
            jobs::delist_job(pool, job.id, DelistReason::RemovedFromAts).await?;
            result.delisted += 1;
        }
    }

    // Ingest listings we have not seen before
    for job in extracted {
        if existing_urls.contains(&comparable_url(&job.source_url)) {
            continue;
        }
        let mut raw = jobs_raw::RawJob::new(company.id, job.source_url.clone());
        raw.title_raw = Some(job.title);
        raw.description_raw = job.description;
        raw.location_raw = job.location;
        raw.department_raw = job.department;
        raw.employment_type_raw = job.employment_type;
        raw.posted_at_raw = job.posted_at;
        raw.salary_raw = job.salary;
        raw.extracted_at = Some(now);

        let raw_id = jobs_raw::upsert_raw_job(pool, &raw).await?;
        raw.id = raw_id;
        let canonical = normalize::normalize(&raw, now);
        jobs::upsert_job(pool, &canonical).await?;
        result.new += 1;
    }

    companies::touch_maintained(pool, company.id).await?;

    if result.delisted > 0 || result.new > 0 {
        tracing::info!(
            company = %company.name,
            verified = result.verified,
            new = result.new,
            delisted = result.delisted,
            "Maintenance reconciled company"
        );
    }

    Ok(result)
}

/// Handle a not_found careers URL: count the streak and deactivate on the
/// second consecutive miss. Returns true when the company was
/// deactivated.
pub async fn handle_careers_not_found(pool: &SqlitePool, company: &Company) -> anyhow::Result<bool> {
    let streak = companies::record_careers_not_found(pool, company.id).await?;
    companies::touch_maintained(pool, company.id).await?;

    if streak >= NOT_FOUND_DEACTIVATION_STREAK {
        companies::deactivate(pool, company.id).await?;
        let delisted =
            jobs::delist_company_jobs(pool, company.id, DelistReason::CompanyInactive).await?;
        tracing::warn!(
            company = %company.name,
            streak,
            delisted,
            "Careers URL gone, company deactivated"
        );
        return Ok(true);
    }

    tracing::warn!(company = %company.name, streak, "Careers URL returned not_found");
    Ok(false)
}

/// One maintenance pass over companies due for re-verification.
pub async fn run_maintenance(
    pool: &SqlitePool,
    fetcher: &Fetcher,
    registry: &ExtractorRegistry,
    window_days: i64,
    limit: i64,
) -> anyhow::Result<MaintenanceStats> {
    let mut stats = MaintenanceStats::default();
    let due = companies::due_for_maintenance(pool, window_days, limit).await?;

    for company in due {
        let Some(extractor) = registry.for_ats(company.ats_type) else {
            continue;
        };

        match extractor.list(fetcher, &company).await {
            Ok(extracted) => {
                companies::reset_careers_not_found(pool, company.id).await?;
                match reconcile_company_jobs(pool, &company, extracted).await {
                    Ok(result) => {
                        stats.companies_checked += 1;
                        stats.jobs_verified += result.verified;
                        stats.jobs_new += result.new;
                        stats.jobs_delisted += result.delisted;
                    }
                    Err(error) => {
                        tracing::error!(company = %company.name, error = %error, "Reconcile failed");
                        stats.errors += 1;
                    }
                }
            }
            Err(ExtractError::Fetch(FetchError::NotFound)) => {
                stats.companies_checked += 1;
                match handle_careers_not_found(pool, &company).await {
                    Ok(true) => stats.companies_deactivated += 1,
                    Ok(false) => {}
                    Err(error) => {
                        tracing::error!(company = %company.name, error = %error, "not_found handling failed");
                        stats.errors += 1;
                    }
                }
            }
            Err(error) => {
                // Transient failures never delist anything
                tracing::warn!(company = %company.name, error = %error, "Maintenance listing failed");
                stats.errors += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::companies::save_company;
    use crate::db::init_memory_database;
    use crate::types::AtsType;

    fn extracted(url: &str, title: &str) -> ExtractedJob {
        ExtractedJob {
            title: title.to_string(),
            source_url: url.to_string(),
            ..Default::default()
        }
    }

    async fn seeded_company(pool: &SqlitePool) -> Company {
        let mut company = Company::new("Acme".into());
        company.domain = Some("acme.test".into());
        company.ats_type = AtsType::Greenhouse;
        company.ats_identifier = Some("acme".into());
        save_company(pool, &company).await.unwrap();
        company
    }

    #[test]
    fn url_comparison_ignores_noise() {
        assert_eq!(
            comparable_url("https://Boards.Greenhouse.io/acme/jobs/1/"),
            comparable_url("http://boards.greenhouse.io/acme/jobs/1?utm=x")
        );
    }

    #[tokio::test]
    async fn absent_jobs_are_delisted_present_ones_verified() {
        let pool = init_memory_database().await.unwrap();
        let company = seeded_company(&pool).await;

        // First listing: two jobs
        let first = vec![
            extracted("https://boards.greenhouse.io/acme/jobs/1", "Engineer"),
            extracted("https://boards.greenhouse.io/acme/jobs/2", "Designer"),
        ];
        let result = reconcile_company_jobs(&pool, &company, first).await.unwrap();
        assert_eq!(result.new, 2);

        // Second listing: job 2 vanished
        let second = vec![extracted("https://boards.greenhouse.io/acme/jobs/1", "Engineer")];
        let result = reconcile_company_jobs(&pool, &company, second).await.unwrap();
        assert_eq!(result.verified, 1);
        assert_eq!(result.delisted, 1);
        assert_eq!(result.new, 0);

        let remaining = jobs::active_jobs_for_company(&pool, company.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source_url, "https://boards.greenhouse.io/acme/jobs/1");
        assert!(remaining[0].last_verified_at.is_some());

        // The delisted job carries reason and timestamp
        let (all, _) = jobs::list_jobs(&pool, &Default::default(), 1, 50).await.unwrap();
        assert_eq!(all.len(), 1); // listing only shows active
    }

    #[tokio::test]
    async fn two_consecutive_not_found_runs_deactivate() {
        let pool = init_memory_database().await.unwrap();
        let company = seeded_company(&pool).await;

        reconcile_company_jobs(
            &pool,
            &company,
            vec![extracted("https://boards.greenhouse.io/acme/jobs/1", "Engineer")],
        )
        .await
        .unwrap();

        assert!(!handle_careers_not_found(&pool, &company).await.unwrap());
        assert!(handle_careers_not_found(&pool, &company).await.unwrap());

        let reloaded = companies::load_company(&pool, company.id).await.unwrap().unwrap();
        assert!(!reloaded.is_active);

        let active = jobs::active_jobs_for_company(&pool, company.id).await.unwrap();
        assert!(active.is_empty());
    }
}
