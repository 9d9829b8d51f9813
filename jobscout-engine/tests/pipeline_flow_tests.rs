//! End-to-end flows over an in-memory database
//!
//! Exercises ingestion, change detection, delisting and matching with
//! upstream responses supplied as fixtures.

use chrono::Utc;
use uuid::Uuid;

use jobscout_engine::db::companies::{self, Company};
use jobscout_engine::db::candidates::{self, CandidateProfile};
use jobscout_engine::db::jobs::{self, Job};
use jobscout_engine::db::matches;
use jobscout_engine::db::snapshots::{self, CrawlSnapshot};
use jobscout_engine::db::{self, jobs_raw};
use jobscout_engine::extract::parse_greenhouse_board;
use jobscout_engine::fetch::content_hash;
use jobscout_engine::maintenance::reconcile_company_jobs;
use jobscout_engine::matching::{self, MatchOptions, NoMatchesReason};
use jobscout_engine::normalize;
use jobscout_engine::types::{AtsType, DelistReason, RoleFamily, Seniority};

const GREENHOUSE_BOARD: &str = r#"{
    "jobs": [
        {
            "id": 1,
            "title": "Senior Software Engineer",
            "absolute_url": "https://boards.greenhouse.io/acme/jobs/1",
            "location": {"name": "Remote - US"},
            "departments": [{"name": "Engineering"}],
            "updated_at": "2025-07-25T00:00:00Z"
        },
        {
            "id": 2,
            "title": "Junior Software Engineer",
            "absolute_url": "https://boards.greenhouse.io/acme/jobs/2",
            "location": {"name": "Remote - US"},
            "departments": [{"name": "Engineering"}]
        }
    ]
}"#;

async fn greenhouse_company(pool: &sqlx::SqlitePool) -> Company {
    let mut company = Company::new("Acme".to_string());
    company.domain = Some("acme.test".to_string());
    company.ats_type = AtsType::Greenhouse;
    company.ats_identifier = Some("acme".to_string());
    company.careers_url = Some("https://boards.greenhouse.io/acme".to_string());
    companies::save_company(pool, &company).await.unwrap();
    company
}

#[tokio::test]
async fn fresh_greenhouse_company_yields_raw_and_canonical_jobs() {
    let pool = db::init_memory_database().await.unwrap();
    let company = greenhouse_company(&pool).await;

    let extracted = parse_greenhouse_board(GREENHOUSE_BOARD).unwrap();
    assert_eq!(extracted.len(), 2);

    let result = reconcile_company_jobs(&pool, &company, extracted).await.unwrap();
    assert_eq!(result.new, 2);

    let raw_count = jobs_raw::count_raw_jobs(&pool).await.unwrap();
    assert_eq!(raw_count, 2);

    let active = jobs::active_jobs_for_company(&pool, company.id).await.unwrap();
    assert_eq!(active.len(), 2);

    let senior = active
        .iter()
        .find(|job| job.title == "Senior Software Engineer")
        .unwrap();
    assert_eq!(senior.role_family, RoleFamily::SoftwareEngineering);
    assert_eq!(senior.seniority, Some(Seniority::Senior));

    // freshness_score = 0.5^(age_days / 7) for the dated posting
    let posted = senior.posted_at.expect("posted_at parsed");
    let age_days = (Utc::now() - posted).num_seconds() as f64 / 86_400.0;
    let expected = 0.5f64.powf(age_days / 7.0);
    assert!((senior.freshness_score.unwrap() - expected).abs() < 1e-3);
}

#[tokio::test]
async fn unchanged_recrawl_writes_no_second_snapshot() {
    let pool = db::init_memory_database().await.unwrap();
    let company = greenhouse_company(&pool).await;
    let url = "https://boards-api.greenhouse.io/v1/boards/acme/jobs";

    // First crawl: body is new, snapshot persists
    let digest = content_hash(GREENHOUSE_BOARD);
    assert!(snapshots::latest_hash(&pool, company.id, url).await.unwrap().is_none());
    let snapshot = CrawlSnapshot::new(company.id, url.into(), GREENHOUSE_BOARD.into(), 200, false);
    snapshots::insert_snapshot(&pool, &snapshot).await.unwrap();
    companies::touch_crawled(&pool, company.id).await.unwrap();
    let first_crawled_at = companies::load_company(&pool, company.id)
        .await
        .unwrap()
        .unwrap()
        .last_crawled_at
        .unwrap();

    // Second crawl with identical upstream: digest matches, no insert,
    // but the crawl clock still advances
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let previous = snapshots::latest_hash(&pool, company.id, url).await.unwrap();
    assert_eq!(previous.as_deref(), Some(digest.as_str()));
    companies::touch_crawled(&pool, company.id).await.unwrap();

    assert_eq!(snapshots::count_for_url(&pool, company.id, url).await.unwrap(), 1);
    let second_crawled_at = companies::load_company(&pool, company.id)
        .await
        .unwrap()
        .unwrap()
        .last_crawled_at
        .unwrap();
    assert!(second_crawled_at > first_crawled_at);
}

#[tokio::test]
async fn job_removed_upstream_is_delisted_with_reason() {
    let pool = db::init_memory_database().await.unwrap();
    let company = greenhouse_company(&pool).await;

    let first = parse_greenhouse_board(GREENHOUSE_BOARD).unwrap();
    reconcile_company_jobs(&pool, &company, first).await.unwrap();

    // Upstream mutated: the junior posting is gone
    let without_junior = r#"{
        "jobs": [
            {
                "id": 1,
                "title": "Senior Software Engineer",
                "absolute_url": "https://boards.greenhouse.io/acme/jobs/1",
                "location": {"name": "Remote - US"}
            }
        ]
    }"#;
    let second = parse_greenhouse_board(without_junior).unwrap();
    let result = reconcile_company_jobs(&pool, &company, second).await.unwrap();
    assert_eq!(result.delisted, 1);
    assert_eq!(result.verified, 1);

    let active = jobs::active_jobs_for_company(&pool, company.id).await.unwrap();
    assert_eq!(active.len(), 1);

    // Find the delisted row and check its reason + timestamp
    let all_rows: Vec<(String, i64, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT title, is_active, delist_reason, delisted_at FROM jobs ORDER BY title",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    let junior = all_rows
        .iter()
        .find(|(title, _, _, _)| title == "Junior Software Engineer")
        .unwrap();
    assert_eq!(junior.1, 0);
    assert_eq!(junior.2.as_deref(), Some(DelistReason::RemovedFromAts.as_str()));
    assert!(junior.3.is_some());
}

fn seeded_job(company_id: Uuid, url: &str, title: &str, seniority: Seniority) -> Job {
    Job {
        id: Uuid::new_v4(),
        company_id,
        raw_job_id: None,
        title: title.to_string(),
        description: Some("Ship Rust services".to_string()),
        source_url: url.to_string(),
        role_family: RoleFamily::SoftwareEngineering,
        role_specialization: None,
        seniority: Some(seniority),
        location_type: None,
        locations: vec![],
        skills: vec!["rust".to_string()],
        min_salary: None,
        max_salary: None,
        employment_type: None,
        posted_at: None,
        freshness_score: Some(0.8),
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
async fn hard_filter_drops_out_of_tolerance_seniority() {
    let pool = db::init_memory_database().await.unwrap();
    let company = greenhouse_company(&pool).await;

    let senior_id = jobs::upsert_job(
        &pool,
        &seeded_job(company.id, "https://x/jobs/senior", "Senior Engineer", Seniority::Senior),
    )
    .await
    .unwrap();
    let junior_id = jobs::upsert_job(
        &pool,
        &seeded_job(company.id, "https://x/jobs/junior", "Junior Engineer", Seniority::Junior),
    )
    .await
    .unwrap();

    // Shared direction in vector space: both jobs retrieve
    jobs::set_embedding(&pool, senior_id, &[1.0, 0.0], "v1").await.unwrap();
    jobs::set_embedding(&pool, junior_id, &[0.9, 0.1], "v1").await.unwrap();

    let mut profile = CandidateProfile::new("senior@example.test".to_string());
    profile.role_families = vec![RoleFamily::SoftwareEngineering];
    profile.seniority = Some(Seniority::Senior);
    let candidate_id = candidates::upsert_profile(&pool, &profile).await.unwrap();
    candidates::set_embedding(&pool, candidate_id, &[1.0, 0.0], "v1").await.unwrap();

    let outcome = matching::run_matching_for_candidate(
        &pool,
        candidate_id,
        &MatchOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.matches.len(), 1);
    assert_eq!(outcome.matches[0].job.id, senior_id);
    assert!(outcome.matches[0].hard_match);
    assert!(outcome.matches[0].score > 0.0 && outcome.matches[0].score <= 1.0);

    // Persisted: exactly one (candidate, job) row
    let (stored, total) = matches::list_for_candidate(&pool, candidate_id, 0.0, 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(stored[0].job_id, senior_id);

    // Re-running overwrites the score but never duplicates the pair
    matching::run_matching_for_candidate(&pool, candidate_id, &MatchOptions::default())
        .await
        .unwrap();
    assert_eq!(matches::count_matches(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn empty_catalog_reports_structured_reason() {
    let pool = db::init_memory_database().await.unwrap();

    let mut profile = CandidateProfile::new("hopeful@example.test".to_string());
    profile.role_families = vec![RoleFamily::Data];
    let candidate_id = candidates::upsert_profile(&pool, &profile).await.unwrap();
    candidates::set_embedding(&pool, candidate_id, &[0.5, 0.5], "v1").await.unwrap();

    let candidate = candidates::load_profile(&pool, candidate_id).await.unwrap().unwrap();
    let outcome = matching::match_candidate(&pool, &candidate, &MatchOptions::default())
        .await
        .unwrap();

    assert!(outcome.matches.is_empty());
    assert_eq!(outcome.no_matches_reason, Some(NoMatchesReason::EmptyCatalog));
}

#[tokio::test]
async fn vectorless_catalog_reports_no_vector_candidates() {
    let pool = db::init_memory_database().await.unwrap();
    let company = greenhouse_company(&pool).await;

    // Active job without an embedding
    jobs::upsert_job(
        &pool,
        &seeded_job(company.id, "https://x/jobs/1", "Engineer", Seniority::Mid),
    )
    .await
    .unwrap();

    let mut profile = CandidateProfile::new("dev@example.test".to_string());
    let candidate_id = candidates::upsert_profile(&pool, &profile).await.unwrap();
    candidates::set_embedding(&pool, candidate_id, &[1.0, 0.0], "v1").await.unwrap();
    profile = candidates::load_profile(&pool, candidate_id).await.unwrap().unwrap();

    let outcome = matching::match_candidate(&pool, &profile, &MatchOptions::default())
        .await
        .unwrap();
    assert_eq!(
        outcome.no_matches_reason,
        Some(NoMatchesReason::NoVectorCandidates)
    );
}

#[tokio::test]
async fn normalizer_is_reproducible_over_persisted_raw_rows() {
    let pool = db::init_memory_database().await.unwrap();
    let company = greenhouse_company(&pool).await;

    let mut raw = jobs_raw::RawJob::new(company.id, "https://x/jobs/1".to_string());
    raw.title_raw = Some("Staff Platform Engineer".to_string());
    raw.description_raw = Some("Kubernetes, Terraform and Go. $190k-$230k.".to_string());
    raw.location_raw = Some("Hybrid - Seattle".to_string());
    raw.salary_raw = Some("$190k-$230k".to_string());
    let raw_id = jobs_raw::upsert_raw_job(&pool, &raw).await.unwrap();
    raw.id = raw_id;

    let now = Utc::now();
    let first = normalize::normalize(&raw, now);
    let second = normalize::normalize(&raw, now);

    assert_eq!(first.role_family, second.role_family);
    assert_eq!(first.skills, second.skills);
    assert_eq!(first.min_salary, Some(190_000));
    assert_eq!(first.max_salary, Some(230_000));
    assert_eq!(first.freshness_score, second.freshness_score);
}
