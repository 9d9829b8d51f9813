//! HTTP surface tests against a live in-process server

use std::sync::Arc;

use jobscout_common::Config;
use jobscout_engine::db::companies::{self, Company};
use jobscout_engine::db::jobs::{self, Job};
use jobscout_engine::db;
use jobscout_engine::types::{AtsType, RoleFamily, Seniority};
use jobscout_engine::{build_router, AppState};
use uuid::Uuid;

/// Spin up the router on an ephemeral port; returns base URL and state.
async fn serve() -> (String, AppState) {
    let pool = db::init_memory_database().await.unwrap();
    let state = AppState::new(pool, Config::from_env()).unwrap();

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

fn catalog_job(company_id: Uuid, url: &str, title: &str, seniority: Seniority) -> Job {
    Job {
        id: Uuid::new_v4(),
        company_id,
        raw_job_id: None,
        title: title.to_string(),
        description: None,
        source_url: url.to_string(),
        role_family: RoleFamily::SoftwareEngineering,
        role_specialization: None,
        seniority: Some(seniority),
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
    }
}

async fn seed_catalog(state: &AppState) -> (Company, Uuid) {
    let mut company = Company::new("Acme".to_string());
    company.domain = Some("acme.test".to_string());
    company.ats_type = AtsType::Greenhouse;
    company.ats_identifier = Some("acme".to_string());
    companies::save_company(&state.db, &company).await.unwrap();

    let job_id = jobs::upsert_job(
        &state.db,
        &catalog_job(
            company.id,
            "https://boards.greenhouse.io/acme/jobs/1",
            "Senior Software Engineer",
            Seniority::Senior,
        ),
    )
    .await
    .unwrap();

    jobs::upsert_job(
        &state.db,
        &catalog_job(
            company.id,
            "https://boards.greenhouse.io/acme/jobs/2",
            "Junior Designer",
            Seniority::Junior,
        ),
    )
    .await
    .unwrap();

    (company, job_id)
}

#[tokio::test]
async fn jobs_listing_paginates_and_filters() {
    let (base, state) = serve().await;
    seed_catalog(&state).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{base}/api/jobs?page=1&page_size=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(body["has_more"], true);

    let body: serde_json::Value = client
        .get(format!("{base}/api/jobs?seniority=senior"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(
        body["jobs"][0]["title"],
        "Senior Software Engineer"
    );
    assert_eq!(body["jobs"][0]["company"]["name"], "Acme");

    // Unknown filter values are a 400 with a detail payload
    let response = client
        .get(format!("{base}/api/jobs?seniority=wizard"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("seniority"));
}

#[tokio::test]
async fn job_detail_and_not_found_shape() {
    let (base, state) = serve().await;
    let (_, job_id) = seed_catalog(&state).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{base}/api/jobs/{job_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["id"], job_id.to_string());
    assert_eq!(body["company"]["name"], "Acme");

    let response = client
        .get(format!("{base}/api/jobs/{}", Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().is_some());
}

#[tokio::test]
async fn waitlist_sync_then_matches_explains_empty_catalog() {
    let (base, _state) = serve().await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{base}/api/candidates/sync-from-waitlist"))
        .json(&serde_json::json!({
            "email": "dev@example.test",
            "name": "Dev",
            "role_families": ["software_engineering"],
            "seniority": "senior"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let candidate_id = created["id"].as_str().unwrap().to_string();

    // Same email syncs into the same profile
    let again: serde_json::Value = client
        .post(format!("{base}/api/candidates/sync-from-waitlist"))
        .json(&serde_json::json!({"email": "dev@example.test", "seniority": "staff"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["id"], created["id"]);
    assert_eq!(again["seniority"], "staff");

    let matches: serde_json::Value = client
        .get(format!("{base}/api/candidates/{candidate_id}/matches"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(matches["matches"].as_array().unwrap().len(), 0);
    assert_eq!(matches["no_matches_reason"], "empty_catalog");
}

#[tokio::test]
async fn candidate_patch_updates_preferences() {
    let (base, _state) = serve().await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{base}/api/candidates/sync-from-waitlist"))
        .json(&serde_json::json!({"email": "patch@example.test"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let candidate_id = created["id"].as_str().unwrap();

    let patched: serde_json::Value = client
        .patch(format!("{base}/api/candidates/{candidate_id}"))
        .json(&serde_json::json!({
            "min_salary": 150000,
            "skills": ["rust", "sql"],
            "exclusions": ["Initech"]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(patched["min_salary"], 150000);
    assert_eq!(patched["skills"].as_array().unwrap().len(), 2);
    assert_eq!(patched["exclusions"][0], "Initech");
}

#[tokio::test]
async fn pipeline_status_lists_running_operations_and_run_conflicts() {
    let (base, state) = serve().await;
    let client = reqwest::Client::new();

    // Two concurrent independent operations
    let _crawl = Arc::clone(&state.pipeline.registry)
        .try_start("crawl_greenhouse", None)
        .unwrap();
    let _embeddings = Arc::clone(&state.pipeline.registry)
        .try_start("embeddings", None)
        .unwrap();

    let status: serde_json::Value = client
        .get(format!("{base}/api/admin/pipeline/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let running = status["running_operations"].as_array().unwrap();
    assert_eq!(running.len(), 2);
    assert_eq!(status["pipeline"]["any_running"], true);

    // Full pipeline refuses to start while anything runs
    let response = client
        .post(format!("{base}/api/admin/pipeline/run"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("full_pipeline"));
}

#[tokio::test]
async fn scheduler_start_stop_round_trip() {
    let (base, _state) = serve().await;
    let client = reqwest::Client::new();

    let started: serde_json::Value = client
        .post(format!("{base}/api/admin/scheduler/start?interval_hours=12"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["running"], true);
    assert_eq!(started["interval_hours"], 12);

    // Second start is a no-op and keeps the original interval
    let again: serde_json::Value = client
        .post(format!("{base}/api/admin/scheduler/start?interval_hours=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["interval_hours"], 12);

    let stopped: serde_json::Value = client
        .post(format!("{base}/api/admin/scheduler/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["running"], false);
}

#[tokio::test]
async fn analytics_validates_window() {
    let (base, _state) = serve().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/api/admin/analytics?days=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let report: serde_json::Value = client
        .get(format!("{base}/api/admin/analytics?days=7"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["days"], 7);
    assert!(report["jobs_created"].is_array());
}
