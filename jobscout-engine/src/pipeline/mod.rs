//! Pipeline orchestrator
//!
//! Composes the stages (discovery → crawl → enrichment → embeddings, plus
//! maintenance and matching) over the run registry. Stages run
//! independently, sequentially inside a full pipeline, or on the
//! scheduler's cadence. Every launched operation owns a registry key, a
//! durable pipeline_runs row and a cancellation token.

pub mod registry;
pub mod run_log;
pub mod scheduler;

pub use registry::{OperationGuard, OperationRegistry, OperationStatus};
pub use run_log::RunLogger;
pub use scheduler::PipelineScheduler;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use jobscout_common::{Config, Error};

use crate::db::{companies, discovery_queue, jobs, jobs_raw, matches, runs, snapshots};
use crate::detect::AtsDetector;
use crate::discovery::{self, AtsDirectorySource, SeedListSource, SourceRegistry};
use crate::embed::{self, EmbeddingClient};
use crate::extract::{
    self, enrich, ExtractError, ExtractedJob, ExtractorRegistry, LlmExtractor,
};
use crate::fetch::{content_hash, FetchError, Fetcher};
use crate::maintenance;
use crate::matching::{self, MatchOptions};
use crate::types::{AtsType, DelistReason, RunStatus};

/// Per-company crawl budget.
const COMPANY_CRAWL_TIMEOUT: Duration = Duration::from_secs(120);

/// Companies claimed per crawl batch.
const CRAWL_BATCH_SIZE: i64 = 50;

/// Jobs claimed per enrichment batch.
const ENRICH_BATCH_SIZE: i64 = 100;

/// Stage-level skip flags for a full run.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FullPipelineFlags {
    #[serde(default)]
    pub skip_discovery: bool,
    #[serde(default)]
    pub skip_crawl: bool,
    #[serde(default)]
    pub skip_enrichment: bool,
    #[serde(default)]
    pub skip_embeddings: bool,
}

/// Counters a stage reports back into its run row.
#[derive(Debug, Default)]
struct StageCounts {
    processed: i64,
    failed: i64,
}

/// The orchestrator. One per process, shared behind `Arc`.
pub struct Pipeline {
    pool: SqlitePool,
    config: Config,
    fetcher: Arc<Fetcher>,
    extractors: Arc<ExtractorRegistry>,
    sources: Arc<SourceRegistry>,
    embedder: Arc<EmbeddingClient>,
    pub registry: Arc<OperationRegistry>,
    /// Start of the most recent full run; the enrichment skip window
    /// resets here.
    last_full_run_started: Mutex<Option<DateTime<Utc>>>,
}

impl Pipeline {
    pub fn new(pool: SqlitePool, config: Config) -> anyhow::Result<Arc<Self>> {
        let fetcher = Arc::new(Fetcher::new(&config)?);
        let extractors = Arc::new(ExtractorRegistry::new(LlmExtractor::new(&config)));
        let sources = Arc::new(SourceRegistry::new(vec![
            Box::new(SeedListSource),
            Box::new(AtsDirectorySource::new(Arc::clone(&fetcher))),
        ]));
        let embedder = Arc::new(EmbeddingClient::new(&config));

        Ok(Arc::new(Self {
            pool,
            config,
            fetcher,
            extractors,
            sources,
            embedder,
            registry: OperationRegistry::new(),
            last_full_run_started: Mutex::new(None),
        }))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    pub fn embedder(&self) -> &Arc<EmbeddingClient> {
        &self.embedder
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.source_names()
    }

    /// On process start, close any `running` rows left by a previous
    /// process.
    pub async fn reconcile_orphaned_runs(&self) -> anyhow::Result<()> {
        let orphaned = runs::fail_orphaned_runs(&self.pool).await?;
        if orphaned > 0 {
            tracing::warn!(orphaned, "Marked orphaned pipeline runs as failed");
        }
        Ok(())
    }

    /// Claim an operation key and open its durable run row. The row is
    /// written first; terminal transitions run in the opposite order
    /// (guard drop clears the registry, then the row is finalized).
    async fn launch(
        &self,
        operation_type: &str,
        stage: &str,
        cascade: bool,
    ) -> Result<(OperationGuard, RunLogger), Error> {
        if self.registry.is_running(operation_type) {
            return Err(Error::Conflict(format!("{operation_type} already running")));
        }

        let logger = RunLogger::start(
            &self.pool,
            Arc::clone(&self.registry),
            operation_type,
            stage,
            cascade,
        )
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        match Arc::clone(&self.registry).try_start(operation_type, Some(logger.run_id())) {
            Some(guard) => Ok((guard, logger)),
            None => {
                logger
                    .finish(RunStatus::Failed, 0, 0, Some("conflict"))
                    .await;
                Err(Error::Conflict(format!("{operation_type} already running")))
            }
        }
    }

    // -----------------------------------------------------------------
    // Full pipeline
    // -----------------------------------------------------------------

    /// Launch a full pipeline in the background. Conflicts when any
    /// operation is in flight.
    pub async fn start_full_pipeline(
        self: Arc<Self>,
        flags: FullPipelineFlags,
    ) -> Result<Uuid, Error> {
        if self.registry.any_running() {
            return Err(Error::Conflict(
                "cannot start full_pipeline while operations are running".to_string(),
            ));
        }

        let (guard, logger) = self.launch("full_pipeline", "full_pipeline", true).await?;
        let run_id = logger.run_id();
        *self.last_full_run_started.lock() = Some(Utc::now());

        let pipeline = Arc::clone(&self);
        tokio::spawn(async move {
            let cancel = guard.cancel_token();
            pipeline.run_full(flags, &logger, cancel).await;
            drop(guard);
        });

        Ok(run_id)
    }

    async fn run_full(
        &self,
        flags: FullPipelineFlags,
        logger: &RunLogger,
        cancel: CancellationToken,
    ) {
        let mut processed = 0i64;
        let mut failed = 0i64;

        if !flags.skip_discovery && !cancel.is_cancelled() {
            logger.progress("Discovery stage", None, None, None).await;
            let stats = self.sources.run_discovery(&self.pool, None, 100).await;
            logger
                .log(
                    "info",
                    &format!(
                        "Discovery: {} discovered, {} new, {} merged",
                        stats.total_discovered, stats.new_items, stats.merged_items
                    ),
                    None,
                )
                .await;
            match discovery::process_queue(&self.pool, &self.fetcher, 500).await {
                Ok(queue_stats) => {
                    processed += queue_stats.completed as i64;
                    failed += queue_stats.failed as i64;
                    logger
                        .log(
                            "info",
                            &format!(
                                "Queue: {} processed, {} completed, {} skipped, {} failed",
                                queue_stats.processed,
                                queue_stats.completed,
                                queue_stats.skipped,
                                queue_stats.failed
                            ),
                            None,
                        )
                        .await;
                }
                Err(error) => {
                    failed += 1;
                    logger
                        .log("error", &format!("Queue processing failed: {error}"), None)
                        .await;
                }
            }
        }

        if !flags.skip_crawl && !cancel.is_cancelled() {
            // Each ATS type crawls as its own sub-operation
            for ats in AtsType::VENDORS.iter().copied().chain([AtsType::Custom]) {
                if cancel.is_cancelled() {
                    break;
                }
                let operation = format!("crawl_{ats}");
                let Some(sub_guard) =
                    Arc::clone(&self.registry).try_start(&operation, Some(logger.run_id()))
                else {
                    logger
                        .log(
                            "warn",
                            &format!("Skipping {operation}: already running independently"),
                            None,
                        )
                        .await;
                    continue;
                };
                logger
                    .progress(
                        &format!("Crawl stage: {ats}"),
                        Some(processed),
                        Some(failed),
                        None,
                    )
                    .await;
                let counts = self.crawl_stage(Some(ats), logger, &cancel).await;
                processed += counts.processed;
                failed += counts.failed;
                drop(sub_guard);
            }
        }

        if !flags.skip_enrichment && !cancel.is_cancelled() {
            logger
                .progress("Enrichment stage", Some(processed), Some(failed), None)
                .await;
            let counts = self.enrichment_stage(logger, &cancel).await;
            processed += counts.processed;
            failed += counts.failed;
        }

        if !flags.skip_embeddings && !cancel.is_cancelled() {
            logger
                .progress("Embeddings stage", Some(processed), Some(failed), None)
                .await;
            let counts = self.embeddings_stage(logger).await;
            processed += counts.processed;
            failed += counts.failed;
        }

        if cancel.is_cancelled() {
            logger.log("warn", "Full pipeline cancelled", None).await;
            logger
                .finish(RunStatus::Failed, processed, failed, Some("cancelled"))
                .await;
        } else {
            logger.log("info", "Full pipeline complete", None).await;
            logger
                .finish(RunStatus::Completed, processed, failed, None)
                .await;
        }
    }

    // -----------------------------------------------------------------
    // Standalone stage launchers
    // -----------------------------------------------------------------

    pub async fn start_discovery(
        self: Arc<Self>,
        source_names: Option<Vec<String>>,
    ) -> Result<Uuid, Error> {
        let (guard, logger) = self.launch("discovery", "discovery", false).await?;
        let run_id = logger.run_id();

        let pipeline = Arc::clone(&self);
        tokio::spawn(async move {
            let stats = pipeline
                .sources
                .run_discovery(&pipeline.pool, source_names.as_deref(), 100)
                .await;
            let queue = discovery::process_queue(&pipeline.pool, &pipeline.fetcher, 500).await;

            match queue {
                Ok(queue_stats) => {
                    logger
                        .log(
                            "info",
                            &format!(
                                "Discovery complete: {} discovered, queue {} completed / {} skipped / {} failed",
                                stats.total_discovered,
                                queue_stats.completed,
                                queue_stats.skipped,
                                queue_stats.failed
                            ),
                            None,
                        )
                        .await;
                    logger
                        .finish(
                            RunStatus::Completed,
                            queue_stats.completed as i64,
                            queue_stats.failed as i64,
                            None,
                        )
                        .await;
                }
                Err(error) => {
                    logger
                        .finish(RunStatus::Failed, 0, 0, Some(&error.to_string()))
                        .await;
                }
            }
            drop(guard);
        });

        Ok(run_id)
    }

    /// Drain the discovery queue without running sources.
    pub async fn process_discovery_queue(
        &self,
        limit: i64,
    ) -> anyhow::Result<discovery::QueueProcessStats> {
        discovery::process_queue(&self.pool, &self.fetcher, limit).await
    }

    pub async fn start_crawl(self: Arc<Self>, ats_type: Option<AtsType>) -> Result<Uuid, Error> {
        let operation = match ats_type {
            Some(ats) => format!("crawl_{ats}"),
            None => "crawl_all".to_string(),
        };
        let (guard, logger) = self.launch(&operation, &operation, false).await?;
        let run_id = logger.run_id();

        let pipeline = Arc::clone(&self);
        tokio::spawn(async move {
            let cancel = guard.cancel_token();
            let counts = pipeline.crawl_stage(ats_type, &logger, &cancel).await;
            if cancel.is_cancelled() {
                logger
                    .finish(
                        RunStatus::Failed,
                        counts.processed,
                        counts.failed,
                        Some("cancelled"),
                    )
                    .await;
            } else {
                logger
                    .finish(RunStatus::Completed, counts.processed, counts.failed, None)
                    .await;
            }
            drop(guard);
        });

        Ok(run_id)
    }

    pub async fn start_enrichment(self: Arc<Self>) -> Result<Uuid, Error> {
        let (guard, logger) = self.launch("enrich", "enrich", false).await?;
        let run_id = logger.run_id();

        let pipeline = Arc::clone(&self);
        tokio::spawn(async move {
            let cancel = guard.cancel_token();
            let counts = pipeline.enrichment_stage(&logger, &cancel).await;
            let status = if cancel.is_cancelled() {
                RunStatus::Failed
            } else {
                RunStatus::Completed
            };
            logger
                .finish(
                    status,
                    counts.processed,
                    counts.failed,
                    cancel.is_cancelled().then_some("cancelled"),
                )
                .await;
            drop(guard);
        });

        Ok(run_id)
    }

    pub async fn start_embeddings(self: Arc<Self>) -> Result<Uuid, Error> {
        let (guard, logger) = self.launch("embeddings", "embeddings", false).await?;
        let run_id = logger.run_id();

        let pipeline = Arc::clone(&self);
        tokio::spawn(async move {
            let counts = pipeline.embeddings_stage(&logger).await;
            logger
                .finish(RunStatus::Completed, counts.processed, counts.failed, None)
                .await;
            drop(guard);
        });

        Ok(run_id)
    }

    pub async fn start_maintenance(self: Arc<Self>) -> Result<Uuid, Error> {
        let (guard, logger) = self.launch("maintenance", "maintenance", false).await?;
        let run_id = logger.run_id();

        let pipeline = Arc::clone(&self);
        tokio::spawn(async move {
            match maintenance::run_maintenance(
                &pipeline.pool,
                &pipeline.fetcher,
                &pipeline.extractors,
                pipeline.config.verify_refresh_days,
                CRAWL_BATCH_SIZE,
            )
            .await
            {
                Ok(stats) => {
                    logger
                        .log(
                            "info",
                            &format!(
                                "Maintenance: {} checked, {} verified, {} new, {} delisted, {} deactivated",
                                stats.companies_checked,
                                stats.jobs_verified,
                                stats.jobs_new,
                                stats.jobs_delisted,
                                stats.companies_deactivated
                            ),
                            None,
                        )
                        .await;
                    logger
                        .finish(
                            RunStatus::Completed,
                            stats.companies_checked as i64,
                            stats.errors as i64,
                            None,
                        )
                        .await;
                }
                Err(error) => {
                    logger
                        .finish(RunStatus::Failed, 0, 0, Some(&error.to_string()))
                        .await;
                }
            }
            drop(guard);
        });

        Ok(run_id)
    }

    /// Match one candidate and persist the results (runs on candidate
    /// updates; the full pipeline never matches).
    pub async fn run_matching_for_candidate(&self, candidate_id: Uuid) -> anyhow::Result<()> {
        matching::run_matching_for_candidate(&self.pool, candidate_id, &MatchOptions::default())
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Stage bodies
    // -----------------------------------------------------------------

    async fn crawl_stage(
        &self,
        ats_type: Option<AtsType>,
        logger: &RunLogger,
        cancel: &CancellationToken,
    ) -> StageCounts {
        let mut counts = StageCounts::default();
        let mut jobs_found = 0usize;
        let workers = self.config.max_concurrent_workers.max(1);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let batch = match companies::due_for_crawl(
                &self.pool,
                ats_type,
                self.config.default_crawl_interval_hours,
                CRAWL_BATCH_SIZE,
            )
            .await
            {
                Ok(batch) => batch,
                Err(error) => {
                    logger
                        .log("error", &format!("Crawl batch query failed: {error}"), None)
                        .await;
                    counts.failed += 1;
                    break;
                }
            };

            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            let outcomes: Vec<(String, anyhow::Result<CrawlOutcome>)> = stream::iter(batch)
                .map(|company| async move {
                    let name = company.name.clone();
                    if cancel.is_cancelled() {
                        return (name, Ok(CrawlOutcome::Skipped));
                    }
                    let outcome = match tokio::time::timeout(
                        COMPANY_CRAWL_TIMEOUT,
                        self.crawl_company(&company),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(anyhow::anyhow!("company crawl timed out")),
                    };
                    (name, outcome)
                })
                .buffer_unordered(workers)
                .collect()
                .await;

            for (name, outcome) in outcomes {
                match outcome {
                    Ok(CrawlOutcome::Crawled { jobs }) => {
                        counts.processed += 1;
                        jobs_found += jobs;
                        if jobs > 0 {
                            logger
                                .log(
                                    "info",
                                    &format!("Found {jobs} jobs from {name}"),
                                    Some(json!({"company": name, "jobs": jobs})),
                                )
                                .await;
                        }
                    }
                    Ok(CrawlOutcome::Unchanged) => counts.processed += 1,
                    Ok(CrawlOutcome::Skipped) => {}
                    Err(error) => {
                        counts.failed += 1;
                        logger
                            .log(
                                "warn",
                                &format!("Failed {name}: {error}"),
                                Some(json!({"company": name, "error": error.to_string()})),
                            )
                            .await;
                    }
                }
                logger
                    .progress(
                        &format!("Crawled {} companies ({jobs_found} jobs)", counts.processed),
                        Some(counts.processed),
                        Some(counts.failed),
                        Some(json!({"jobs_found": jobs_found})),
                    )
                    .await;
            }

            // Fewer companies than the batch size means the queue drained
            if (batch_len as i64) < CRAWL_BATCH_SIZE {
                break;
            }
        }

        logger
            .log(
                "info",
                &format!(
                    "Crawl complete: {} companies, {jobs_found} jobs, {} failed",
                    counts.processed, counts.failed
                ),
                None,
            )
            .await;
        counts
    }

    /// Crawl one company: fetch its listing, detect change, snapshot,
    /// extract, normalize, upsert.
    async fn crawl_company(&self, company: &companies::Company) -> anyhow::Result<CrawlOutcome> {
        // Companies landing here without a detected ATS get one detection
        // pass first
        let company = if company.ats_type == AtsType::Unknown {
            let detector = AtsDetector::new(&self.fetcher);
            detector.detect_and_store(&self.pool, company).await?;
            companies::load_company(&self.pool, company.id)
                .await?
                .unwrap_or_else(|| company.clone())
        } else {
            company.clone()
        };

        let probe = match self.fetch_listing(&company).await {
            Ok(probe) => probe,
            Err(error) => {
                companies::touch_crawled(&self.pool, company.id).await?;
                return Err(anyhow::anyhow!("{} ({})", error, error.kind()));
            }
        };

        let digest = content_hash(&probe.body);
        let previous = snapshots::latest_hash(&self.pool, company.id, &probe.url).await?;
        if previous.as_deref() == Some(digest.as_str()) {
            companies::touch_crawled(&self.pool, company.id).await?;
            tracing::debug!(company = %company.name, "Listing unchanged");
            return Ok(CrawlOutcome::Unchanged);
        }

        let snapshot = snapshots::CrawlSnapshot::new(
            company.id,
            probe.url.clone(),
            probe.body.clone(),
            probe.status as i64,
            probe.rendered,
        );
        snapshots::insert_snapshot(&self.pool, &snapshot).await?;
        companies::touch_crawled(&self.pool, company.id).await?;

        let extracted = self.extract_listing(&company, &probe.body).await?;
        let ingested = self.ingest_extracted(&company, extracted).await?;

        Ok(CrawlOutcome::Crawled { jobs: ingested })
    }

    /// Fetch the listing document that identifies a company's postings.
    async fn fetch_listing(
        &self,
        company: &companies::Company,
    ) -> Result<ListingProbe, FetchError> {
        let identifier = company.ats_identifier.as_deref().unwrap_or_default();

        let (url, response) = match company.ats_type {
            AtsType::Greenhouse => {
                let url = extract::greenhouse_board_url(identifier);
                let response = self.fetcher.fetch_api(&url).await?;
                (url, response)
            }
            AtsType::Lever => {
                let url = extract::lever_postings_url(identifier);
                let response = self.fetcher.fetch_api(&url).await?;
                (url, response)
            }
            AtsType::Ashby => {
                let url = extract::ashby_board_url(identifier);
                let response = self.fetcher.fetch_api(&url).await?;
                (url, response)
            }
            AtsType::Workday => {
                let (host, site) = extract::workday_identifier_parts(identifier)
                    .map_err(|_| FetchError::InvalidUrl(identifier.to_string()))?;
                let url = extract::workday_search_url(host, site)
                    .map_err(|_| FetchError::InvalidUrl(identifier.to_string()))?;
                let body = json!({"appliedFacets": {}, "limit": 20, "offset": 0, "searchText": ""});
                let response = self.fetcher.post_json(&url, &body).await?;
                (url, response)
            }
            AtsType::Custom | AtsType::Unknown => {
                let url = company.careers_url.clone().ok_or(FetchError::NotFound)?;
                let response = self.fetcher.fetch(&url).await?;
                (url, response)
            }
        };

        Ok(ListingProbe {
            url,
            body: response.body,
            status: response.status,
            rendered: response.rendered,
        })
    }

    /// Turn the fetched listing into raw job records. Simple vendors
    /// parse the probe body directly; Workday and custom pages go through
    /// their extractors.
    async fn extract_listing(
        &self,
        company: &companies::Company,
        body: &str,
    ) -> anyhow::Result<Vec<ExtractedJob>> {
        let jobs = match company.ats_type {
            AtsType::Greenhouse => extract::parse_greenhouse_board(body)?,
            AtsType::Lever => {
                let site = company.ats_identifier.as_deref().unwrap_or_default();
                extract::parse_lever_postings(body, site)?
            }
            AtsType::Ashby => extract::parse_ashby_board(body)?,
            other => {
                let extractor = self
                    .extractors
                    .for_ats(other)
                    .ok_or_else(|| anyhow::anyhow!("no extractor for {other}"))?;
                extractor.list(&self.fetcher, company).await?
            }
        };
        Ok(jobs)
    }

    /// Upsert raw rows and their canonical derivatives.
    async fn ingest_extracted(
        &self,
        company: &companies::Company,
        extracted: Vec<ExtractedJob>,
    ) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut ingested = 0usize;

        for job in extracted {
            if job.source_url.is_empty() {
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

            let raw_id = jobs_raw::upsert_raw_job(&self.pool, &raw).await?;
            raw.id = raw_id;

            let canonical = crate::normalize::normalize(&raw, now);
            jobs::upsert_job(&self.pool, &canonical).await?;
            ingested += 1;
        }

        Ok(ingested)
    }

    async fn enrichment_stage(
        &self,
        logger: &RunLogger,
        cancel: &CancellationToken,
    ) -> StageCounts {
        let mut counts = StageCounts::default();
        let cutoff = self.enrich_cutoff();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let due =
                match jobs::jobs_needing_enrichment(&self.pool, cutoff, ENRICH_BATCH_SIZE).await {
                    Ok(due) => due,
                    Err(error) => {
                        logger
                            .log("error", &format!("Enrichment query failed: {error}"), None)
                            .await;
                        counts.failed += 1;
                        break;
                    }
                };
            if due.is_empty() {
                break;
            }

            let batch_len = due.len();
            for job in due {
                if cancel.is_cancelled() {
                    break;
                }
                match self.enrich_one(&job).await {
                    Ok(true) => counts.processed += 1,
                    Ok(false) => counts.failed += 1,
                    Err(error) => {
                        counts.failed += 1;
                        tracing::debug!(job = %job.id, error = %error, "Enrichment error");
                    }
                }
                logger
                    .progress(
                        &format!("Enriched {} jobs", counts.processed),
                        Some(counts.processed),
                        Some(counts.failed),
                        None,
                    )
                    .await;
            }

            if (batch_len as i64) < ENRICH_BATCH_SIZE {
                break;
            }
        }

        logger
            .log(
                "info",
                &format!(
                    "Enrichment complete: {} enriched, {} failed",
                    counts.processed, counts.failed
                ),
                None,
            )
            .await;
        counts
    }

    /// Enrich one job. Returns Ok(true) on success; failures mark
    /// `enrich_failed_at` and stay soft.
    async fn enrich_one(&self, job: &jobs::Job) -> anyhow::Result<bool> {
        let Some(company) = companies::load_company(&self.pool, job.company_id).await? else {
            jobs::mark_enrich_failed(&self.pool, job.id).await?;
            return Ok(false);
        };

        match enrich::enrich_job(&self.fetcher, &company, job).await {
            Ok(Some(enrichment)) => {
                let freshness = enrichment
                    .posted_at
                    .map(|posted| crate::normalize::freshness(Some(posted), Utc::now()));
                jobs::set_enriched(
                    &self.pool,
                    job.id,
                    &enrichment.description,
                    enrichment.posted_at,
                    freshness,
                )
                .await?;
                Ok(true)
            }
            Ok(None) => {
                jobs::mark_enrich_failed(&self.pool, job.id).await?;
                Ok(false)
            }
            Err(ExtractError::Fetch(FetchError::NotFound)) => {
                // The detail page is gone: the posting is too
                jobs::delist_job(&self.pool, job.id, DelistReason::PageNotFound).await?;
                Ok(false)
            }
            Err(error) => {
                jobs::mark_enrich_failed(&self.pool, job.id).await?;
                tracing::debug!(job = %job.id, error = %error, "Enrichment failed");
                Ok(false)
            }
        }
    }

    fn enrich_cutoff(&self) -> DateTime<Utc> {
        (*self.last_full_run_started.lock()).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    async fn embeddings_stage(&self, logger: &RunLogger) -> StageCounts {
        match embed::run_embedding_stage(&self.pool, &self.embedder, ENRICH_BATCH_SIZE).await {
            Ok(stats) => {
                logger
                    .log(
                        "info",
                        &format!(
                            "Embeddings: {} jobs, {} candidates, {} failed",
                            stats.jobs_embedded, stats.candidates_embedded, stats.failed
                        ),
                        None,
                    )
                    .await;
                StageCounts {
                    processed: (stats.jobs_embedded + stats.candidates_embedded) as i64,
                    failed: stats.failed as i64,
                }
            }
            Err(error) => {
                logger
                    .log("error", &format!("Embedding stage failed: {error}"), None)
                    .await;
                StageCounts {
                    processed: 0,
                    failed: 1,
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------

    /// Aggregate status for the admin surface.
    pub async fn status(&self) -> anyhow::Result<serde_json::Value> {
        let (companies_total, companies_active, companies_with_ats) =
            companies::stats(&self.pool).await?;
        let (jobs_total, jobs_active, jobs_with_description, jobs_with_embedding) =
            jobs::stats(&self.pool).await?;
        let match_count = matches::count_matches(&self.pool).await?;
        let queue_counts = discovery_queue::status_counts(&self.pool).await?;

        let running = self.registry.running_operations();
        let stage = match running.len() {
            0 => "idle".to_string(),
            1 => running[0].operation_type.clone(),
            n => format!("concurrent ({n} ops)"),
        };

        let running_run = runs::running_runs(&self.pool)
            .await?
            .into_iter()
            .next()
            .map(|run| {
                json!({
                    "id": run.id,
                    "stage": run.stage,
                    "current_step": run.current_step,
                    "processed": run.processed,
                    "failed": run.failed,
                    "started_at": run.started_at,
                })
            });

        Ok(json!({
            "pipeline": {
                "stage": stage,
                "any_running": !running.is_empty(),
            },
            "stats": {
                "companies": {
                    "total": companies_total,
                    "active": companies_active,
                    "with_ats": companies_with_ats,
                },
                "jobs": {
                    "total": jobs_total,
                    "active": jobs_active,
                    "with_description": jobs_with_description,
                    "with_embeddings": jobs_with_embedding,
                },
                "matches": match_count,
                "discovery_queue": queue_counts
                    .into_iter()
                    .collect::<std::collections::HashMap<String, i64>>(),
            },
            "running_run": running_run,
            "running_operations": running,
        }))
    }

    /// Admin analytics: daily counts over a trailing window.
    pub async fn analytics(&self, days: i64) -> anyhow::Result<serde_json::Value> {
        // Date-only cutoff compares cleanly against both timestamp formats
        let cutoff = (Utc::now() - chrono::Duration::days(days))
            .format("%Y-%m-%d")
            .to_string();

        let jobs_by_day = daily_counts(&self.pool, "jobs", "created_at", &cutoff).await?;
        let companies_by_day = daily_counts(&self.pool, "companies", "created_at", &cutoff).await?;
        let matches_by_day = daily_counts(&self.pool, "matches", "created_at", &cutoff).await?;
        let candidates_total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM candidate_profiles WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await?;

        Ok(json!({
            "days": days,
            "jobs_created": jobs_by_day,
            "companies_created": companies_by_day,
            "matches_created": matches_by_day,
            "active_candidates": candidates_total,
        }))
    }
}

/// What one company crawl produced.
#[derive(Debug)]
enum CrawlOutcome {
    Crawled { jobs: usize },
    Unchanged,
    Skipped,
}

struct ListingProbe {
    url: String,
    body: String,
    status: u16,
    rendered: bool,
}

async fn daily_counts(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    cutoff: &str,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let rows = sqlx::query_as::<_, (String, i64)>(&format!(
        "SELECT date({column}) AS day, COUNT(*) FROM {table}
         WHERE {column} >= ? GROUP BY day ORDER BY day"
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(day, count)| json!({"day": day, "count": count}))
        .collect())
}
