//! Company discovery
//!
//! Pluggable sources produce company candidates; the orchestrator stages
//! them in the discovery queue (deduplicated by normalized domain, name as
//! fallback) and the queue processor turns them into companies via ATS
//! detection.

mod sources;

pub use sources::{AtsDirectorySource, SeedListSource};

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::companies::{self, Company};
use crate::db::discovery_queue::{self, QueueItem};
use crate::detect::AtsDetector;
use crate::fetch::Fetcher;
use crate::types::QueueStatus;

/// A company candidate produced by a source.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredCompany {
    pub name: String,
    pub domain: Option<String>,
    pub careers_url: Option<String>,
    pub website_url: Option<String>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub industry: Option<String>,
    pub employee_count: Option<i64>,
    pub funding_stage: Option<String>,
    /// Origin tag, filled by the producing source.
    pub source: String,
}

/// Capability implemented by every discovery source.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Stable identifier used for selection via the admin API.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Produce up to `limit` candidates.
    async fn produce(&self, limit: usize) -> anyhow::Result<Vec<DiscoveredCompany>>;
}

/// Outcome of one discovery pass.
#[derive(Debug, Default, serde::Serialize)]
pub struct DiscoveryStats {
    pub sources_run: usize,
    pub total_discovered: usize,
    pub new_items: usize,
    pub merged_items: usize,
    pub errors: usize,
}

/// Outcome of draining the queue.
#[derive(Debug, Default, serde::Serialize)]
pub struct QueueProcessStats {
    pub processed: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Geography gate: country codes the catalog targets. Candidates with no
/// country pass through.
const TARGET_COUNTRIES: &[&str] = &["US", "CA", "UK", "GB", "IE", "DE", "FR", "NL", "AU", "EU"];

/// Industries never taken into the catalog.
const DISALLOWED_INDUSTRIES: &[&str] = &["gambling", "adult", "tobacco"];

/// Why a queue item was skipped, if it should be.
fn skip_reason(item: &QueueItem) -> Option<&'static str> {
    if let Some(country) = item.country.as_deref() {
        if !TARGET_COUNTRIES.contains(&country.to_uppercase().as_str()) {
            return Some("non-target geography");
        }
    }
    if let Some(industry) = item.industry.as_deref() {
        if DISALLOWED_INDUSTRIES.contains(&industry.to_lowercase().as_str()) {
            return Some("disallowed industry");
        }
    }
    None
}

/// Registry of discovery sources keyed by name.
pub struct SourceRegistry {
    sources: Vec<Box<dyn DiscoverySource>>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Box<dyn DiscoverySource>>) -> Self {
        Self { sources }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Pull from enabled sources (optionally a named subset) and stage
    /// the results in the discovery queue.
    pub async fn run_discovery(
        &self,
        pool: &SqlitePool,
        source_names: Option<&[String]>,
        limit_per_source: usize,
    ) -> DiscoveryStats {
        let mut stats = DiscoveryStats::default();

        for source in &self.sources {
            if !source.is_enabled() {
                continue;
            }
            if let Some(names) = source_names {
                if !names.iter().any(|n| n == source.name()) {
                    continue;
                }
            }

            stats.sources_run += 1;
            match source.produce(limit_per_source).await {
                Ok(candidates) => {
                    for candidate in candidates {
                        stats.total_discovered += 1;
                        match stage_candidate(pool, &candidate).await {
                            Ok(true) => stats.new_items += 1,
                            Ok(false) => stats.merged_items += 1,
                            Err(error) => {
                                tracing::warn!(
                                    source = source.name(),
                                    company = %candidate.name,
                                    error = %error,
                                    "Failed to stage discovered company"
                                );
                                stats.errors += 1;
                            }
                        }
                    }
                }
                Err(error) => {
                    tracing::error!(source = source.name(), error = %error, "Discovery source failed");
                    stats.errors += 1;
                }
            }
        }

        tracing::info!(
            sources_run = stats.sources_run,
            discovered = stats.total_discovered,
            new = stats.new_items,
            merged = stats.merged_items,
            "Discovery pass complete"
        );
        stats
    }
}

/// Insert a candidate into the queue. Returns true for a new row.
async fn stage_candidate(pool: &SqlitePool, candidate: &DiscoveredCompany) -> anyhow::Result<bool> {
    let item = QueueItem {
        id: Uuid::new_v4(),
        name: candidate.name.clone(),
        domain: candidate.domain.clone(),
        dedupe_key: discovery_queue::dedupe_key(&candidate.name, candidate.domain.as_deref()),
        careers_url: candidate.careers_url.clone(),
        website_url: candidate.website_url.clone(),
        source: candidate.source.clone(),
        location: candidate.location.clone(),
        country: candidate.country.clone(),
        industry: candidate.industry.clone(),
        employee_count: candidate.employee_count,
        funding_stage: candidate.funding_stage.clone(),
        status: QueueStatus::Pending,
        ..Default::default()
    };
    discovery_queue::insert_or_merge(pool, &item).await
}

/// Drain up to `limit` queue items: claim, gate, detect ATS, intake.
pub async fn process_queue(
    pool: &SqlitePool,
    fetcher: &Fetcher,
    limit: i64,
) -> anyhow::Result<QueueProcessStats> {
    let mut stats = QueueProcessStats::default();
    let claimed = discovery_queue::claim_pending(pool, limit).await?;
    let detector = AtsDetector::new(fetcher);

    for item in claimed {
        stats.processed += 1;

        if let Some(reason) = skip_reason(&item) {
            discovery_queue::mark_skipped(pool, item.id, reason).await?;
            stats.skipped += 1;
            continue;
        }

        match intake_item(pool, &detector, &item).await {
            Ok(company_id) => {
                discovery_queue::mark_completed(pool, item.id, company_id).await?;
                stats.completed += 1;
            }
            Err(error) => {
                let status =
                    discovery_queue::mark_failed(pool, item.id, &error.to_string()).await?;
                if status == QueueStatus::Failed {
                    stats.failed += 1;
                }
                tracing::warn!(
                    company = %item.name,
                    error = %error,
                    status = %status,
                    "Queue item processing failed"
                );
            }
        }
    }

    Ok(stats)
}

/// Create or update the company for a queue item, then detect its ATS.
async fn intake_item(
    pool: &SqlitePool,
    detector: &AtsDetector<'_>,
    item: &QueueItem,
) -> anyhow::Result<Uuid> {
    let existing = match item.domain.as_deref() {
        Some(domain) => companies::load_by_domain(pool, domain).await?,
        None => None,
    };

    let company = match existing {
        Some(company) => company,
        None => {
            let mut company = Company::new(item.name.clone());
            company.domain = item.domain.clone();
            company.careers_url = item.careers_url.clone();
            company.website_url = item.website_url.clone();
            company.discovery_source = Some(item.source.clone());
            company.discovered_at = Some(chrono::Utc::now());
            company.country = item.country.clone();
            company.location = item.location.clone();
            company.industry = item.industry.clone();
            company.employee_count = item.employee_count;
            company.funding_stage = item.funding_stage.clone();
            companies::save_company(pool, &company).await?;
            // The save may have merged into an existing row by domain
            match item.domain.as_deref() {
                Some(domain) => companies::load_by_domain(pool, domain)
                    .await?
                    .unwrap_or(company),
                None => company,
            }
        }
    };

    detector.detect_and_store(pool, &company).await?;
    Ok(company.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geography_gate() {
        let mut item = QueueItem {
            name: "Acme".into(),
            ..Default::default()
        };
        assert!(skip_reason(&item).is_none());

        item.country = Some("US".into());
        assert!(skip_reason(&item).is_none());

        item.country = Some("KP".into());
        assert_eq!(skip_reason(&item), Some("non-target geography"));
    }

    #[test]
    fn industry_gate() {
        let item = QueueItem {
            name: "Acme".into(),
            country: Some("US".into()),
            industry: Some("Gambling".into()),
            ..Default::default()
        };
        assert_eq!(skip_reason(&item), Some("disallowed industry"));
    }
}
