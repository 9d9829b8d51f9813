//! Concrete discovery sources
//!
//! `seed_list` is the curated starter catalog. `ats_directory` probes
//! well-known vendor board slugs derived from curated company names and
//! yields only slugs that answer with a real board.

use async_trait::async_trait;
use std::sync::Arc;

use super::{DiscoveredCompany, DiscoverySource};
use crate::fetch::Fetcher;

/// Curated seed entries: (name, domain, careers_url).
const SEED_COMPANIES: &[(&str, &str, &str)] = &[
    ("Stripe", "stripe.com", "https://stripe.com/jobs"),
    ("Figma", "figma.com", "https://www.figma.com/careers/"),
    ("Notion", "notion.so", "https://www.notion.so/careers"),
    ("Linear", "linear.app", "https://linear.app/careers"),
    ("Vercel", "vercel.com", "https://vercel.com/careers"),
    ("Supabase", "supabase.com", "https://supabase.com/careers"),
    ("Anthropic", "anthropic.com", "https://www.anthropic.com/careers"),
    ("Ramp", "ramp.com", "https://ramp.com/careers"),
    ("Retool", "retool.com", "https://retool.com/careers"),
    ("PostHog", "posthog.com", "https://posthog.com/careers"),
    ("Fly.io", "fly.io", "https://fly.io/jobs/"),
    ("Tailscale", "tailscale.com", "https://tailscale.com/careers/"),
];

/// Static curated seed list.
pub struct SeedListSource;

#[async_trait]
impl DiscoverySource for SeedListSource {
    fn name(&self) -> &'static str {
        "seed_list"
    }

    fn description(&self) -> &'static str {
        "Curated starter companies"
    }

    async fn produce(&self, limit: usize) -> anyhow::Result<Vec<DiscoveredCompany>> {
        Ok(SEED_COMPANIES
            .iter()
            .take(limit)
            .map(|(name, domain, careers_url)| DiscoveredCompany {
                name: name.to_string(),
                domain: Some(domain.to_string()),
                careers_url: Some(careers_url.to_string()),
                website_url: Some(format!("https://{domain}")),
                source: self.name().to_string(),
                ..Default::default()
            })
            .collect())
    }
}

/// Board slugs worth probing against vendor directories. These are
/// companies known to hire through hosted boards; the probe confirms the
/// board still exists before yielding anything.
const DIRECTORY_SLUGS: &[(&str, &str)] = &[
    ("Airbnb", "airbnb"),
    ("Coinbase", "coinbase"),
    ("Databricks", "databricks"),
    ("Discord", "discord"),
    ("Duolingo", "duolingo"),
    ("Gusto", "gusto"),
    ("Instacart", "instacart"),
    ("Plaid", "plaid"),
    ("Reddit", "reddit"),
    ("Robinhood", "robinhood"),
];

/// Probes Greenhouse board slugs and yields confirmed boards.
pub struct AtsDirectorySource {
    fetcher: Arc<Fetcher>,
}

impl AtsDirectorySource {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DiscoverySource for AtsDirectorySource {
    fn name(&self) -> &'static str {
        "ats_directory"
    }

    fn description(&self) -> &'static str {
        "Probes hosted ATS boards for known companies"
    }

    async fn produce(&self, limit: usize) -> anyhow::Result<Vec<DiscoveredCompany>> {
        let mut discovered = Vec::new();

        for (name, slug) in DIRECTORY_SLUGS.iter().take(limit) {
            let url = format!("https://boards-api.greenhouse.io/v1/boards/{slug}/jobs");
            match self.fetcher.fetch_api(&url).await {
                Ok(response) => {
                    let parseable = serde_json::from_str::<serde_json::Value>(&response.body)
                        .ok()
                        .map(|v| v.get("jobs").is_some())
                        .unwrap_or(false);
                    if parseable {
                        discovered.push(DiscoveredCompany {
                            name: name.to_string(),
                            careers_url: Some(format!("https://boards.greenhouse.io/{slug}")),
                            source: self.name().to_string(),
                            ..Default::default()
                        });
                    }
                }
                Err(error) => {
                    tracing::debug!(slug, error = %error, "Board probe missed");
                }
            }
        }

        Ok(discovered)
    }
}
