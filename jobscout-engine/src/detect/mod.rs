//! ATS detection
//!
//! Given a company with a website or careers URL, identify the ATS vendor
//! and board identifier. Ordered algorithm, first hit wins:
//!
//! 1. URL-pattern match against known vendor hosts
//! 2. HTML probing of the careers page (iframes, scripts, links)
//! 3. API probing of vendor well-known endpoints with a candidate slug
//! 4. Classify as custom
//!
//! The detector is the sole writer of the four ATS fields on companies
//! and is idempotent on identical inputs.

use regex::Regex;
use scraper::{Html, Selector};
use sqlx::SqlitePool;
use std::sync::OnceLock;

use crate::db::companies::{self, Company};
use crate::fetch::{FetchError, Fetcher};
use crate::types::AtsType;

/// Identifiers that pattern-match but are template noise, never boards.
const INVALID_IDENTIFIERS: &[&str] = &[
    "embed",
    "job_board",
    "js",
    "css",
    "api",
    "jobs",
    "undefined",
    "${boardtoken}",
    "${ghslug}",
    "${board_token}",
];

fn valid_identifier(identifier: &str) -> Option<String> {
    let lowered = identifier.to_lowercase();
    if identifier.len() < 2 || INVALID_IDENTIFIERS.contains(&lowered.as_str()) {
        None
    } else {
        Some(identifier.to_string())
    }
}

/// Detection outcome. `careers_url` is the URL the detector settled on.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub ats_type: AtsType,
    pub ats_identifier: Option<String>,
    pub careers_url: Option<String>,
}

impl Detection {
    fn custom(careers_url: Option<String>) -> Self {
        Self {
            ats_type: AtsType::Custom,
            ats_identifier: None,
            careers_url,
        }
    }
}

struct UrlRules {
    greenhouse: Vec<Regex>,
    lever: Regex,
    ashby: Regex,
    workday: Regex,
}

fn url_rules() -> &'static UrlRules {
    static RULES: OnceLock<UrlRules> = OnceLock::new();
    RULES.get_or_init(|| UrlRules {
        greenhouse: vec![
            Regex::new(r"boards\.greenhouse\.io/([a-zA-Z0-9_-]+)").unwrap(),
            Regex::new(r"job-boards\.greenhouse\.io/([a-zA-Z0-9_-]+)").unwrap(),
            Regex::new(r"boards-api\.greenhouse\.io/v1/boards/([a-zA-Z0-9_-]+)").unwrap(),
        ],
        lever: Regex::new(r"jobs\.lever\.co/([a-zA-Z0-9_-]+)").unwrap(),
        ashby: Regex::new(r"jobs\.ashbyhq\.com/([a-zA-Z0-9_.-]+)").unwrap(),
        workday: Regex::new(r#"([a-z0-9-]+\.wd\d+\.myworkdayjobs\.com)(/[^\s"'<>]*)?"#).unwrap(),
    })
}

/// Step 1: match a URL against known vendor host patterns.
pub fn detect_from_url(url: &str) -> Option<(AtsType, Option<String>)> {
    let rules = url_rules();

    for pattern in &rules.greenhouse {
        if let Some(captures) = pattern.captures(url) {
            return Some((AtsType::Greenhouse, valid_identifier(&captures[1])));
        }
    }
    if let Some(captures) = rules.lever.captures(url) {
        return Some((AtsType::Lever, valid_identifier(&captures[1])));
    }
    if let Some(captures) = rules.ashby.captures(url) {
        return Some((AtsType::Ashby, valid_identifier(&captures[1])));
    }
    if let Some(captures) = rules.workday.captures(url) {
        let host = captures[1].to_string();
        let site = captures
            .get(2)
            .map(|m| m.as_str())
            .and_then(workday_site_from_path);
        let identifier = site.map(|site| format!("{host}/{site}"));
        return Some((AtsType::Workday, identifier));
    }

    None
}

/// Pull the site segment out of a Workday path, skipping locale prefixes
/// like `/en-US`.
fn workday_site_from_path(path: &str) -> Option<String> {
    static LOCALE: OnceLock<Regex> = OnceLock::new();
    let locale = LOCALE.get_or_init(|| Regex::new(r"^[a-z]{2}-[A-Z]{2}$").unwrap());

    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    let first = segments.next()?;
    let site = if locale.is_match(first) {
        segments.next()?
    } else {
        first
    };
    valid_identifier(site)
}

/// Step 2: probe fetched careers-page HTML for embedded vendor hints.
pub fn detect_from_html(html: &str) -> Option<(AtsType, Option<String>)> {
    let document = Html::parse_document(html);
    // Vendor recognized but identifier still unknown (embed/template URLs)
    let mut vendor_only: Option<(AtsType, Option<String>)> = None;

    // iframes, scripts and anchors carry vendor URLs when the board is
    // embedded
    for selector in ["iframe[src]", "script[src]", "a[href]"] {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let value = element
                .value()
                .attr("src")
                .or_else(|| element.value().attr("href"))
                .unwrap_or("");
            if let Some((ats_type, identifier)) = detect_from_url(value) {
                if identifier.is_some() {
                    return Some((ats_type, identifier));
                }
                vendor_only.get_or_insert((ats_type, None));
            }
        }
    }

    // Inline script configuration (board tokens)
    static TOKEN_PATTERNS: OnceLock<Vec<(Regex, AtsType)>> = OnceLock::new();
    let patterns = TOKEN_PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r#"data-board-token="([a-zA-Z0-9_-]+)""#).unwrap(),
                AtsType::Greenhouse,
            ),
            (
                Regex::new(r#"boardToken['"]?\s*[:=]\s*['"]([a-zA-Z0-9_-]+)['"]"#).unwrap(),
                AtsType::Greenhouse,
            ),
            (
                Regex::new(r#"data-lever-site="([a-zA-Z0-9_-]+)""#).unwrap(),
                AtsType::Lever,
            ),
        ]
    });
    for (pattern, ats) in patterns {
        if let Some(captures) = pattern.captures(html) {
            if let Some(identifier) = valid_identifier(&captures[1]) {
                return Some((*ats, Some(identifier)));
            }
        }
    }

    // Raw host mentions anywhere in the page
    if let Some((ats_type, identifier)) = detect_from_url(html) {
        if identifier.is_some() {
            return Some((ats_type, identifier));
        }
        vendor_only.get_or_insert((ats_type, None));
    }

    vendor_only
}

/// Step 3: confirm a candidate slug against vendor APIs. A 200 with a
/// parseable shape confirms the vendor.
async fn probe_apis(fetcher: &Fetcher, slug: &str) -> Option<(AtsType, String)> {
    let greenhouse_url = format!("https://boards-api.greenhouse.io/v1/boards/{slug}/jobs");
    if let Ok(response) = fetcher.fetch_api(&greenhouse_url).await {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&response.body) {
            if value.get("jobs").is_some() {
                return Some((AtsType::Greenhouse, slug.to_string()));
            }
        }
    }

    let lever_url = format!("https://api.lever.co/v0/postings/{slug}?mode=json");
    if let Ok(response) = fetcher.fetch_api(&lever_url).await {
        if serde_json::from_str::<Vec<serde_json::Value>>(&response.body).is_ok() {
            return Some((AtsType::Lever, slug.to_string()));
        }
    }

    let ashby_url = format!("https://api.ashbyhq.com/posting-api/job-board/{slug}");
    if let Ok(response) = fetcher.fetch_api(&ashby_url).await {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&response.body) {
            if value.get("jobs").is_some() {
                return Some((AtsType::Ashby, slug.to_string()));
            }
        }
    }

    None
}

/// Candidate board slug from the company's domain or name.
fn candidate_slug(company: &Company) -> Option<String> {
    if let Some(domain) = &company.domain {
        return domain.split('.').next().map(|s| s.to_lowercase());
    }
    let slug: String = company
        .name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    (!slug.is_empty()).then_some(slug)
}

/// The detector service.
pub struct AtsDetector<'a> {
    fetcher: &'a Fetcher,
}

impl<'a> AtsDetector<'a> {
    pub fn new(fetcher: &'a Fetcher) -> Self {
        Self { fetcher }
    }

    /// Run the ordered detection algorithm for a company.
    pub async fn detect(&self, company: &Company) -> Detection {
        // Step 1: URL patterns on whatever URLs we already hold
        for url in [&company.careers_url, &company.website_url]
            .into_iter()
            .flatten()
        {
            if let Some((ats_type, identifier)) = detect_from_url(url) {
                if identifier.is_some() {
                    return Detection {
                        ats_type,
                        ats_identifier: identifier,
                        careers_url: Some(url.clone()),
                    };
                }
            }
        }

        // Step 2: fetch candidate careers pages and probe the HTML
        for url in self.candidate_careers_urls(company) {
            match self.fetcher.fetch(&url).await {
                Ok(response) => {
                    if let Some((ats_type, identifier)) = detect_from_html(&response.body) {
                        if identifier.is_some() {
                            return Detection {
                                ats_type,
                                ats_identifier: identifier,
                                careers_url: Some(url),
                            };
                        }
                    }
                    // Page exists: remember it as the careers URL even if
                    // no vendor was recognized there
                    if let Some(detection) =
                        self.finish_with_probe(company, Some(url.clone())).await
                    {
                        return detection;
                    }
                    return Detection::custom(Some(url));
                }
                Err(FetchError::NotFound) | Err(FetchError::HttpClient(_)) => continue,
                Err(error) => {
                    tracing::debug!(company = %company.name, url, error = %error, "Careers probe failed");
                    continue;
                }
            }
        }

        // Step 3/4 without a reachable careers page
        self.finish_with_probe(company, company.careers_url.clone())
            .await
            .unwrap_or_else(|| Detection::custom(company.careers_url.clone()))
    }

    async fn finish_with_probe(
        &self,
        company: &Company,
        careers_url: Option<String>,
    ) -> Option<Detection> {
        let slug = candidate_slug(company)?;
        let (ats_type, identifier) = probe_apis(self.fetcher, &slug).await?;
        Some(Detection {
            ats_type,
            ats_identifier: Some(identifier),
            careers_url,
        })
    }

    fn candidate_careers_urls(&self, company: &Company) -> Vec<String> {
        let mut urls = Vec::new();
        if let Some(careers) = &company.careers_url {
            urls.push(careers.clone());
        }
        if let Some(domain) = &company.domain {
            urls.push(format!("https://{domain}/careers"));
            urls.push(format!("https://{domain}/jobs"));
        } else if let Some(website) = &company.website_url {
            let base = website.trim_end_matches('/');
            urls.push(format!("{base}/careers"));
            urls.push(format!("{base}/jobs"));
        }
        urls.dedup();
        urls
    }

    /// Detect and persist. The sole write path for the ATS fields.
    pub async fn detect_and_store(
        &self,
        pool: &SqlitePool,
        company: &Company,
    ) -> anyhow::Result<Detection> {
        let detection = self.detect(company).await;

        companies::set_ats_fields(
            pool,
            company.id,
            detection.ats_type,
            detection.ats_identifier.as_deref(),
            detection.careers_url.as_deref(),
        )
        .await?;

        tracing::info!(
            company = %company.name,
            ats_type = %detection.ats_type,
            ats_identifier = detection.ats_identifier.as_deref().unwrap_or("-"),
            "ATS detection stored"
        );

        Ok(detection)
    }
}
