//! Enrichment: fill in descriptions from job detail endpoints
//!
//! List endpoints often omit descriptions. This sub-stage fetches each
//! job's detail URL and writes the description (and a better posted date
//! when the detail endpoint has one) back onto the canonical job.
//! Per-job failures are soft: the job is stamped `enrich_failed_at` and
//! skipped for the rest of the current full-pipeline run.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use url::Url;

use super::workday::{search_url, split_identifier};
use super::{greenhouse, html_to_text, ExtractError, Extractor};
use crate::db::companies::Company;
use crate::db::jobs::Job;
use crate::fetch::Fetcher;
use crate::normalize::parse_posted_at;
use crate::types::AtsType;

/// Cap stored descriptions.
const DESCRIPTION_MAX: usize = 10_000;

/// Detail fetched for one job.
#[derive(Debug)]
pub struct Enrichment {
    pub description: String,
    pub posted_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Fetch the detail for one job. `Ok(None)` means the endpoint answered
/// but had no usable description.
pub async fn enrich_job(
    fetcher: &Fetcher,
    company: &Company,
    job: &Job,
) -> Result<Option<Enrichment>, ExtractError> {
    match company.ats_type {
        AtsType::Greenhouse => enrich_greenhouse(fetcher, company, job).await,
        AtsType::Lever => enrich_lever(fetcher, company, job).await,
        AtsType::Ashby => enrich_ashby(fetcher, company, job).await,
        AtsType::Workday => enrich_workday(fetcher, company, job).await,
        AtsType::Custom | AtsType::Unknown => enrich_generic(fetcher, job).await,
    }
}

fn clamp_description(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.len() < 40 {
        return None;
    }
    let mut owned = trimmed.to_string();
    if owned.len() > DESCRIPTION_MAX {
        let mut cut = DESCRIPTION_MAX;
        while cut > 0 && !owned.is_char_boundary(cut) {
            cut -= 1;
        }
        owned.truncate(cut);
    }
    Some(owned)
}

// ---------------------------------------------------------------------------
// Greenhouse
// ---------------------------------------------------------------------------

/// Pull the numeric job id out of a Greenhouse posting URL.
pub fn greenhouse_job_id(url: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"[?&]gh_jid=(\d+)").unwrap(),
            Regex::new(r"/jobs/(\d+)").unwrap(),
            Regex::new(r"/careers/(\d+)").unwrap(),
        ]
    });
    patterns
        .iter()
        .find_map(|p| p.captures(url))
        .map(|c| c[1].to_string())
}

#[derive(Debug, Deserialize)]
struct GreenhouseDetail {
    content: Option<String>,
    updated_at: Option<String>,
}

/// Parse a Greenhouse job detail body into an enrichment.
pub fn parse_greenhouse_detail(body: &str) -> Result<Option<Enrichment>, ExtractError> {
    let detail: GreenhouseDetail =
        serde_json::from_str(body).map_err(|e| ExtractError::Parse(e.to_string()))?;

    let Some(content) = detail.content else {
        return Ok(None);
    };
    // Greenhouse double-escapes the HTML content
    let unescaped = content
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    Ok(clamp_description(html_to_text(&unescaped)).map(|description| Enrichment {
        description,
        posted_at: detail.updated_at.as_deref().and_then(parse_posted_at),
    }))
}

async fn enrich_greenhouse(
    fetcher: &Fetcher,
    company: &Company,
    job: &Job,
) -> Result<Option<Enrichment>, ExtractError> {
    let board = company
        .ats_identifier
        .as_deref()
        .ok_or_else(|| ExtractError::MissingIdentifier(company.name.clone()))?;
    let Some(job_id) = greenhouse_job_id(&job.source_url) else {
        return Ok(None);
    };

    let response = fetcher
        .fetch_api(&greenhouse::job_api_url(board, &job_id))
        .await?;
    parse_greenhouse_detail(&response.body)
}

// ---------------------------------------------------------------------------
// Lever
// ---------------------------------------------------------------------------

/// Posting id is the last path segment of a Lever hosted URL.
pub fn lever_posting_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !parsed.host_str()?.contains("lever.co") {
        return None;
    }
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(String::from)
}

#[derive(Debug, Deserialize)]
struct LeverDetail {
    #[serde(rename = "descriptionPlain")]
    description_plain: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<i64>,
}

pub fn parse_lever_detail(body: &str) -> Result<Option<Enrichment>, ExtractError> {
    let detail: LeverDetail =
        serde_json::from_str(body).map_err(|e| ExtractError::Parse(e.to_string()))?;

    Ok(detail
        .description_plain
        .and_then(clamp_description)
        .map(|description| Enrichment {
            description,
            posted_at: detail
                .created_at
                .and_then(chrono::DateTime::from_timestamp_millis),
        }))
}

async fn enrich_lever(
    fetcher: &Fetcher,
    company: &Company,
    job: &Job,
) -> Result<Option<Enrichment>, ExtractError> {
    let site = company
        .ats_identifier
        .as_deref()
        .ok_or_else(|| ExtractError::MissingIdentifier(company.name.clone()))?;
    let Some(posting_id) = lever_posting_id(&job.source_url) else {
        return Ok(None);
    };

    let url = format!("https://api.lever.co/v0/postings/{site}/{posting_id}?mode=json");
    let response = fetcher.fetch_api(&url).await?;
    parse_lever_detail(&response.body)
}

// ---------------------------------------------------------------------------
// Ashby
// ---------------------------------------------------------------------------

async fn enrich_ashby(
    fetcher: &Fetcher,
    company: &Company,
    job: &Job,
) -> Result<Option<Enrichment>, ExtractError> {
    // The board response already carries descriptions; re-read it and pick
    // out the matching posting.
    let listed = super::AshbyExtractor.list(fetcher, company).await?;
    Ok(listed
        .into_iter()
        .find(|candidate| candidate.source_url == job.source_url)
        .and_then(|candidate| candidate.description)
        .and_then(clamp_description)
        .map(|description| Enrichment {
            description,
            posted_at: None,
        }))
}

// ---------------------------------------------------------------------------
// Workday
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorkdayDetail {
    #[serde(rename = "jobPostingInfo")]
    info: Option<WorkdayPostingInfo>,
}

#[derive(Debug, Deserialize)]
struct WorkdayPostingInfo {
    #[serde(rename = "jobDescription")]
    job_description: Option<String>,
    #[serde(rename = "startDate")]
    start_date: Option<String>,
}

pub fn parse_workday_detail(body: &str) -> Result<Option<Enrichment>, ExtractError> {
    let detail: WorkdayDetail =
        serde_json::from_str(body).map_err(|e| ExtractError::Parse(e.to_string()))?;

    Ok(detail.info.and_then(|info| {
        clamp_description(html_to_text(info.job_description.as_deref().unwrap_or("")))
            .map(|description| Enrichment {
                description,
                posted_at: info.start_date.as_deref().and_then(parse_posted_at),
            })
    }))
}

async fn enrich_workday(
    fetcher: &Fetcher,
    company: &Company,
    job: &Job,
) -> Result<Option<Enrichment>, ExtractError> {
    let identifier = company
        .ats_identifier
        .as_deref()
        .ok_or_else(|| ExtractError::MissingIdentifier(company.name.clone()))?;
    let (host, site) = split_identifier(identifier)?;

    // Detail endpoint mirrors the search endpoint with the job path
    // appended after the site segment.
    let parsed = Url::parse(&job.source_url).map_err(|e| ExtractError::Parse(e.to_string()))?;
    let job_path = parsed.path();
    let Some(job_segment) = job_path.split("/job/").nth(1) else {
        return Ok(None);
    };

    let base = search_url(host, site)?;
    let detail_url = format!("{}/job/{}", base.trim_end_matches("/jobs"), job_segment);
    let response = fetcher.fetch_api(&detail_url).await?;
    parse_workday_detail(&response.body)
}

// ---------------------------------------------------------------------------
// Generic (custom pages)
// ---------------------------------------------------------------------------

async fn enrich_generic(fetcher: &Fetcher, job: &Job) -> Result<Option<Enrichment>, ExtractError> {
    let response = fetcher.fetch(&job.source_url).await?;
    let document = scraper::Html::parse_document(&response.body);

    // Prefer semantic containers over the whole body
    for selector in ["main", "article", "[class*=description]", "body"] {
        let Ok(selector) = scraper::Selector::parse(selector) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = element.text().collect::<Vec<_>>().join(" ");
            let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if let Some(description) = clamp_description(collapsed) {
                return Ok(Some(Enrichment {
                    description,
                    posted_at: None,
                }));
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greenhouse_job_id_from_url_shapes() {
        assert_eq!(
            greenhouse_job_id("https://boards.greenhouse.io/acme/jobs/400001").as_deref(),
            Some("400001")
        );
        assert_eq!(
            greenhouse_job_id("https://acme.test/careers?gh_jid=123456").as_deref(),
            Some("123456")
        );
        assert!(greenhouse_job_id("https://acme.test/about").is_none());
    }

    #[test]
    fn greenhouse_detail_unescapes_content() {
        let body = r#"{"content": "&lt;p&gt;We build payment rails. Join a team that ships weekly and owns outcomes end to end.&lt;/p&gt;", "updated_at": "2025-07-01T00:00:00Z"}"#;
        let enrichment = parse_greenhouse_detail(body).unwrap().unwrap();
        assert!(enrichment.description.starts_with("We build payment rails."));
        assert!(enrichment.posted_at.is_some());
    }

    #[test]
    fn short_descriptions_are_rejected() {
        let body = r#"{"content": "&lt;p&gt;N/A&lt;/p&gt;"}"#;
        assert!(parse_greenhouse_detail(body).unwrap().is_none());
    }

    #[test]
    fn lever_posting_id_from_url() {
        assert_eq!(
            lever_posting_id("https://jobs.lever.co/acme/a1b2-c3d4").as_deref(),
            Some("a1b2-c3d4")
        );
        assert!(lever_posting_id("https://acme.test/jobs/1").is_none());
    }

    #[test]
    fn lever_detail_parses() {
        let body = r#"{"descriptionPlain": "You will design, build and operate distributed crawling infrastructure.", "createdAt": 1752000000000}"#;
        let enrichment = parse_lever_detail(body).unwrap().unwrap();
        assert!(enrichment.description.contains("distributed crawling"));
        assert!(enrichment.posted_at.is_some());
    }

    #[test]
    fn workday_detail_parses() {
        let body = r#"{"jobPostingInfo": {"jobDescription": "<p>Own our financial reporting stack and close processes across three entities.</p>", "startDate": "2025-07-10"}}"#;
        let enrichment = parse_workday_detail(body).unwrap().unwrap();
        assert!(enrichment.description.contains("financial reporting"));
        assert!(enrichment.posted_at.is_some());
    }
}
