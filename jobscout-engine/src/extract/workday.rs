//! Workday extractor
//!
//! Workday has no public list endpoint; postings come from the
//! POST-based cxs search API, paged by offset. The ATS identifier is
//! `<host>/<site>`, e.g. `acme.wd5.myworkdayjobs.com/External`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{require_identifier, ExtractError, ExtractedJob, Extractor};
use crate::db::companies::Company;
use crate::fetch::Fetcher;
use crate::types::AtsType;

const PAGE_SIZE: usize = 20;
/// Upper bound on pagination in case the reported total misbehaves.
const MAX_PAGES: usize = 100;

/// Split `<host>/<site>` into its parts.
pub fn split_identifier(identifier: &str) -> Result<(&str, &str), ExtractError> {
    identifier
        .split_once('/')
        .filter(|(host, site)| !host.is_empty() && !site.is_empty())
        .ok_or_else(|| {
            ExtractError::Parse(format!(
                "workday identifier must be <host>/<site>, got {identifier}"
            ))
        })
}

pub fn search_url(host: &str, site: &str) -> Result<String, ExtractError> {
    let org = host
        .split('.')
        .next()
        .filter(|org| !org.is_empty())
        .ok_or_else(|| ExtractError::Parse(format!("bad workday host {host}")))?;
    Ok(format!("https://{host}/wday/cxs/{org}/{site}/jobs"))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: usize,
    #[serde(rename = "jobPostings", default)]
    job_postings: Vec<JobPosting>,
}

#[derive(Debug, Deserialize)]
struct JobPosting {
    title: Option<String>,
    #[serde(rename = "externalPath")]
    external_path: Option<String>,
    #[serde(rename = "locationsText")]
    locations_text: Option<String>,
    #[serde(rename = "postedOn")]
    posted_on: Option<String>,
    #[serde(rename = "timeType")]
    time_type: Option<String>,
}

/// Parse one page of search results into (jobs, reported_total).
pub fn parse_search_page(body: &str, host: &str) -> Result<(Vec<ExtractedJob>, usize), ExtractError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| ExtractError::Parse(e.to_string()))?;

    let jobs = response
        .job_postings
        .into_iter()
        .filter_map(|posting| {
            let title = posting.title.filter(|t| !t.is_empty())?;
            let path = posting.external_path?;
            Some(ExtractedJob {
                title,
                source_url: format!("https://{host}{path}"),
                location: posting.locations_text,
                employment_type: posting.time_type,
                posted_at: posting.posted_on,
                ..Default::default()
            })
        })
        .collect();

    Ok((jobs, response.total))
}

pub struct WorkdayExtractor;

#[async_trait]
impl Extractor for WorkdayExtractor {
    fn ats_type(&self) -> AtsType {
        AtsType::Workday
    }

    async fn list(
        &self,
        fetcher: &Fetcher,
        company: &Company,
    ) -> Result<Vec<ExtractedJob>, ExtractError> {
        let identifier = require_identifier(company)?;
        let (host, site) = split_identifier(identifier)?;
        let url = search_url(host, site)?;

        let mut all_jobs = Vec::new();
        let mut offset = 0usize;

        for _ in 0..MAX_PAGES {
            let body = json!({
                "appliedFacets": {},
                "limit": PAGE_SIZE,
                "offset": offset,
                "searchText": ""
            });
            let response = fetcher.post_json(&url, &body).await?;
            let (jobs, total) = parse_search_page(&response.body, host)?;

            let page_len = jobs.len();
            all_jobs.extend(jobs);
            offset += PAGE_SIZE;

            if page_len == 0 || all_jobs.len() >= total || offset >= total {
                break;
            }
        }

        tracing::info!(
            company = %company.name,
            host,
            job_count = all_jobs.len(),
            "Extracted from Workday search API"
        );
        Ok(all_jobs)
    }
}
