//! Ashby job board extractor
//!
//! Reads the posting-api job-board endpoint. Descriptions arrive as HTML
//! and are flattened to text.

use async_trait::async_trait;
use serde::Deserialize;

use super::{html_to_text, require_identifier, ExtractError, ExtractedJob, Extractor};
use crate::db::companies::Company;
use crate::fetch::Fetcher;
use crate::types::AtsType;

pub fn job_board_url(board: &str) -> String {
    format!("https://api.ashbyhq.com/posting-api/job-board/{board}?includeCompensation=true")
}

#[derive(Debug, Deserialize)]
struct BoardResponse {
    #[serde(default)]
    jobs: Vec<BoardJob>,
}

#[derive(Debug, Deserialize)]
struct BoardJob {
    #[serde(default)]
    title: String,
    #[serde(rename = "jobUrl")]
    job_url: Option<String>,
    #[serde(rename = "applyUrl")]
    apply_url: Option<String>,
    location: Option<String>,
    department: Option<String>,
    #[serde(rename = "employmentType")]
    employment_type: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    #[serde(rename = "descriptionHtml")]
    description_html: Option<String>,
    compensation: Option<Compensation>,
    #[serde(rename = "isListed", default = "default_listed")]
    is_listed: bool,
}

fn default_listed() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Compensation {
    #[serde(rename = "compensationTierSummary")]
    summary: Option<String>,
}

/// Parse a job-board response body. Unlisted postings are dropped.
pub fn parse_job_board_json(body: &str) -> Result<Vec<ExtractedJob>, ExtractError> {
    let response: BoardResponse =
        serde_json::from_str(body).map_err(|e| ExtractError::Parse(e.to_string()))?;

    Ok(response
        .jobs
        .into_iter()
        .filter(|job| job.is_listed && !job.title.is_empty())
        .filter_map(|job| {
            let source_url = job.job_url.or(job.apply_url)?;
            Some(ExtractedJob {
                title: job.title,
                source_url,
                description: job
                    .description_html
                    .map(|html| html_to_text(&html))
                    .filter(|text| !text.is_empty()),
                location: job.location,
                department: job.department,
                employment_type: job.employment_type,
                posted_at: job.published_at,
                salary: job.compensation.and_then(|c| c.summary),
            })
        })
        .collect())
}

pub struct AshbyExtractor;

#[async_trait]
impl Extractor for AshbyExtractor {
    fn ats_type(&self) -> AtsType {
        AtsType::Ashby
    }

    async fn list(
        &self,
        fetcher: &Fetcher,
        company: &Company,
    ) -> Result<Vec<ExtractedJob>, ExtractError> {
        let board = require_identifier(company)?;
        let response = fetcher.fetch_api(&job_board_url(board)).await?;
        let jobs = parse_job_board_json(&response.body)?;

        tracing::info!(company = %company.name, board, job_count = jobs.len(), "Extracted from Ashby API");
        Ok(jobs)
    }
}
