//! Greenhouse board extractor
//!
//! Reads the public boards API. The list endpoint returns structured
//! fields without descriptions; enrichment fills those in from the job
//! detail endpoint.

use async_trait::async_trait;
use serde::Deserialize;

use super::{require_identifier, ExtractError, ExtractedJob, Extractor};
use crate::db::companies::Company;
use crate::fetch::Fetcher;
use crate::types::AtsType;

pub fn board_api_url(board: &str) -> String {
    format!("https://boards-api.greenhouse.io/v1/boards/{board}/jobs")
}

pub(crate) fn job_api_url(board: &str, job_id: &str) -> String {
    format!("https://boards-api.greenhouse.io/v1/boards/{board}/jobs/{job_id}")
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
    #[serde(default)]
    absolute_url: String,
    location: Option<Location>,
    #[serde(default)]
    departments: Vec<Department>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Department {
    name: Option<String>,
}

/// Parse a boards API response body.
pub fn parse_board_json(body: &str) -> Result<Vec<ExtractedJob>, ExtractError> {
    let response: BoardResponse =
        serde_json::from_str(body).map_err(|e| ExtractError::Parse(e.to_string()))?;

    Ok(response
        .jobs
        .into_iter()
        .filter(|job| !job.title.is_empty() && !job.absolute_url.is_empty())
        .map(|job| {
            let departments: Vec<String> = job
                .departments
                .iter()
                .filter_map(|d| d.name.clone())
                .collect();
            ExtractedJob {
                title: job.title,
                source_url: job.absolute_url,
                location: job.location.and_then(|l| l.name),
                department: (!departments.is_empty()).then(|| departments.join(", ")),
                posted_at: job.updated_at,
                ..Default::default()
            }
        })
        .collect())
}

pub struct GreenhouseExtractor;

#[async_trait]
impl Extractor for GreenhouseExtractor {
    fn ats_type(&self) -> AtsType {
        AtsType::Greenhouse
    }

    async fn list(
        &self,
        fetcher: &Fetcher,
        company: &Company,
    ) -> Result<Vec<ExtractedJob>, ExtractError> {
        let board = require_identifier(company)?;
        let response = fetcher.fetch_api(&board_api_url(board)).await?;
        let jobs = parse_board_json(&response.body)?;

        tracing::info!(company = %company.name, board, job_count = jobs.len(), "Extracted from Greenhouse API");
        Ok(jobs)
    }
}
