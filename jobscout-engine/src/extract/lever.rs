//! Lever postings extractor
//!
//! Reads the public postings API, which includes plain-text descriptions
//! directly on the list response.

use async_trait::async_trait;
use serde::Deserialize;

use super::{require_identifier, ExtractError, ExtractedJob, Extractor};
use crate::db::companies::Company;
use crate::fetch::Fetcher;
use crate::types::AtsType;

pub fn postings_api_url(site: &str) -> String {
    format!("https://api.lever.co/v0/postings/{site}?mode=json")
}

#[derive(Debug, Deserialize)]
struct Posting {
    #[serde(default)]
    text: String,
    id: Option<String>,
    #[serde(rename = "hostedUrl")]
    hosted_url: Option<String>,
    #[serde(rename = "applyUrl")]
    apply_url: Option<String>,
    categories: Option<Categories>,
    #[serde(rename = "descriptionPlain")]
    description_plain: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<i64>,
    #[serde(rename = "salaryRange")]
    salary_range: Option<SalaryRange>,
}

#[derive(Debug, Deserialize)]
struct Categories {
    location: Option<String>,
    department: Option<String>,
    team: Option<String>,
    commitment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SalaryRange {
    min: Option<i64>,
    max: Option<i64>,
}

/// Parse a postings API response body.
pub fn parse_postings_json(body: &str, site: &str) -> Result<Vec<ExtractedJob>, ExtractError> {
    let postings: Vec<Posting> =
        serde_json::from_str(body).map_err(|e| ExtractError::Parse(e.to_string()))?;

    Ok(postings
        .into_iter()
        .filter(|posting| !posting.text.is_empty())
        .map(|posting| {
            let source_url = posting
                .hosted_url
                .or(posting.apply_url)
                .or_else(|| {
                    posting
                        .id
                        .as_ref()
                        .map(|id| format!("https://jobs.lever.co/{site}/{id}"))
                })
                .unwrap_or_default();

            let categories = posting.categories;
            let (location, department, commitment) = match categories {
                Some(c) => (c.location, c.department.or(c.team), c.commitment),
                None => (None, None, None),
            };

            let salary = posting.salary_range.and_then(|range| match (range.min, range.max) {
                (Some(min), Some(max)) => Some(format!("{min} - {max}")),
                (Some(min), None) => Some(min.to_string()),
                (None, Some(max)) => Some(max.to_string()),
                (None, None) => None,
            });

            ExtractedJob {
                title: posting.text,
                source_url,
                description: posting.description_plain.filter(|d| !d.trim().is_empty()),
                location,
                department,
                employment_type: commitment,
                posted_at: posting.created_at.map(|ms| ms.to_string()),
                salary,
            }
        })
        .filter(|job| !job.source_url.is_empty())
        .collect())
}

pub struct LeverExtractor;

#[async_trait]
impl Extractor for LeverExtractor {
    fn ats_type(&self) -> AtsType {
        AtsType::Lever
    }

    async fn list(
        &self,
        fetcher: &Fetcher,
        company: &Company,
    ) -> Result<Vec<ExtractedJob>, ExtractError> {
        let site = require_identifier(company)?;
        let response = fetcher.fetch_api(&postings_api_url(site)).await?;
        let jobs = parse_postings_json(&response.body, site)?;

        tracing::info!(company = %company.name, site, job_count = jobs.len(), "Extracted from Lever API");
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"[
        {
            "id": "a1b2c3",
            "text": "Backend Engineer",
            "hostedUrl": "https://jobs.lever.co/acme/a1b2c3",
            "categories": {
                "location": "Remote",
                "team": "Platform",
                "commitment": "Full-time"
            },
            "descriptionPlain": "Build APIs in Rust.",
            "createdAt": 1752000000000
        },
        {
            "id": "d4e5f6",
            "text": "Account Executive",
            "categories": null
        }
    ]"#;

    #[test]
    fn parses_postings_fixture() {
        let jobs = parse_postings_json(FIXTURE, "acme").unwrap();
        assert_eq!(jobs.len(), 2);

        assert_eq!(jobs[0].title, "Backend Engineer");
        assert_eq!(jobs[0].source_url, "https://jobs.lever.co/acme/a1b2c3");
        assert_eq!(jobs[0].location.as_deref(), Some("Remote"));
        assert_eq!(jobs[0].department.as_deref(), Some("Platform"));
        assert_eq!(jobs[0].employment_type.as_deref(), Some("Full-time"));
        assert_eq!(jobs[0].description.as_deref(), Some("Build APIs in Rust."));
        assert_eq!(jobs[0].posted_at.as_deref(), Some("1752000000000"));

        // URL reconstructed from the posting id when hostedUrl is absent
        assert_eq!(jobs[1].source_url, "https://jobs.lever.co/acme/d4e5f6");
        assert!(jobs[1].location.is_none());
    }

    #[test]
    fn null_categories_do_not_break_parsing() {
        let jobs = parse_postings_json(r#"[{"id": "x", "text": "Role", "categories": null}]"#, "co")
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn department_falls_back_to_team() {
        let body = r#"[{"id":"x","text":"Role","categories":{"department":"Sales","team":"SMB"}}]"#;
        let jobs = parse_postings_json(body, "co").unwrap();
        assert_eq!(jobs[0].department.as_deref(), Some("Sales"));
    }
}
