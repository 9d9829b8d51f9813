//! LLM fallback extractor for custom careers pages
//!
//! Fetches the careers page (rendered when the plain HTML carries no job
//! links), reduces it to text within a character budget and asks the
//! completion endpoint for job listings under a strict JSON schema.
//! Responses that fail validation are never persisted: one retry with a
//! reduced excerpt, then zero jobs.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{ExtractError, ExtractedJob, Extractor};
use crate::db::companies::Company;
use crate::fetch::{FetchOptions, Fetcher};
use crate::types::AtsType;

/// Character budget for the page excerpt sent to the model.
const EXCERPT_BUDGET: usize = 24_000;

const SYSTEM_PROMPT: &str = "You are a job listing extractor. Given text from a careers page, \
extract every job posting. For each job return: title (required), location (or null), \
department (or null), employment_type (or null), url_path (relative or absolute link to the \
posting, or null). Only extract real job postings, never navigation items or headings. \
Return {\"jobs\": []} when the page lists no jobs.";

fn response_schema() -> serde_json::Value {
    json!({
        "name": "job_listings",
        "strict": true,
        "schema": {
            "type": "object",
            "properties": {
                "jobs": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string"},
                            "location": {"type": ["string", "null"]},
                            "department": {"type": ["string", "null"]},
                            "employment_type": {"type": ["string", "null"]},
                            "url_path": {"type": ["string", "null"]}
                        },
                        "required": ["title", "location", "department", "employment_type", "url_path"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["jobs"],
            "additionalProperties": false
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LlmJobs {
    jobs: Vec<LlmJob>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LlmJob {
    title: String,
    location: Option<String>,
    department: Option<String>,
    employment_type: Option<String>,
    url_path: Option<String>,
}

/// Validate model output against the listing schema and build absolute
/// source URLs. Never trusts the model: unknown fields, missing fields or
/// non-JSON content all reject.
pub fn validate_listing_json(content: &str, page_url: &str) -> Result<Vec<ExtractedJob>, ExtractError> {
    let parsed: LlmJobs = serde_json::from_str(content)
        .map_err(|e| ExtractError::SchemaViolation(e.to_string()))?;

    let base = Url::parse(page_url).ok();

    Ok(parsed
        .jobs
        .into_iter()
        .filter(|job| !job.title.trim().is_empty())
        .map(|job| {
            let source_url = match (&job.url_path, &base) {
                (Some(path), _) if path.starts_with("http") => path.clone(),
                (Some(path), Some(base)) => base
                    .join(path)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| page_url.to_string()),
                _ => page_url.to_string(),
            };
            ExtractedJob {
                title: job.title,
                source_url,
                location: job.location,
                department: job.department,
                employment_type: job.employment_type,
                ..Default::default()
            }
        })
        .collect())
}

/// Does the plain HTML already expose job links? If not, the page needs a
/// browser to materialize its listings.
pub fn has_job_links(html: &str) -> bool {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").unwrap();
    document.select(&anchors).any(|a| {
        let href = a.value().attr("href").unwrap_or("").to_lowercase();
        ["job", "career", "position", "opening", "vacanc"]
            .iter()
            .any(|needle| href.contains(needle))
    })
}

/// Reduce a page to text within the excerpt budget.
pub fn page_excerpt(html: &str, budget: usize) -> String {
    let document = Html::parse_document(html);
    let body = Selector::parse("body").unwrap();
    let text: String = match document.select(&body).next() {
        Some(body) => body.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    };
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    // Links matter for url_path extraction, so append hrefs that look like
    // postings.
    let anchors = Selector::parse("a[href]").unwrap();
    let mut links = String::new();
    for anchor in document.select(&anchors) {
        let href = anchor.value().attr("href").unwrap_or("");
        let label = anchor.text().collect::<Vec<_>>().join(" ");
        if !href.is_empty() && !label.trim().is_empty() {
            links.push_str(&format!("\n[{}]({})", label.trim(), href));
        }
    }

    let mut excerpt = format!("{collapsed}{links}");
    if excerpt.len() > budget {
        let mut cut = budget;
        while cut > 0 && !excerpt.is_char_boundary(cut) {
            cut -= 1;
        }
        excerpt.truncate(cut);
    }
    excerpt
}

/// Custom-page extractor backed by the completion endpoint.
pub struct LlmExtractor {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    model: String,
}

impl LlmExtractor {
    pub fn new(config: &jobscout_common::Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.llm_endpoint.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        }
    }

    /// Extractor that reports itself unavailable (tests, unconfigured
    /// deployments).
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: None,
            api_key: None,
            model: String::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    async fn complete(&self, excerpt: &str, page_url: &str) -> Result<String, ExtractError> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| ExtractError::Unavailable("LLM endpoint not configured".into()))?;
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ExtractError::Unavailable("LLM API key not configured".into()))?;

        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": format!("Careers page: {page_url}\n\n{excerpt}")}
            ],
            "response_format": {"type": "json_schema", "json_schema": response_schema()},
            "max_tokens": 4000
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", endpoint.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| ExtractError::Unavailable(e.to_string()))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ExtractError::Parse(e.to_string()))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ExtractError::Parse("completion response had no content".into()))
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    fn ats_type(&self) -> AtsType {
        AtsType::Custom
    }

    async fn list(
        &self,
        fetcher: &Fetcher,
        company: &Company,
    ) -> Result<Vec<ExtractedJob>, ExtractError> {
        if !self.is_available() {
            tracing::debug!(company = %company.name, "LLM extraction skipped, endpoint not configured");
            return Ok(Vec::new());
        }

        let careers_url = company
            .careers_url
            .as_deref()
            .ok_or_else(|| ExtractError::Parse(format!("{} has no careers URL", company.name)))?;

        let plain = fetcher.fetch(careers_url).await?;
        let html = if has_job_links(&plain.body) {
            plain.body
        } else {
            // Listings likely rendered client-side
            let rendered = fetcher
                .fetch_with(careers_url, &FetchOptions::rendered())
                .await?;
            rendered.body
        };

        let excerpt = page_excerpt(&html, EXCERPT_BUDGET);

        // First attempt, then one retry on a reduced excerpt
        match self.attempt(&excerpt, careers_url).await {
            Ok(jobs) => Ok(jobs),
            Err(first_error) => {
                tracing::warn!(
                    company = %company.name,
                    error = %first_error,
                    "LLM extraction attempt failed, retrying with reduced excerpt"
                );
                let reduced = page_excerpt(&html, EXCERPT_BUDGET / 2);
                match self.attempt(&reduced, careers_url).await {
                    Ok(jobs) => Ok(jobs),
                    Err(second_error) => {
                        tracing::error!(
                            company = %company.name,
                            error = %second_error,
                            "extractor_llm_failed"
                        );
                        Ok(Vec::new())
                    }
                }
            }
        }
    }
}

impl LlmExtractor {
    async fn attempt(&self, excerpt: &str, page_url: &str) -> Result<Vec<ExtractedJob>, ExtractError> {
        let content = self.complete(excerpt, page_url).await?;
        validate_listing_json(&content, page_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_response_maps_to_jobs() {
        let content = r#"{"jobs": [
            {"title": "Engineer", "location": "Remote", "department": null,
             "employment_type": "Full-time", "url_path": "/careers/engineer"},
            {"title": "Designer", "location": null, "department": "Design",
             "employment_type": null, "url_path": "https://acme.test/jobs/designer"}
        ]}"#;
        let jobs = validate_listing_json(content, "https://acme.test/careers").unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].source_url, "https://acme.test/careers/engineer");
        assert_eq!(jobs[1].source_url, "https://acme.test/jobs/designer");
    }

    #[test]
    fn unknown_fields_reject() {
        let content = r#"{"jobs": [], "confidence": 0.9}"#;
        assert!(matches!(
            validate_listing_json(content, "https://acme.test"),
            Err(ExtractError::SchemaViolation(_))
        ));
    }

    #[test]
    fn non_json_rejects() {
        assert!(matches!(
            validate_listing_json("Sure! Here are the jobs...", "https://acme.test"),
            Err(ExtractError::SchemaViolation(_))
        ));
    }

    #[test]
    fn empty_titles_are_dropped() {
        let content = r#"{"jobs": [{"title": "  ", "location": null, "department": null,
            "employment_type": null, "url_path": null}]}"#;
        let jobs = validate_listing_json(content, "https://acme.test").unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn job_link_detection() {
        assert!(has_job_links(
            "<html><body><a href=\"/careers/123\">Engineer</a></body></html>"
        ));
        assert!(has_job_links(
            "<html><body><a href=\"https://x.test/jobs/1\">Role</a></body></html>"
        ));
        assert!(!has_job_links(
            "<html><body><a href=\"/about\">About us</a></body></html>"
        ));
    }

    #[test]
    fn excerpt_respects_budget() {
        let html = format!(
            "<html><body><p>{}</p></body></html>",
            "jobs ".repeat(10_000)
        );
        let excerpt = page_excerpt(&html, 1000);
        assert!(excerpt.len() <= 1000);
    }

    #[test]
    fn excerpt_keeps_links() {
        let html = "<html><body><h1>Careers</h1>\
            <a href=\"/jobs/1\">Platform Engineer</a></body></html>";
        let excerpt = page_excerpt(html, 24_000);
        assert!(excerpt.contains("[Platform Engineer](/jobs/1)"));
    }
}
