//! Per-ATS job extractors
//!
//! One extractor per vendor behind a registry keyed by ATS type, plus the
//! LLM fallback for custom careers pages. Adding a vendor is a registry
//! entry and an `Extractor` implementation; nothing else changes.

mod ashby;
pub mod enrich;
mod greenhouse;
mod lever;
pub mod llm;
mod workday;

pub use ashby::{job_board_url as ashby_board_url, parse_job_board_json as parse_ashby_board, AshbyExtractor};
pub use greenhouse::{
    board_api_url as greenhouse_board_url, parse_board_json as parse_greenhouse_board,
    GreenhouseExtractor,
};
pub use lever::{
    parse_postings_json as parse_lever_postings, postings_api_url as lever_postings_url,
    LeverExtractor,
};
pub use llm::LlmExtractor;
pub use workday::{
    search_url as workday_search_url, split_identifier as workday_identifier_parts,
    WorkdayExtractor,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::db::companies::Company;
use crate::fetch::{FetchError, Fetcher};
use crate::types::AtsType;

/// A job record as observed at the source, before persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedJob {
    pub title: String,
    pub source_url: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub department: Option<String>,
    pub employment_type: Option<String>,
    pub posted_at: Option<String>,
    pub salary: Option<String>,
}

/// Extraction failures. Zero jobs for a company is not an error.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("extractor unavailable: {0}")]
    Unavailable(String),

    #[error("missing ats identifier for {0}")]
    MissingIdentifier(String),
}

/// Capability implemented by every extractor.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// The vendor this extractor reads.
    fn ats_type(&self) -> AtsType;

    /// List the company's current postings.
    async fn list(
        &self,
        fetcher: &Fetcher,
        company: &Company,
    ) -> Result<Vec<ExtractedJob>, ExtractError>;
}

/// Registry of extractors keyed by ATS type.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Standard registry: the four vendor extractors plus the LLM
    /// fallback for custom pages.
    pub fn new(llm: LlmExtractor) -> Self {
        Self {
            extractors: vec![
                Box::new(GreenhouseExtractor),
                Box::new(LeverExtractor),
                Box::new(AshbyExtractor),
                Box::new(WorkdayExtractor),
                Box::new(llm),
            ],
        }
    }

    /// Resolve the extractor for an ATS type. Unknown resolves to the
    /// custom fallback.
    pub fn for_ats(&self, ats_type: AtsType) -> Option<&dyn Extractor> {
        let effective = match ats_type {
            AtsType::Unknown => AtsType::Custom,
            other => other,
        };
        self.extractors
            .iter()
            .map(|boxed| boxed.as_ref())
            .find(|extractor| extractor.ats_type() == effective)
    }

    /// ATS types with a registered extractor (crawl fan-out order).
    pub fn supported_types(&self) -> Vec<AtsType> {
        self.extractors.iter().map(|e| e.ats_type()).collect()
    }
}

/// Identifier guard shared by vendor extractors.
fn require_identifier<'a>(company: &'a Company) -> Result<&'a str, ExtractError> {
    company
        .ats_identifier
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ExtractError::MissingIdentifier(company.name.clone()))
}

/// Strip HTML tags to readable text. Used wherever an endpoint hands back
/// HTML descriptions.
pub fn html_to_text(html: &str) -> String {
    let fragment = scraper::Html::parse_fragment(html);
    let text: Vec<&str> = fragment.root_element().text().collect();
    let joined = text.join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}
