//! Embedder: fixed-dimensional vectors for jobs and candidates
//!
//! Batched HTTP client against the embedding-model endpoint. Stateless
//! and safe to call from concurrent workers. Vectors persist with the
//! model version; regeneration happens only when the text inputs change
//! or the version is bumped (handled at the persistence layer).

use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;

use jobscout_common::Config;

use crate::db::candidates::{self, CandidateProfile};
use crate::db::jobs::{self, Job};

/// Description characters contributing to a job's embedding text.
const DESCRIPTION_EXCERPT: usize = 2_000;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding endpoint not configured")]
    Unavailable,

    #[error("embedding request failed: {0}")]
    Http(String),

    #[error("embedding response malformed: {0}")]
    BadResponse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for the embedding-model endpoint.
pub struct EmbeddingClient {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    model_version: String,
    dim: usize,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.embedding_endpoint.clone(),
            api_key: config.embedding_api_key.clone(),
            model_version: config.embedding_model_version.clone(),
            dim: config.embedding_dim,
            batch_size: config.embedding_batch_size.max(1),
        }
    }

    pub fn is_available(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed a batch of texts, preserving input order. Inputs beyond the
    /// configured batch size are sent in successive requests.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let endpoint = self.endpoint.as_ref().ok_or(EmbedError::Unavailable)?;
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let body = json!({
                "model": self.model_version,
                "input": chunk,
            });

            let mut request = self
                .client
                .post(format!("{}/embeddings", endpoint.trim_end_matches('/')))
                .json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request
                .send()
                .await
                .map_err(|e| EmbedError::Http(e.to_string()))?
                .error_for_status()
                .map_err(|e| EmbedError::Http(e.to_string()))?;

            let parsed: EmbeddingResponse = response
                .json()
                .await
                .map_err(|e| EmbedError::BadResponse(e.to_string()))?;

            if parsed.data.len() != chunk.len() {
                return Err(EmbedError::BadResponse(format!(
                    "asked for {} embeddings, got {}",
                    chunk.len(),
                    parsed.data.len()
                )));
            }

            for datum in parsed.data {
                if datum.embedding.len() != self.dim {
                    return Err(EmbedError::DimensionMismatch {
                        expected: self.dim,
                        actual: datum.embedding.len(),
                    });
                }
                vectors.push(datum.embedding);
            }
        }

        Ok(vectors)
    }
}

/// Text a job embeds under: title + location + skills + truncated
/// description.
pub fn job_embedding_text(job: &Job) -> String {
    let mut parts = vec![job.title.clone()];

    if let Some(seniority) = job.seniority {
        parts.push(format!("Level: {seniority}"));
    }
    if !job.locations.is_empty() {
        parts.push(format!("Location: {}", job.locations.join(", ")));
    }
    if !job.skills.is_empty() {
        parts.push(format!("Skills: {}", job.skills.join(", ")));
    }
    if let Some(description) = &job.description {
        let mut excerpt = description.clone();
        if excerpt.len() > DESCRIPTION_EXCERPT {
            let mut cut = DESCRIPTION_EXCERPT;
            while cut > 0 && !excerpt.is_char_boundary(cut) {
                cut -= 1;
            }
            excerpt.truncate(cut);
        }
        parts.push(excerpt);
    }

    parts.join(" ")
}

/// Text a candidate embeds under: role families + seniority + skills +
/// manual profile text.
pub fn candidate_embedding_text(profile: &CandidateProfile) -> String {
    let mut parts = Vec::new();

    if !profile.role_families.is_empty() {
        parts.push(format!(
            "Roles: {}",
            profile
                .role_families
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if let Some(seniority) = profile.seniority {
        parts.push(format!("Level: {seniority}"));
    }
    if !profile.skills.is_empty() {
        parts.push(format!("Skills: {}", profile.skills.join(", ")));
    }
    if let Some(text) = &profile.profile_text {
        parts.push(text.clone());
    }

    parts.join(" ")
}

/// Outcome of one embedding pass.
#[derive(Debug, Default, serde::Serialize)]
pub struct EmbeddingStats {
    pub jobs_embedded: usize,
    pub candidates_embedded: usize,
    pub failed: usize,
}

/// Embed every job and candidate missing a vector for the current model
/// version, in batches.
pub async fn run_embedding_stage(
    pool: &SqlitePool,
    client: &EmbeddingClient,
    batch_limit: i64,
) -> anyhow::Result<EmbeddingStats> {
    let mut stats = EmbeddingStats::default();

    if !client.is_available() {
        tracing::warn!("Embedding endpoint not configured, skipping embedding stage");
        return Ok(stats);
    }

    loop {
        let due = jobs::jobs_missing_embedding(pool, client.model_version(), batch_limit).await?;
        if due.is_empty() {
            break;
        }
        let texts: Vec<String> = due.iter().map(job_embedding_text).collect();
        match client.embed_batch(&texts).await {
            Ok(vectors) => {
                for (job, vector) in due.iter().zip(vectors.iter()) {
                    jobs::set_embedding(pool, job.id, vector, client.model_version()).await?;
                    stats.jobs_embedded += 1;
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "Job embedding batch failed");
                stats.failed += due.len();
                break;
            }
        }
    }

    loop {
        let due =
            candidates::profiles_missing_embedding(pool, client.model_version(), batch_limit)
                .await?;
        if due.is_empty() {
            break;
        }
        let texts: Vec<String> = due.iter().map(candidate_embedding_text).collect();
        match client.embed_batch(&texts).await {
            Ok(vectors) => {
                for (profile, vector) in due.iter().zip(vectors.iter()) {
                    candidates::set_embedding(pool, profile.id, vector, client.model_version())
                        .await?;
                    stats.candidates_embedded += 1;
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "Candidate embedding batch failed");
                stats.failed += due.len();
                break;
            }
        }
    }

    Ok(stats)
}
