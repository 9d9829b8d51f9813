//! Service configuration resolved from environment variables
//!
//! Secrets (API keys, service URLs) stay optional: the engine degrades
//! gracefully when an external collaborator is not configured (the LLM
//! fallback extractor and the embedder simply report themselves
//! unavailable), matching how optional integrations behave elsewhere in
//! the pipeline.

use std::path::PathBuf;

use tracing::warn;

/// Runtime configuration for the JobScout engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file path
    pub database_path: PathBuf,
    /// HTTP bind address for the API server
    pub bind_addr: String,

    /// User agent presented when crawling
    pub crawl_user_agent: String,
    /// Worker pool size for stage-local parallelism
    pub max_concurrent_workers: usize,
    /// Hours between crawls of the same company
    pub default_crawl_interval_hours: i64,
    /// Days before an active job is due for re-verification
    pub verify_refresh_days: i64,

    /// Embedding vector dimensionality (fixed by the model)
    pub embedding_dim: usize,
    /// Model version tag persisted next to each vector
    pub embedding_model_version: String,
    /// Embedding service endpoint (absent disables embedding generation)
    pub embedding_endpoint: Option<String>,
    /// Embedding service API key
    pub embedding_api_key: Option<String>,
    /// Embedding request batch size
    pub embedding_batch_size: usize,

    /// Completion endpoint API key for the LLM fallback extractor
    pub llm_api_key: Option<String>,
    /// Completion endpoint base URL
    pub llm_endpoint: Option<String>,
    /// Model identifier sent to the completion endpoint
    pub llm_model: String,

    /// Headless-browser service base URL (absent disables rendered fetches)
    pub browser_service_url: Option<String>,
    /// Transactional email provider key (consumed by the digest sender,
    /// which lives outside this service)
    pub email_api_key: Option<String>,
}

impl Config {
    /// Resolve configuration from the process environment.
    ///
    /// Every value has a usable default except the external-service
    /// secrets, which stay `None` when unset.
    pub fn from_env() -> Self {
        Self {
            database_path: PathBuf::from(env_or("DATABASE_PATH", "jobscout.db")),
            bind_addr: env_or("BIND_ADDR", "127.0.0.1:8700"),
            crawl_user_agent: env_or(
                "CRAWL_USER_AGENT",
                "JobScoutBot/0.1 (+https://jobscout.dev/bot)",
            ),
            max_concurrent_workers: env_parsed("MAX_CONCURRENT_WORKERS", 8),
            default_crawl_interval_hours: env_parsed("DEFAULT_CRAWL_INTERVAL_HOURS", 24),
            verify_refresh_days: env_parsed("VERIFY_REFRESH_DAYS", 7),
            embedding_dim: env_parsed("EMBEDDING_DIM", 384),
            embedding_model_version: env_or("EMBEDDING_MODEL_VERSION", "text-embed-v1"),
            embedding_endpoint: env_opt("EMBEDDING_ENDPOINT"),
            embedding_api_key: env_opt("EMBEDDING_API_KEY"),
            embedding_batch_size: env_parsed("EMBEDDING_BATCH_SIZE", 32),
            llm_api_key: env_opt("LLM_API_KEY"),
            llm_endpoint: env_opt("LLM_ENDPOINT"),
            llm_model: env_or("LLM_MODEL", "gpt-4o-mini"),
            browser_service_url: env_opt("BROWSER_SERVICE_URL"),
            email_api_key: env_opt("EMAIL_API_KEY"),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Unparseable environment value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_environment() {
        let config = Config::from_env();
        assert_eq!(config.embedding_dim, 384);
        assert_eq!(config.verify_refresh_days, 7);
        assert_eq!(config.max_concurrent_workers, 8);
        assert!(config.crawl_user_agent.contains("JobScoutBot"));
    }
}
