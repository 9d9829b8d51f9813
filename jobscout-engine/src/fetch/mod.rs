//! Fetcher: HTTP and rendered retrieval with crawl policy
//!
//! Single entry point for all outbound page/API traffic. Applies per-host
//! token-bucket rate limits, robots.txt (for non-API endpoints), bounded
//! retries with exponential backoff and full jitter, and Retry-After
//! handling for 429s. Content digests drive snapshot change detection.

mod rate_limit;
mod render;
mod robots;

pub use rate_limit::{registrable_host, HostRateLimiter, RateLimitConfig};
pub use render::{RenderClient, Rendered};
pub use robots::{RobotsCache, RobotsRules};

use rand::Rng;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

use jobscout_common::Config;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const RETRY_AFTER_CAP: Duration = Duration::from_secs(120);
const PLAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure kinds surfaced by the fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("client error: HTTP {0}")]
    HttpClient(u16),

    #[error("server error: HTTP {0}")]
    HttpServer(u16),

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("denied by robots.txt")]
    RobotsDenied,

    #[error("render timed out")]
    RenderTimeout,

    #[error("not found")]
    NotFound,

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Stable kind tag for logs and run counters.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::HttpClient(_) => "http_4xx",
            FetchError::HttpServer(_) => "http_5xx",
            FetchError::RateLimited => "rate_limited",
            FetchError::RobotsDenied => "robots_denied",
            FetchError::RenderTimeout => "render_timeout",
            FetchError::NotFound => "not_found",
            FetchError::InvalidUrl(_) => "http_4xx",
        }
    }

    /// Fatal kinds are reported to the caller without retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FetchError::HttpClient(_)
                | FetchError::RobotsDenied
                | FetchError::NotFound
                | FetchError::InvalidUrl(_)
        )
    }
}

/// Successful retrieval.
#[derive(Debug)]
pub struct FetchResponse {
    pub body: String,
    pub status: u16,
    pub rendered: bool,
}

/// Per-request knobs.
#[derive(Debug, Default, Clone)]
pub struct FetchOptions {
    /// ATS vendor API endpoint: robots.txt does not apply.
    pub api_endpoint: bool,
    /// Use the headless-browser collaborator.
    pub rendered: bool,
    /// Selector to await before reading rendered content.
    pub wait_for_selector: Option<String>,
}

impl FetchOptions {
    pub fn api() -> Self {
        Self {
            api_endpoint: true,
            ..Default::default()
        }
    }

    pub fn rendered() -> Self {
        Self {
            rendered: true,
            ..Default::default()
        }
    }
}

/// Policy-enforcing retrieval client.
pub struct Fetcher {
    client: reqwest::Client,
    limiter: HostRateLimiter,
    robots: RobotsCache,
    render: Option<RenderClient>,
    user_agents: Vec<String>,
}

impl Fetcher {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PLAIN_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        let render = config
            .browser_service_url
            .as_ref()
            .map(|base| RenderClient::new(client.clone(), base.clone()));

        // Rotating pool: the configured crawler identity plus common
        // browser strings for hosts that reject unknown agents.
        let user_agents = vec![
            config.crawl_user_agent.clone(),
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/124.0 Safari/537.36"
                .to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Gecko/20100101 Firefox/126.0"
                .to_string(),
        ];

        Ok(Self {
            robots: RobotsCache::new(client.clone(), config.crawl_user_agent.clone()),
            client,
            limiter: HostRateLimiter::new(),
            render,
            user_agents,
        })
    }

    /// Fetch a page URL (robots.txt applies).
    pub async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.fetch_with(url, &FetchOptions::default()).await
    }

    /// Fetch an ATS vendor API URL (robots-exempt).
    pub async fn fetch_api(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.fetch_with(url, &FetchOptions::api()).await
    }

    /// Fetch with explicit options.
    pub async fn fetch_with(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchResponse, FetchError> {
        let parsed =
            url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .map(registrable_host)
            .ok_or_else(|| FetchError::InvalidUrl(format!("{url}: missing host")))?;

        if !options.api_endpoint && !self.robots.is_allowed(&parsed).await {
            tracing::warn!(url, "Blocked by robots.txt");
            return Err(FetchError::RobotsDenied);
        }

        if options.rendered {
            if let Some(render) = &self.render {
                self.limiter.acquire(&host).await;
                let rendered = render
                    .render(url, options.wait_for_selector.as_deref())
                    .await?;
                return Ok(FetchResponse {
                    body: rendered.html,
                    status: rendered.status_code,
                    rendered: true,
                });
            }
            tracing::warn!(url, "Browser service not configured, falling back to plain fetch");
        }

        self.fetch_plain(url, &host, |client_url| self.client.get(client_url))
            .await
    }

    /// POST a JSON body (Workday-style search APIs). Same retry policy as
    /// GETs; API endpoints are robots-exempt by definition.
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<FetchResponse, FetchError> {
        let parsed =
            url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .map(registrable_host)
            .ok_or_else(|| FetchError::InvalidUrl(format!("{url}: missing host")))?;

        let body = body.clone();
        self.fetch_plain(url, &host, move |client_url| {
            self.client.post(client_url).json(&body)
        })
        .await
    }

    async fn fetch_plain<'a, F>(
        &'a self,
        url: &str,
        host: &str,
        make_request: F,
    ) -> Result<FetchResponse, FetchError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder + 'a,
    {
        let mut last_error = FetchError::Transport("no attempts made".into());

        for attempt in 0..MAX_ATTEMPTS {
            self.limiter.acquire(host).await;

            let request = make_request(url).header(
                reqwest::header::USER_AGENT,
                self.pick_user_agent(),
            );

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response
                            .text()
                            .await
                            .map_err(|e| FetchError::Transport(e.to_string()))?;
                        return Ok(FetchResponse {
                            body,
                            status: status.as_u16(),
                            rendered: false,
                        });
                    }

                    if status.as_u16() == 404 {
                        return Err(FetchError::NotFound);
                    }

                    if status.as_u16() == 429 {
                        let delay = retry_after(&response)
                            .unwrap_or_else(|| backoff_delay(attempt))
                            .min(RETRY_AFTER_CAP);
                        tracing::warn!(url, attempt, delay_s = delay.as_secs(), "Rate limited");
                        last_error = FetchError::RateLimited;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status.is_client_error() {
                        return Err(FetchError::HttpClient(status.as_u16()));
                    }

                    // 5xx: retryable
                    tracing::warn!(url, status = status.as_u16(), attempt, "Server error");
                    last_error = FetchError::HttpServer(status.as_u16());
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                Err(e) => {
                    tracing::warn!(url, attempt, error = %e, "Transport error");
                    last_error = FetchError::Transport(e.to_string());
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }

        Err(last_error)
    }

    fn pick_user_agent(&self) -> &str {
        let index = rand::thread_rng().gen_range(0..self.user_agents.len());
        &self.user_agents[index]
    }
}

/// Parse a Retry-After header (delta-seconds form).
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Exponential backoff with full jitter: uniform in [0, base * 2^attempt].
fn backoff_delay(attempt: u32) -> Duration {
    let ceiling = BACKOFF_BASE.as_millis() as u64 * 2u64.pow(attempt);
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}

/// Content digest used for snapshot change detection.
pub fn content_hash(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_pure() {
        let a = content_hash("<html>jobs</html>");
        let b = content_hash("<html>jobs</html>");
        assert_eq!(a, b);
        assert_ne!(a, content_hash("<html>other</html>"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn backoff_stays_under_ceiling() {
        for attempt in 0..3 {
            let ceiling = 500 * 2u64.pow(attempt);
            for _ in 0..20 {
                assert!(backoff_delay(attempt).as_millis() as u64 <= ceiling);
            }
        }
    }

    #[test]
    fn fatal_classification() {
        assert!(FetchError::NotFound.is_fatal());
        assert!(FetchError::RobotsDenied.is_fatal());
        assert!(FetchError::HttpClient(403).is_fatal());
        assert!(!FetchError::HttpServer(502).is_fatal());
        assert!(!FetchError::RateLimited.is_fatal());
        assert!(!FetchError::Transport("reset".into()).is_fatal());
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(FetchError::RateLimited.kind(), "rate_limited");
        assert_eq!(FetchError::HttpServer(500).kind(), "http_5xx");
        assert_eq!(FetchError::NotFound.kind(), "not_found");
    }
}
