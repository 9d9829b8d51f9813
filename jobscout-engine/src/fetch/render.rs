//! Rendered fetches through the headless-browser collaborator
//!
//! The browser service leases a page, navigates it, waits for network-idle
//! (or an explicit selector) and returns the rendered HTML. The lease is
//! released on every exit path, including timeouts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::FetchError;

const RENDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct AcquireRequest<'a> {
    url: &'a str,
    wait_until: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<&'a str>,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct AcquireResponse {
    page_id: String,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    html: String,
    status_code: Option<u16>,
}

/// Result of a rendered fetch.
#[derive(Debug)]
pub struct Rendered {
    pub html: String,
    pub status_code: u16,
}

/// HTTP client for the browser service.
pub struct RenderClient {
    client: reqwest::Client,
    base_url: String,
}

impl RenderClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Render `url` and return the settled DOM.
    ///
    /// The page lease is released unconditionally: the navigate/read body
    /// runs first, then release fires whether it succeeded, failed or
    /// timed out.
    pub async fn render(
        &self,
        url: &str,
        wait_for_selector: Option<&str>,
    ) -> Result<Rendered, FetchError> {
        let acquire: AcquireResponse = self
            .client
            .post(format!("{}/pages", self.base_url))
            .json(&AcquireRequest {
                url,
                wait_until: "networkidle",
                wait_for_selector,
                timeout_ms: RENDER_TIMEOUT.as_millis() as u64,
            })
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let outcome = tokio::time::timeout(RENDER_TIMEOUT, self.read_content(&acquire.page_id)).await;

        self.release(&acquire.page_id).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(FetchError::RenderTimeout),
        }
    }

    async fn read_content(&self, page_id: &str) -> Result<Rendered, FetchError> {
        let content: ContentResponse = self
            .client
            .get(format!("{}/pages/{}/content", self.base_url, page_id))
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Rendered {
            html: content.html,
            status_code: content.status_code.unwrap_or(200),
        })
    }

    async fn release(&self, page_id: &str) {
        let result = self
            .client
            .delete(format!("{}/pages/{}", self.base_url, page_id))
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!(page_id, error = %e, "Failed to release browser page");
        }
    }
}
