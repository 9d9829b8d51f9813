//! Per-host token-bucket rate limiting
//!
//! Buckets are process-shared and keyed by registrable host. ATS vendor
//! API hosts get a more permissive default than unknown hosts. Limits are
//! data, not code: the limiter is constructed from a table of
//! `RateLimitConfig` values.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Steady rate + burst for one host class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Sustained requests per second
    pub steady_rate: f64,
    /// Bucket capacity (requests that may fire back-to-back)
    pub burst: f64,
}

impl RateLimitConfig {
    /// Conservative default for unknown hosts.
    pub const DEFAULT: RateLimitConfig = RateLimitConfig {
        steady_rate: 1.0,
        burst: 2.0,
    };

    /// ATS vendor APIs tolerate more traffic.
    pub const ATS_VENDOR: RateLimitConfig = RateLimitConfig {
        steady_rate: 5.0,
        burst: 10.0,
    };
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: config.burst,
            capacity: config.burst,
            refill_per_sec: config.steady_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Process-shared limiter over all crawled hosts.
pub struct HostRateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    overrides: HashMap<String, RateLimitConfig>,
    default: RateLimitConfig,
}

/// Hosts classed as ATS vendor API endpoints.
const ATS_VENDOR_HOSTS: &[&str] = &[
    "greenhouse.io",
    "lever.co",
    "ashbyhq.com",
    "myworkdayjobs.com",
];

impl HostRateLimiter {
    pub fn new() -> Self {
        let overrides = ATS_VENDOR_HOSTS
            .iter()
            .map(|host| (host.to_string(), RateLimitConfig::ATS_VENDOR))
            .collect();
        Self {
            buckets: Mutex::new(HashMap::new()),
            overrides,
            default: RateLimitConfig::DEFAULT,
        }
    }

    fn config_for(&self, host: &str) -> RateLimitConfig {
        self.overrides
            .iter()
            .find(|(suffix, _)| host == suffix.as_str() || host.ends_with(&format!(".{suffix}")))
            .map(|(_, config)| *config)
            .unwrap_or(self.default)
    }

    /// Wait until a request to `host` is within budget.
    ///
    /// The mutex is held only for the bucket arithmetic; the sleep happens
    /// outside it so concurrent callers for other hosts never queue behind
    /// a throttled one.
    pub async fn acquire(&self, host: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock();
                let bucket = buckets
                    .entry(host.to_string())
                    .or_insert_with(|| TokenBucket::new(self.config_for(host)));
                match bucket.try_take(Instant::now()) {
                    Ok(()) => None,
                    Err(wait) => Some(wait),
                }
            };

            match wait {
                None => return,
                Some(wait) => {
                    tracing::debug!(host, wait_ms = wait.as_millis() as u64, "Rate limiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl Default for HostRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduce a host to its registrable suffix (last two labels).
///
/// `boards.greenhouse.io` and `api.greenhouse.io` share one bucket.
pub fn registrable_host(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        host.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}
