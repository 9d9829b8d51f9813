//! robots.txt fetching, caching and matching
//!
//! One fetch per host, cached for a day. A missing or unreadable
//! robots.txt means everything is allowed. Matching follows the common
//! longest-prefix rule over Allow/Disallow lines for our user agent (or
//! `*`).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    prefix: String,
}

/// Parsed rules applicable to our user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    rules: Vec<Rule>,
}

impl RobotsRules {
    /// Parse robots.txt content, keeping the group for `user_agent` when
    /// present, otherwise the `*` group.
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let ua_token = user_agent
            .split(['/', ' '])
            .next()
            .unwrap_or(user_agent)
            .to_ascii_lowercase();

        let mut star_rules = Vec::new();
        let mut ua_rules = Vec::new();
        let mut current_agents: Vec<String> = Vec::new();
        let mut in_group_body = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if in_group_body {
                        current_agents.clear();
                        in_group_body = false;
                    }
                    current_agents.push(value.to_ascii_lowercase());
                }
                "allow" | "disallow" => {
                    in_group_body = true;
                    if value.is_empty() && field == "disallow" {
                        // "Disallow:" with no path allows everything
                        continue;
                    }
                    let rule = Rule {
                        allow: field == "allow",
                        prefix: value.to_string(),
                    };
                    for agent in &current_agents {
                        if agent == "*" {
                            star_rules.push(rule.clone());
                        } else if ua_token.contains(agent.as_str())
                            || agent.contains(ua_token.as_str())
                        {
                            ua_rules.push(rule.clone());
                        }
                    }
                }
                _ => {
                    in_group_body = true;
                }
            }
        }

        let rules = if ua_rules.is_empty() { star_rules } else { ua_rules };
        Self { rules }
    }

    /// Longest-matching rule wins; no match means allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<&Rule> = None;
        for rule in &self.rules {
            if path.starts_with(&rule.prefix) {
                match best {
                    Some(current) if current.prefix.len() >= rule.prefix.len() => {}
                    _ => best = Some(rule),
                }
            }
        }
        best.map(|rule| rule.allow).unwrap_or(true)
    }
}

struct CacheEntry {
    rules: RobotsRules,
    fetched_at: Instant,
}

/// Per-host robots.txt cache.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: String) -> Self {
        Self {
            client,
            user_agent,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `url` may be fetched under the host's robots rules.
    pub async fn is_allowed(&self, url: &url::Url) -> bool {
        let Some(host) = url.host_str() else {
            return true;
        };
        let path = url.path().to_string();

        if let Some(rules) = self.cached_rules(host) {
            return rules.is_allowed(&path);
        }

        let rules = self.fetch_rules(url.scheme(), host).await;
        let allowed = rules.is_allowed(&path);
        self.entries.lock().insert(
            host.to_string(),
            CacheEntry {
                rules,
                fetched_at: Instant::now(),
            },
        );
        allowed
    }

    fn cached_rules(&self, host: &str) -> Option<RobotsRules> {
        let entries = self.entries.lock();
        entries
            .get(host)
            .filter(|entry| entry.fetched_at.elapsed() < CACHE_TTL)
            .map(|entry| entry.rules.clone())
    }

    async fn fetch_rules(&self, scheme: &str, host: &str) -> RobotsRules {
        let robots_url = format!("{scheme}://{host}/robots.txt");
        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => RobotsRules::parse(&body, &self.user_agent),
                Err(_) => RobotsRules::default(),
            },
            Ok(_) | Err(_) => {
                tracing::debug!(host, "No usable robots.txt, allowing all");
                RobotsRules::default()
            }
        }
    }
}
