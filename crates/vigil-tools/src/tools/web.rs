//! web_fetch / web_search tools — rate-limited network access
//!
//! Fetch pulls a URL body (30 s timeout); search posts to a Tavily-style
//! endpoint. Both consume the fixed-window per-minute budget the policy
//! records, and both are untrusted content sources: their output traverses
//! the security pipeline before re-entering the model context.

use crate::registry::{Tool, ToolResult};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use vigil_core::clamp_utf8;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_CAP: usize = 100_000;
const SEARCH_URL: &str = "https://api.tavily.com/search";

/// Fixed-window request counter: `limit` requests per wall-clock minute.
pub struct RateLimiter {
    limit: u32,
    window: Mutex<(u64, u32)>,
}

impl RateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Mutex::new((0, 0)),
        }
    }

    /// Try to consume one request. Returns false when the minute is spent.
    pub fn try_acquire(&self) -> bool {
        let minute = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() / 60)
            .unwrap_or(0);
        let mut w = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if w.0 != minute {
            *w = (minute, 0);
        }
        if w.1 >= self.limit {
            return false;
        }
        w.1 += 1;
        true
    }
}

pub struct WebFetchTool {
    client: reqwest::Client,
    limiter: Option<RateLimiter>,
}

impl WebFetchTool {
    pub fn new(rate_limit: Option<u32>) -> Self {
        Self {
            client: reqwest::Client::new(),
            limiter: rate_limit.map(RateLimiter::per_minute),
        }
    }
}

#[async_trait::async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch the contents of a URL. Returns the response body as text."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn is_untrusted_source(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let url = match args["url"].as_str() {
            Some(u) => u,
            None => return ToolResult::error("Missing required parameter: url"),
        };
        if let Some(limiter) = &self.limiter {
            if !limiter.try_acquire() {
                return ToolResult::error("web_fetch rate limit exceeded, retry next minute");
            }
        }

        debug!("web_fetch: {}", url);
        let response = match self.client.get(url).timeout(FETCH_TIMEOUT).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Fetch failed: {}", e)),
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to read body: {}", e)),
        };

        if !status.is_success() {
            return ToolResult::error(format!("HTTP {}: {}", status, clamp_utf8(&body, 500)));
        }
        if body.len() > BODY_CAP {
            ToolResult::text(format!(
                "{}\n... [truncated, {} total chars]",
                clamp_utf8(&body, BODY_CAP),
                body.len()
            ))
        } else {
            ToolResult::text(body)
        }
    }
}

pub struct WebSearchTool {
    client: reqwest::Client,
    limiter: Option<RateLimiter>,
    api_key: Option<String>,
}

impl WebSearchTool {
    pub fn new(rate_limit: Option<u32>) -> Self {
        let api_key = std::env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            debug!("TAVILY_API_KEY not set, web_search will report unavailable");
        }
        Self {
            client: reqwest::Client::new(),
            limiter: rate_limit.map(RateLimiter::per_minute),
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns result titles, URLs, and content snippets."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn is_untrusted_source(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let query = match args["query"].as_str() {
            Some(q) => q,
            None => return ToolResult::error("Missing required parameter: query"),
        };
        let api_key = match &self.api_key {
            Some(k) => k,
            None => return ToolResult::error("web_search unavailable: TAVILY_API_KEY not set"),
        };
        if let Some(limiter) = &self.limiter {
            if !limiter.try_acquire() {
                return ToolResult::error("web_search rate limit exceeded, retry next minute");
            }
        }

        let max_results = args["max_results"].as_u64().unwrap_or(5);
        debug!("web_search: {}", query);

        let body = json!({
            "api_key": api_key,
            "query": query,
            "search_depth": "basic",
            "max_results": max_results,
        });
        let response = match self
            .client
            .post(SEARCH_URL)
            .json(&body)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Search failed: {}", e)),
        };
        let parsed: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return ToolResult::error(format!("Bad search response: {}", e)),
        };

        let mut lines = Vec::new();
        if let Some(results) = parsed["results"].as_array() {
            for r in results {
                lines.push(format!(
                    "{}\n  {}\n  {}",
                    r["title"].as_str().unwrap_or("(untitled)"),
                    r["url"].as_str().unwrap_or(""),
                    r["content"].as_str().unwrap_or("")
                ));
            }
        }
        if lines.is_empty() {
            ToolResult::text("No results")
        } else {
            ToolResult::text(lines.join("\n\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_caps_within_window() {
        let limiter = RateLimiter::per_minute(3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
