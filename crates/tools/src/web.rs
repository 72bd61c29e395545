//! Network tools: web_search and web_fetch.

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::message::{ToolCall, ToolCallResult};
use ferrocode_core::tool::{Tool, ToolExecutor};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SEARCH_RESULT_CAP: usize = 10;
const FETCH_DEFAULT_TIMEOUT_SECS: u64 = 30;
const FETCH_MAX_TIMEOUT_SECS: u64 = 120;
const FETCH_CONTENT_CAP_BYTES: usize = 50_000;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn parse_args<T: for<'de> Deserialize<'de>>(call: &ToolCall) -> Result<T, ToolError> {
    serde_json::from_str(&call.function.arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("failed to parse arguments: {e}")))
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub summary: String,
}

/// Extract search results from a DuckDuckGo HTML results page.
fn parse_search_results(html: &str) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let result_selector = Selector::parse(".result").expect("static selector");
    let link_selector = Selector::parse("a.result__a").expect("static selector");
    let snippet_selector = Selector::parse(".result__snippet").expect("static selector");

    let mut results = Vec::new();

    for block in document.select(&result_selector) {
        let Some(link) = block.select(&link_selector).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };

        let Some(url) = resolve_result_url(href) else {
            continue;
        };

        let title = link.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }

        let summary = block
            .select(&snippet_selector)
            .next()
            .map(|s| s.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        results.push(SearchResult { title, url, summary });
        if results.len() >= SEARCH_RESULT_CAP {
            break;
        }
    }

    results
}

/// DuckDuckGo wraps result links in a redirect carrying the target in the
/// `uddg` query parameter; unwrap it and drop ads/internal links.
fn resolve_result_url(href: &str) -> Option<String> {
    if href.contains("/y.js") {
        return None; // ad link
    }

    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };

    let parsed = reqwest::Url::parse(&absolute).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }

    if parsed.host_str().is_some_and(|h| h.contains("duckduckgo.com")) {
        // Redirect link — extract the real target
        let target = parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.to_string())?;
        if target.starts_with("http") {
            return Some(target);
        }
        return None;
    }

    Some(parsed.to_string())
}

fn filter_by_domain(
    results: Vec<SearchResult>,
    allowed: &[String],
    blocked: &[String],
) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|result| {
            let Ok(url) = reqwest::Url::parse(&result.url) else {
                return false;
            };
            let Some(domain) = url.host_str() else {
                return false;
            };

            if blocked.iter().any(|b| domain.contains(b.as_str())) {
                return false;
            }
            if !allowed.is_empty() && !allowed.iter().any(|a| domain.contains(a.as_str())) {
                return false;
            }
            true
        })
        .collect()
}

// --- web_search ---

pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct WebSearchParams {
    query: String,
    #[serde(default)]
    allowed_domains: Vec<String>,
    #[serde(default)]
    blocked_domains: Vec<String>,
}

#[async_trait]
impl ToolExecutor for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: WebSearchParams = parse_args(&call)?;

        if params.query.len() < 2 {
            return Ok(ToolCallResult::failure(
                "query must be at least 2 characters long",
            ));
        }

        debug!(query = %params.query, "Running web search");

        let response = match self
            .client
            .get("https://duckduckgo.com/html/")
            .query(&[("q", &params.query)])
            .header("User-Agent", BROWSER_USER_AGENT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Ok(ToolCallResult::failure(format!("search failed: {e}"))),
        };

        if !response.status().is_success() {
            return Ok(ToolCallResult::failure(format!(
                "search request failed with status: {}",
                response.status().as_u16()
            )));
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return Ok(ToolCallResult::failure(format!(
                    "failed to read response body: {e}"
                )))
            }
        };

        let mut results = parse_search_results(&body);
        if !params.allowed_domains.is_empty() || !params.blocked_domains.is_empty() {
            results = filter_by_domain(results, &params.allowed_domains, &params.blocked_domains);
        }

        let mut output = format!("Search results for: {}\n", params.query);
        if !params.allowed_domains.is_empty() {
            output.push_str(&format!(
                "Allowed domains: {}\n",
                params.allowed_domains.join(", ")
            ));
        }
        if !params.blocked_domains.is_empty() {
            output.push_str(&format!(
                "Blocked domains: {}\n",
                params.blocked_domains.join(", ")
            ));
        }
        output.push_str(&format!("\nFound {} results:\n\n", results.len()));

        if results.is_empty() {
            output.push_str("No search results found.");
        } else {
            for (i, result) in results.iter().enumerate() {
                output.push_str(&format!("{}. {}\n", i + 1, result.title));
                output.push_str(&format!("   URL: {}\n", result.url));
                if !result.summary.is_empty() {
                    output.push_str(&format!("   Summary: {}\n", result.summary));
                }
                output.push('\n');
            }
        }

        Ok(ToolCallResult::ok(output))
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "web_search",
            "Search the web for real-time information and return formatted search results.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "minLength": 2,
                        "description": "The search query to use"
                    },
                    "allowed_domains": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Only include results from these domains"
                    },
                    "blocked_domains": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Never include results from these domains"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}

// --- web_fetch ---

pub struct WebFetchTool;

impl WebFetchTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct WebFetchParams {
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    /// Timeout in seconds
    #[serde(default)]
    timeout: Option<u64>,
}

fn truncate_content(content: &str) -> String {
    if content.len() <= FETCH_CONTENT_CAP_BYTES {
        return content.to_string();
    }
    let mut cut = FETCH_CONTENT_CAP_BYTES;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... (content truncated)", &content[..cut])
}

/// Strip control characters that would corrupt the report.
fn sanitize(content: &str) -> String {
    content
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

#[async_trait]
impl ToolExecutor for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: WebFetchParams = parse_args(&call)?;

        let url = match reqwest::Url::parse(&params.url) {
            Ok(u) => u,
            Err(e) => return Ok(ToolCallResult::failure(format!("invalid URL: {e}"))),
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return Ok(ToolCallResult::failure(
                "only HTTP and HTTPS URLs are supported",
            ));
        }

        let timeout_secs = params
            .timeout
            .unwrap_or(FETCH_DEFAULT_TIMEOUT_SECS)
            .min(FETCH_MAX_TIMEOUT_SECS);

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "web_fetch".into(),
                    reason: e.to_string(),
                })
            }
        };

        let mut request = client
            .get(url.clone())
            .header("User-Agent", "ferrocode/0.1 (web fetch tool)");
        for (key, value) in &params.headers {
            request = request.header(key, value);
        }

        let start = std::time::Instant::now();
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(ToolCallResult::failure(format!("failed to fetch URL: {e}"))),
        };
        let duration = start.elapsed();

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return Ok(ToolCallResult::failure(format!(
                    "failed to read response body: {e}"
                )))
            }
        };

        let mut output = String::new();
        output.push_str(&format!("URL: {}\n", params.url));
        output.push_str(&format!("Status: {status}\n"));
        output.push_str(&format!("Content-Type: {content_type}\n"));
        output.push_str(&format!("Content-Length: {} bytes\n", body.len()));
        output.push_str(&format!("Fetch Time: {}ms\n", duration.as_millis()));
        output.push_str(&format!("\nContent:\n{}", sanitize(&truncate_content(&body))));

        let success = status < 300;
        Ok(ToolCallResult {
            content: output,
            success,
            error: String::new(),
            timestamp: chrono::Utc::now(),
        })
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "web_fetch",
            "Fetch content from a web URL and return the response. Content is truncated to \
             50000 bytes.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to fetch content from (must be HTTP or HTTPS)"
                    },
                    "headers": {
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "Optional HTTP headers to include in the request"
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Timeout in seconds (default: 30, max: 120)"
                    }
                },
                "required": ["url"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}
