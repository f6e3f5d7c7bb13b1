//! Web search tool — fetches a search-results page and extracts its text.
//!
//! The model calls this with a query; the tool fetches the page, strips
//! markup down to readable text, and returns a bounded excerpt. Fetch
//! failures come back as a failed result the model can explain around —
//! they never abort the turn.

use async_trait::async_trait;
use chatbridge_core::error::ToolError;
use chatbridge_core::tool::{Tool, ToolResult};
use tracing::{debug, warn};

/// Upper bound on the excerpt handed back to the model.
const MAX_EXCERPT_CHARS: usize = 4000;

pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self::with_base_url("https://html.duckduckgo.com/html/")
    }

    /// Use a different results endpoint (tests point this at a local stub).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (compatible; chatbridge/0.1)")
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information — weather, news, facts you are unsure about. Returns a text excerpt of the results page."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        debug!(query, "Fetching search results");

        let response = match self
            .client
            .get(&self.base_url)
            .query(&[("q", query)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(query, error = %e, "Search fetch failed");
                return Ok(ToolResult::failed(format!("Search failed: {e}")));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!(query, %status, "Search endpoint returned error");
            return Ok(ToolResult::failed(format!(
                "Search failed: results page returned {status}"
            )));
        }

        let html = match response.text().await {
            Ok(t) => t,
            Err(e) => return Ok(ToolResult::failed(format!("Search failed: {e}"))),
        };

        let text = extract_text(&html);
        if text.is_empty() {
            return Ok(ToolResult::failed("Search returned no readable text"));
        }

        Ok(ToolResult::ok(truncate_chars(&text, MAX_EXCERPT_CHARS)))
    }
}

/// Reduce an HTML document to whitespace-collapsed readable text.
pub fn extract_text(html: &str) -> String {
    let without_blocks = strip_block(&strip_block(html, "script"), "style");

    let mut text = String::with_capacity(without_blocks.len() / 4);
    let mut in_tag = false;
    for c in without_blocks.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove `<tag ...>...</tag>` blocks, case-insensitively.
fn strip_block(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    // ASCII lowering keeps byte offsets aligned with the original
    let lower = html.to_ascii_lowercase();

    let mut result = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open) {
        let start = pos + start;
        result.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => return result, // unterminated block — drop the tail
        }
    }
    result.push_str(&html[pos..]);
    result
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
