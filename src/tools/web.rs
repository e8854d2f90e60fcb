//! Web search tool used by the research agent.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Tool;

const DEFAULT_RESULTS: usize = 5;
const MAX_RESULTS: usize = 10;
const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// Search the web through DuckDuckGo's HTML endpoint (no API key needed).
pub struct WebSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl WebSearch {
    pub fn new() -> Self {
        Self::with_endpoint(SEARCH_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; Conductor/0.1)")
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl Default for WebSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SearchHit {
    title: String,
    snippet: String,
    url: String,
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns numbered results with titles, snippets and URLs that can be cited as [n]."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 5, max: 10)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let query = args["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;
        let limit = args["num_results"]
            .as_u64()
            .map(|n| (n as usize).clamp(1, MAX_RESULTS))
            .unwrap_or(DEFAULT_RESULTS);

        let url = format!("{}?q={}", self.endpoint, urlencoding::encode(query));
        tracing::debug!(query = %query, "Running web search");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Search failed with HTTP {}", response.status()));
        }
        let html = response.text().await?;

        let hits = extract_results(&html, limit);
        if hits.is_empty() {
            return Ok(format!("No results found for: {}", query));
        }
        Ok(format_hits(&hits))
    }
}

fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}\n{}\nURL: {}", i + 1, hit.title, hit.snippet, hit.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Pull result blocks out of the DuckDuckGo HTML page.
fn extract_results(html: &str, limit: usize) -> Vec<SearchHit> {
    html.split("class=\"result__body\"")
        .skip(1)
        .filter_map(|chunk| {
            let title = inner_text(chunk, "result__a")?;
            if title.is_empty() {
                return None;
            }
            Some(SearchHit {
                title,
                snippet: inner_text(chunk, "result__snippet").unwrap_or_default(),
                url: inner_text(chunk, "result__url").unwrap_or_default(),
            })
        })
        .take(limit)
        .collect()
}

/// Text between the end of the opening tag carrying `class` and the next `<`.
fn inner_text(chunk: &str, class: &str) -> Option<String> {
    let marker = format!("class=\"{}\"", class);
    let after = chunk.split(marker.as_str()).nth(1)?;
    let text = after.split_once('>')?.1.split('<').next()?;
    Some(html_decode(text.trim()))
}

fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}
