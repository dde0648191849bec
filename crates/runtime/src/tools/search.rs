//! Web search tool backed by DuckDuckGo's HTML endpoint.

use crate::tools::{Tool, ToolError};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_RESULTS: usize = 2;

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Search tool settings.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Most result summaries returned per query.
    pub max_results: usize,
    pub endpoint: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            endpoint: DUCKDUCKGO_HTML_URL.to_string(),
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

impl std::fmt::Display for SearchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "snippet: {}, title: {}, link: {}",
            self.snippet, self.title, self.link
        )
    }
}

/// Forwards a query to the search provider and summarizes the top results.
pub struct Search {
    client: reqwest::Client,
    config: SearchConfig,
}

impl Search {
    pub fn new(config: SearchConfig) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ToolError::Execution(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Tool for Search {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web and return short summaries of the top results."
    }

    async fn call(&self, argument: &str) -> Result<String, ToolError> {
        let query = argument.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidInput("empty search query".into()));
        }

        let url = format!("{}?q={}", self.config.endpoint, urlencoding::encode(query));
        debug!(query, "web search");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Execution(format!("search provider returned {status}")));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ToolError::Execution(format!("search response: {e}")))?;

        let results = parse_results(&html, self.config.max_results)?;
        if results.is_empty() {
            return Ok("No results found.".to_string());
        }

        Ok(results
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "))
    }
}

fn selector(css: &str) -> Result<Selector, ToolError> {
    Selector::parse(css).map_err(|e| ToolError::Execution(format!("selector {css}: {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract up to `max` organic results from a DuckDuckGo HTML page.
pub(crate) fn parse_results(html: &str, max: usize) -> Result<Vec<SearchResult>, ToolError> {
    let document = Html::parse_document(html);
    let result_selector = selector(".result")?;
    let title_selector = selector(".result__a")?;
    let snippet_selector = selector(".result__snippet")?;

    let mut results = Vec::new();
    for element in document.select(&result_selector) {
        if results.len() >= max {
            break;
        }
        if element.value().classes().any(|class| class == "result--ad") {
            continue;
        }
        let Some(anchor) = element.select(&title_selector).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };

        let snippet = element
            .select(&snippet_selector)
            .next()
            .map(text_of)
            .unwrap_or_default();

        results.push(SearchResult {
            title: text_of(anchor),
            link: resolve_link(href),
            snippet,
        });
    }

    Ok(results)
}

/// Unwrap DuckDuckGo redirect links (`/l/?uddg=<encoded target>`).
fn resolve_link(href: &str) -> String {
    let Some(pos) = href.find("uddg=") else {
        return href.to_string();
    };
    let encoded = &href[pos + "uddg=".len()..];
    let encoded = encoded.split('&').next().unwrap_or(encoded);
    urlencoding::decode(encoded)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| href.to_string())
}
