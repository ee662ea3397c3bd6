//! Web search tool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChatTool, ToolContext};

/// Search against a configured HTTP endpoint.
///
/// The endpoint is expected to answer `GET {endpoint}?q={query}` with a JSON
/// array of `{title, url, snippet}` objects. Without a configured endpoint
/// the tool reports itself unavailable; the orchestrator treats that like
/// any other tool failure.
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    #[serde(default)]
    snippet: Option<String>,
}

impl WebSearchTool {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl ChatTool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web and return the top results."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_results": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, arguments: serde_json::Value) -> Result<String> {
        let args: SearchArgs =
            serde_json::from_value(arguments).context("web_search arguments")?;
        let endpoint = self
            .endpoint
            .as_deref()
            .context("web search endpoint not configured")?;

        let response = self
            .client
            .get(endpoint)
            .query(&[("q", args.query.as_str())])
            .send()
            .await
            .context("requesting search results")?;
        if !response.status().is_success() {
            anyhow::bail!("search endpoint returned {}", response.status());
        }

        let results: Vec<SearchResult> =
            response.json().await.context("decoding search results")?;
        let limit = args.max_results.unwrap_or(5);

        let lines: Vec<String> = results
            .into_iter()
            .take(limit)
            .map(|r| match r.snippet {
                Some(snippet) => format!("{} ({}) — {}", r.title, r.url, snippet),
                None => format!("{} ({})", r.title, r.url),
            })
            .collect();

        if lines.is_empty() {
            Ok(format!("No results for \"{}\".", args.query))
        } else {
            Ok(lines.join("\n"))
        }
    }
}
