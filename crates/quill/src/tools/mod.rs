//! Side-effect tools the model can invoke during a turn.
//!
//! Each tool is an opaque callable from the model's perspective: a name, a
//! description, a JSON-schema parameter block, and an execute that returns
//! plain text. Tool failures are the caller's problem to isolate; tools just
//! return errors.

mod documents;
mod search;
mod weather;

pub use documents::{CreateDocumentTool, RequestSuggestionsTool, UpdateDocumentTool};
pub use search::WebSearchTool;
pub use weather::WeatherTool;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::model::{ModelProvider, ToolCallRequest, ToolDefinition};
use crate::storage::ChatRepository;

/// Per-turn context handed to executing tools.
#[derive(Clone)]
pub struct ToolContext {
    pub store: Arc<ChatRepository>,
    pub model: Arc<dyn ModelProvider>,
    /// Model name for tools that make their own model calls.
    pub model_name: String,
    pub user_id: String,
    pub chat_id: String,
}

/// A tool callable by the model.
#[async_trait]
pub trait ChatTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> serde_json::Value;

    /// Run the tool. The returned string is surfaced to the user as part of
    /// the turn's tool-results message.
    async fn execute(&self, ctx: &ToolContext, arguments: serde_json::Value) -> Result<String>;
}

/// The set of tools offered to the model for a turn.
pub struct ToolSet {
    tools: Vec<Arc<dyn ChatTool>>,
}

impl ToolSet {
    /// The built-in capability set.
    pub fn builtin(search_endpoint: Option<String>, weather_base_url: Option<String>) -> Self {
        let tools: Vec<Arc<dyn ChatTool>> = vec![
            Arc::new(CreateDocumentTool),
            Arc::new(UpdateDocumentTool),
            Arc::new(RequestSuggestionsTool),
            Arc::new(WeatherTool::new(weather_base_url)),
            Arc::new(WebSearchTool::new(search_endpoint)),
        ];
        Self { tools }
    }

    /// An empty set (turns that should run without tools).
    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    /// Definitions in the model's expected shape.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Execute one requested call.
    pub async fn execute(&self, ctx: &ToolContext, call: &ToolCallRequest) -> Result<String> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == call.name)
            .with_context(|| format!("unknown tool: {}", call.name))?;

        let arguments: serde_json::Value = if call.arguments.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.arguments)
                .with_context(|| format!("decoding arguments for tool {}", call.name))?
        };

        tool.execute(ctx, arguments).await
    }
}
