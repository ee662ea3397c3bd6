//! Model provider boundary.
//!
//! The chat orchestrator consumes a language model as an opaque producer of
//! an ordered event stream plus a cheap non-streaming completion call for
//! chat titles. Everything behind this boundary (transport, retries, rate
//! limits) belongs to the provider.

mod mock;
mod openai;

pub use mock::{MockProvider, MockTurn};
pub use openai::{OpenAiProvider, OpenAiProviderConfig};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// One ordered item of a model response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// Incremental text output.
    TextDelta(String),
    /// The model requested a tool invocation.
    ToolCall(ToolCallRequest),
    /// The stream completed normally.
    Finish,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON argument payload, parsed at execution time.
    pub arguments: String,
}

/// A message in the model's expected shape.
#[derive(Debug, Clone)]
pub struct ModelMessage {
    pub role: String,
    pub content: String,
}

/// A tool made available to the model for one request.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A single streaming chat request.
#[derive(Debug, Clone)]
pub struct ChatStreamRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Ordered, finite, non-restartable stream of model events. Errors surface
/// as stream items; the stream must not be polled after one.
pub type ModelStream = BoxStream<'static, Result<ModelEvent>>;

/// An opaque language-model collaborator.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Open a streaming chat completion.
    async fn stream_chat(&self, request: ChatStreamRequest) -> Result<ModelStream>;

    /// One-shot non-streaming completion (title generation and similar
    /// cheap calls).
    async fn complete(&self, model: &str, system_prompt: &str, prompt: &str) -> Result<String>;
}
