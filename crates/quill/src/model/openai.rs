//! OpenAI-compatible chat completion provider.
//!
//! Speaks the `/v1/chat/completions` wire format with `stream: true`,
//! decoding `data:` lines out of the response byte stream. Tool-call
//! argument fragments are accumulated by index and emitted once the stream
//! ends.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::warn;
use serde::Deserialize;
use serde_json::json;

use super::{
    ChatStreamRequest, ModelEvent, ModelProvider, ModelStream, ToolCallRequest,
};

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    /// Base URL, e.g. `https://api.openai.com` or a local server.
    pub base_url: String,
    /// Bearer token, if the endpoint requires one.
    pub api_key: Option<String>,
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
        }
    }
}

/// Provider backed by an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint_url(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_payload(&self, request: &ChatStreamRequest, stream: bool) -> serde_json::Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        messages.extend(request.messages.iter().map(|m| {
            json!({
                "role": m.role,
                "content": m.content,
            })
        }));

        let mut payload = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });

        if !request.tools.is_empty() {
            payload["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }

        payload
    }

    async fn send(&self, payload: &serde_json::Value) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(self.endpoint_url())
            .header("Content-Type", "application/json")
            .json(payload);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.context("sending model request")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("model endpoint returned {}: {}", status, body);
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn stream_chat(&self, request: ChatStreamRequest) -> Result<ModelStream> {
        let payload = self.build_payload(&request, true);
        let response = self.send(&payload).await?;

        let state = StreamState {
            bytes: response.bytes_stream().boxed(),
            parser: SseChunkParser::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), state));
                }
                if state.done {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.parser.push(&chunk));
                        if state.parser.is_finished() {
                            state.pending.extend(state.parser.flush());
                            state.done = true;
                        }
                    }
                    Some(Err(err)) => {
                        state.done = true;
                        let err = anyhow::Error::new(err).context("reading model stream");
                        return Some((Err(err), state));
                    }
                    None => {
                        // Upstream closed without [DONE]; flush what we have.
                        state.pending.extend(state.parser.flush());
                        state.done = true;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn complete(&self, model: &str, system_prompt: &str, prompt: &str) -> Result<String> {
        let request = ChatStreamRequest {
            model: model.to_string(),
            system_prompt: system_prompt.to_string(),
            messages: vec![super::ModelMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            tools: Vec::new(),
        };
        let payload = self.build_payload(&request, false);
        let response = self.send(&payload).await?;

        let body: CompletionResponse = response
            .json()
            .await
            .context("decoding model response")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

struct StreamState {
    bytes: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    parser: SseChunkParser,
    pending: VecDeque<ModelEvent>,
    done: bool,
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// ============================================================================
// SSE decoding
// ============================================================================

#[derive(Debug, Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental decoder for `data:` lines of a chat completion stream.
struct SseChunkParser {
    buffer: String,
    tool_calls: Vec<PendingToolCall>,
    finished: bool,
    flushed: bool,
}

impl SseChunkParser {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            tool_calls: Vec::new(),
            finished: false,
            flushed: false,
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw response bytes, returning the text deltas decoded from any
    /// complete lines.
    fn push(&mut self, bytes: &[u8]) -> Vec<ModelEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim().to_string();
            self.buffer.drain(..=line_end);

            if line.is_empty() {
                continue;
            }
            if line == "data: [DONE]" {
                self.finished = true;
                break;
            }
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            match serde_json::from_str::<StreamChunk>(data) {
                Ok(chunk) => events.extend(self.apply_chunk(chunk)),
                Err(err) => {
                    warn!("skipping undecodable stream chunk: {} ({})", data, err);
                }
            }
        }
        events
    }

    fn apply_chunk(&mut self, chunk: StreamChunk) -> Vec<ModelEvent> {
        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(ModelEvent::TextDelta(content));
                }
            }
            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                if self.tool_calls.len() <= fragment.index {
                    self.tool_calls
                        .resize(fragment.index + 1, PendingToolCall::default());
                }
                let pending = &mut self.tool_calls[fragment.index];
                if let Some(id) = fragment.id {
                    pending.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        pending.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        pending.arguments.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.finished = true;
            }
        }
        events
    }

    /// Emit the accumulated tool calls and the terminal `Finish` event.
    fn flush(&mut self) -> Vec<ModelEvent> {
        if self.flushed {
            return Vec::new();
        }
        self.flushed = true;

        let mut events: Vec<ModelEvent> = self
            .tool_calls
            .drain(..)
            .filter(|c| !c.name.is_empty())
            .map(|c| {
                ModelEvent::ToolCall(ToolCallRequest {
                    id: c.id,
                    name: c.name,
                    arguments: c.arguments,
                })
            })
            .collect();
        events.push(ModelEvent::Finish);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_decodes_text_deltas_in_order() {
        let mut parser = SseChunkParser::new();
        let events = parser.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
              data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n\
              data: [DONE]\n\n",
        );

        assert_eq!(
            events,
            vec![
                ModelEvent::TextDelta("Hi".to_string()),
                ModelEvent::TextDelta(" there".to_string()),
            ]
        );
        assert!(parser.is_finished());
        assert_eq!(parser.flush(), vec![ModelEvent::Finish]);
    }

    #[test]
    fn test_parser_handles_lines_split_across_chunks() {
        let mut parser = SseChunkParser::new();
        let first = parser.push(b"data: {\"choices\":[{\"delta\":{\"con");
        assert!(first.is_empty());

        let second = parser.push(b"tent\":\"Hello\"}}]}\n");
        assert_eq!(second, vec![ModelEvent::TextDelta("Hello".to_string())]);
    }

    #[test]
    fn test_parser_accumulates_tool_call_fragments() {
        let mut parser = SseChunkParser::new();
        parser.push(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"{\\\"lat\"}}]}}]}\n",
        );
        parser.push(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"itude\\\":1}\"}}]}}]}\n",
        );
        parser.push(b"data: [DONE]\n");

        let events = parser.flush();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ModelEvent::ToolCall(ToolCallRequest {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: "{\"latitude\":1}".to_string(),
            })
        );
        assert_eq!(events[1], ModelEvent::Finish);
    }

    #[test]
    fn test_parser_skips_garbage_lines() {
        let mut parser = SseChunkParser::new();
        let events = parser.push(
            b": comment\n\
              data: not json\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        );
        assert_eq!(events, vec![ModelEvent::TextDelta("ok".to_string())]);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut parser = SseChunkParser::new();
        parser.push(b"data: [DONE]\n");
        assert_eq!(parser.flush(), vec![ModelEvent::Finish]);
        assert!(parser.flush().is_empty());
    }
}
