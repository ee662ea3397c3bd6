//! Chat turn orchestration.
//!
//! A turn walks a fixed state machine: validate and persist the user
//! message, resolve (or create) the chat record, stream the model reply to
//! every subscriber, run requested tools, then persist the assistant output.
//! The durable record of what the user asked is written before the model is
//! ever invoked, and the assistant reply is written exactly once, after the
//! stream ends — individual deltas are never persisted.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use crate::model::{
    ChatStreamRequest, ModelEvent, ModelMessage, ModelProvider, ToolCallRequest,
};
use crate::storage::{
    AttachmentRef, ChatMessage, ChatRepository, ChatVisibility, CreateChat,
    CreateChatMessage, MessagePart, MessageRole,
};
use crate::tools::{ToolContext, ToolSet};

use super::frames::StreamFrame;
use super::streams::{ChatStreams, StreamSubscription};

const CHAT_SYSTEM_PROMPT: &str = "You are a friendly assistant. Keep your \
responses concise and helpful. Use the available tools when they genuinely \
help with the request.";

const TITLE_SYSTEM_PROMPT: &str = "Generate a short title (at most 80 \
characters) summarizing the user's message. Do not use quotes or colons. \
Respond with the title only.";

/// Longest allowed chat title.
const TITLE_MAX_CHARS: usize = 80;

/// What subscribers see when the model stream fails mid-flight.
const STREAM_ERROR_MESSAGE: &str = "Something went wrong while generating a response.";

/// Errors that abort a turn before streaming starts.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
}

/// An inbound chat turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub selected_model: Option<String>,
}

/// One message as sent by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// A validated turn, ready to stream.
#[derive(Debug)]
pub struct PreparedTurn {
    pub chat_id: String,
    pub user_id: String,
    pub model_name: String,
    pub request: ChatStreamRequest,
}

/// Drives one chat turn end to end.
pub struct ChatTurnOrchestrator {
    store: Arc<ChatRepository>,
    streams: Arc<ChatStreams>,
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolSet>,
    default_model: String,
}

impl ChatTurnOrchestrator {
    pub fn new(
        store: Arc<ChatRepository>,
        streams: Arc<ChatStreams>,
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolSet>,
        default_model: String,
    ) -> Self {
        Self {
            store,
            streams,
            model,
            tools,
            default_model,
        }
    }

    /// Validate the request, persist the user message and resolve the chat.
    ///
    /// Runs before the response stream opens; its failures surface as plain
    /// HTTP errors. The user message is durable before any model call, and
    /// it is not rolled back if chat resolution fails afterwards.
    #[instrument(skip(self, user, request), fields(chat_id = tracing::field::Empty))]
    pub async fn begin_turn(
        &self,
        user: &crate::auth::AuthUser,
        request: &ChatTurnRequest,
    ) -> Result<PreparedTurn, TurnError> {
        let chat_id = request
            .chat_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TurnError::BadRequest("missing chat id".to_string()))?
            .to_string();
        tracing::Span::current().record("chat_id", chat_id.as_str());

        let user_message = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .ok_or_else(|| TurnError::BadRequest("no user message in request".to_string()))?;

        let model_name = request
            .selected_model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        // Received -> UserPersisted
        self.store
            .create_message(CreateChatMessage {
                chat_id: chat_id.clone(),
                role: MessageRole::User,
                parts: vec![MessagePart::Text {
                    text: user_message.content.clone(),
                }],
                attachments: user_message.attachments.clone(),
            })
            .await
            .map_err(TurnError::Persistence)?;

        // UserPersisted -> ChatResolved
        match self.store.get_chat(&chat_id).await.map_err(TurnError::Persistence)? {
            Some(chat) => {
                if chat.visibility == ChatVisibility::Private && chat.user_id != user.id {
                    return Err(TurnError::Unauthorized(format!(
                        "chat {} belongs to another user",
                        chat_id
                    )));
                }
            }
            None => {
                let title = self
                    .generate_title(&model_name, &user_message.content)
                    .await;
                self.store
                    .create_chat(CreateChat {
                        id: chat_id.clone(),
                        user_id: user.id.clone(),
                        title,
                        visibility: ChatVisibility::Private,
                    })
                    .await
                    .map_err(TurnError::Persistence)?;
                debug!("created chat {} for user {}", chat_id, user.id);
            }
        }

        // ChatResolved -> ready to stream
        let history = self
            .store
            .get_messages_by_chat(&chat_id)
            .await
            .map_err(TurnError::Persistence)?;

        Ok(PreparedTurn {
            chat_id,
            user_id: user.id.clone(),
            model_name: model_name.clone(),
            request: ChatStreamRequest {
                model: model_name,
                system_prompt: CHAT_SYSTEM_PROMPT.to_string(),
                messages: to_model_messages(&history),
                tools: self.tools.definitions(),
            },
        })
    }

    /// Stream the model reply, execute tools, persist the results.
    ///
    /// Owns the turn's subscription: dropping it at the end closes the
    /// originating response stream. Runs to completion even when every
    /// subscriber is gone — delivery is decoupled from persistence.
    #[instrument(skip(self, turn, subscription), fields(chat_id = %turn.chat_id))]
    pub async fn stream_turn(&self, turn: PreparedTurn, subscription: StreamSubscription) {
        let chat_id = turn.chat_id.clone();
        let mut accumulated = String::new();
        let mut requested: Vec<ToolCallRequest> = Vec::new();

        // Streaming
        match self.model.stream_chat(turn.request).await {
            Ok(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(ModelEvent::TextDelta(delta)) => {
                            accumulated.push_str(&delta);
                            self.streams
                                .broadcast(&chat_id, StreamFrame::TextDelta { content: delta })
                                .await;
                        }
                        Ok(ModelEvent::ToolCall(call)) => requested.push(call),
                        Ok(ModelEvent::Finish) => break,
                        Err(err) => {
                            warn!("model stream for chat {} failed: {:#}", chat_id, err);
                            self.streams
                                .broadcast(
                                    &chat_id,
                                    StreamFrame::Error {
                                        message: STREAM_ERROR_MESSAGE.to_string(),
                                    },
                                )
                                .await;
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!("model stream for chat {} did not open: {:#}", chat_id, err);
                self.streams
                    .broadcast(
                        &chat_id,
                        StreamFrame::Error {
                            message: STREAM_ERROR_MESSAGE.to_string(),
                        },
                    )
                    .await;
            }
        }

        // AssistantPersisted: the only write of the primary reply, partial
        // text included. A failed write here is degraded service, not a
        // turn failure - the client already saw the streamed text.
        if !accumulated.is_empty() || !requested.is_empty() {
            let mut parts = Vec::new();
            if !accumulated.is_empty() {
                parts.push(MessagePart::Text {
                    text: accumulated.clone(),
                });
            }
            parts.extend(requested.iter().map(|call| MessagePart::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            }));

            if let Err(err) = self
                .store
                .create_message(CreateChatMessage {
                    chat_id: chat_id.clone(),
                    role: MessageRole::Assistant,
                    parts,
                    attachments: Vec::new(),
                })
                .await
            {
                warn!("failed to persist assistant message for chat {}: {:#}", chat_id, err);
            }
        }

        // ToolPhase: per-tool error isolation; a failed tool contributes
        // nothing and never aborts the others.
        if !requested.is_empty() {
            let ctx = ToolContext {
                store: self.store.clone(),
                model: self.model.clone(),
                model_name: turn.model_name.clone(),
                user_id: turn.user_id.clone(),
                chat_id: chat_id.clone(),
            };

            let mut outputs = Vec::new();
            for call in &requested {
                match self.tools.execute(&ctx, call).await {
                    Ok(output) if !output.is_empty() => outputs.push(output),
                    Ok(_) => {}
                    Err(err) => {
                        warn!("tool {} failed for chat {}: {:#}", call.name, chat_id, err);
                    }
                }
            }

            if !outputs.is_empty() {
                if let Err(err) = self
                    .store
                    .create_message(CreateChatMessage::text(
                        chat_id.clone(),
                        MessageRole::Assistant,
                        outputs.join("\n"),
                    ))
                    .await
                {
                    warn!("failed to persist tool results for chat {}: {:#}", chat_id, err);
                }
            }
        }

        // Done: stop producing and release the turn's own channel.
        debug!("turn complete for chat {}", chat_id);
        drop(subscription);
    }

    async fn generate_title(&self, model_name: &str, user_text: &str) -> String {
        match self
            .model
            .complete(model_name, TITLE_SYSTEM_PROMPT, user_text)
            .await
        {
            Ok(title) => sanitize_title(&title),
            Err(err) => {
                warn!("title generation failed, falling back to message text: {:#}", err);
                sanitize_title(user_text)
            }
        }
    }
}

/// Convert stored history into the model's message shape.
///
/// Tool-call parts are carried by the assistant text; tool-result parts
/// become `tool` role messages; reasoning parts never go back to the model.
fn to_model_messages(history: &[ChatMessage]) -> Vec<ModelMessage> {
    let mut messages = Vec::new();
    for record in history {
        let Ok(parts) = record.parts() else {
            warn!("skipping message {} with undecodable parts", record.id);
            continue;
        };

        let mut text = String::new();
        for part in parts {
            match part {
                MessagePart::Text { text: t } => text.push_str(&t),
                MessagePart::ToolResult { output, .. } => {
                    messages.push(ModelMessage {
                        role: "tool".to_string(),
                        content: output,
                    });
                }
                MessagePart::ToolCall { .. } | MessagePart::Reasoning { .. } => {}
            }
        }

        if !text.is_empty() {
            messages.push(ModelMessage {
                role: record.role.to_string(),
                content: text,
            });
        }
    }
    messages
}

/// Clamp a generated title to the allowed shape: no quotes, no colons, at
/// most [`TITLE_MAX_CHARS`] characters.
pub fn sanitize_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | ':' | '\n' | '\r'))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return "New chat".to_string();
    }
    trimmed.chars().take(TITLE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthUser, Role};
    use crate::db::Database;
    use crate::model::{MockProvider, MockTurn};
    use crate::storage::ChatVisibility;

    fn user() -> AuthUser {
        AuthUser {
            id: "u1".to_string(),
            username: "dev".to_string(),
            role: Role::User,
        }
    }

    fn turn_request(chat_id: &str, text: &str) -> ChatTurnRequest {
        ChatTurnRequest {
            chat_id: Some(chat_id.to_string()),
            messages: vec![IncomingMessage {
                role: "user".to_string(),
                content: text.to_string(),
                attachments: Vec::new(),
            }],
            selected_model: None,
        }
    }

    async fn orchestrator(provider: MockProvider) -> (ChatTurnOrchestrator, Arc<ChatStreams>) {
        let db = Database::in_memory().await.unwrap();
        let streams = Arc::new(ChatStreams::new());
        let orchestrator = ChatTurnOrchestrator::new(
            Arc::new(ChatRepository::new(db.pool().clone())),
            streams.clone(),
            Arc::new(provider),
            Arc::new(ToolSet::builtin(None, None)),
            "mock".to_string(),
        );
        (orchestrator, streams)
    }

    #[tokio::test]
    async fn test_first_turn_creates_chat_and_streams_deltas() {
        let provider = MockProvider::scripted(vec![MockTurn::Events(vec![
            ModelEvent::TextDelta("Hi".to_string()),
            ModelEvent::TextDelta(" there".to_string()),
            ModelEvent::Finish,
        ])])
        .with_completion("Greeting");
        let (orchestrator, streams) = orchestrator(provider).await;

        let turn = orchestrator
            .begin_turn(&user(), &turn_request("c1", "hello"))
            .await
            .unwrap();

        let (watcher, mut rx) = streams.subscribe("c1");
        let (own, _own_rx) = streams.subscribe("c1");
        orchestrator.stream_turn(turn, own).await;

        // Both deltas arrived, in order.
        assert_eq!(
            rx.recv().await,
            Some(StreamFrame::TextDelta {
                content: "Hi".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(StreamFrame::TextDelta {
                content: " there".to_string()
            })
        );
        drop(watcher);

        // Chat created with the generated title.
        let chat = orchestrator.store.get_chat("c1").await.unwrap().unwrap();
        assert_eq!(chat.title, "Greeting");
        assert_eq!(chat.user_id, "u1");
        assert_eq!(chat.visibility, ChatVisibility::Private);

        // Exactly user + assistant persisted, assistant holds the full text.
        let messages = orchestrator.store.get_messages_by_chat("c1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].text_content(), "hello");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].text_content(), "Hi there");
    }

    #[tokio::test]
    async fn test_mid_stream_failure_persists_partial_text() {
        let provider = MockProvider::scripted(vec![MockTurn::ErrorAfter(
            vec![ModelEvent::TextDelta("Hi".to_string())],
            "connection reset".to_string(),
        )]);
        let (orchestrator, streams) = orchestrator(provider).await;

        let turn = orchestrator
            .begin_turn(&user(), &turn_request("c1", "hello"))
            .await
            .unwrap();

        let (_watcher, mut rx) = streams.subscribe("c1");
        let (own, _own_rx) = streams.subscribe("c1");
        orchestrator.stream_turn(turn, own).await;

        let mut deltas = 0;
        let mut errors = 0;
        while let Ok(frame) = rx.try_recv() {
            match frame {
                StreamFrame::TextDelta { .. } => deltas += 1,
                StreamFrame::Error { .. } => errors += 1,
                _ => {}
            }
        }
        assert_eq!(deltas, 1);
        assert_eq!(errors, 1, "exactly one user-visible error frame");

        let messages = orchestrator.store.get_messages_by_chat("c1").await.unwrap();
        let assistants: Vec<_> = messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .collect();
        assert_eq!(assistants.len(), 1, "exactly one assistant message");
        assert_eq!(assistants[0].text_content(), "Hi");
    }

    #[tokio::test]
    async fn test_tool_phase_persists_results_after_primary() {
        let provider = MockProvider::scripted(vec![MockTurn::Events(vec![
            ModelEvent::TextDelta("Working on it.".to_string()),
            ModelEvent::ToolCall(ToolCallRequest {
                id: "call_1".to_string(),
                name: "create_document".to_string(),
                arguments: r#"{"title":"Notes","content":"body"}"#.to_string(),
            }),
            ModelEvent::ToolCall(ToolCallRequest {
                id: "call_2".to_string(),
                name: "no_such_tool".to_string(),
                arguments: "{}".to_string(),
            }),
            ModelEvent::Finish,
        ])]);
        let (orchestrator, streams) = orchestrator(provider).await;

        let turn = orchestrator
            .begin_turn(&user(), &turn_request("c1", "make notes"))
            .await
            .unwrap();
        let (own, _own_rx) = streams.subscribe("c1");
        orchestrator.stream_turn(turn, own).await;

        let messages = orchestrator.store.get_messages_by_chat("c1").await.unwrap();
        assert_eq!(messages.len(), 3, "user, primary assistant, tool results");

        let primary = &messages[1];
        assert_eq!(primary.role, MessageRole::Assistant);
        let parts = primary.parts().unwrap();
        assert!(parts
            .iter()
            .any(|p| matches!(p, MessagePart::ToolCall { name, .. } if name == "create_document")));

        // The failing tool contributed nothing; the other's output landed.
        let results = &messages[2];
        assert_eq!(results.role, MessageRole::Assistant);
        assert!(results.text_content().contains("Created text document"));
    }

    #[tokio::test]
    async fn test_missing_chat_id_is_bad_request() {
        let (orchestrator, _streams) = orchestrator(MockProvider::canned()).await;
        let mut request = turn_request("c1", "hello");
        request.chat_id = None;

        let result = orchestrator.begin_turn(&user(), &request).await;
        assert!(matches!(result, Err(TurnError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_empty_message_list_is_bad_request() {
        let (orchestrator, _streams) = orchestrator(MockProvider::canned()).await;
        let request = ChatTurnRequest {
            chat_id: Some("c1".to_string()),
            messages: Vec::new(),
            selected_model: None,
        };

        let result = orchestrator.begin_turn(&user(), &request).await;
        assert!(matches!(result, Err(TurnError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_foreign_private_chat_is_unauthorized() {
        let (orchestrator, _streams) = orchestrator(MockProvider::canned()).await;
        orchestrator
            .store
            .create_chat(CreateChat {
                id: "c1".to_string(),
                user_id: "someone-else".to_string(),
                title: "Theirs".to_string(),
                visibility: ChatVisibility::Private,
            })
            .await
            .unwrap();

        let result = orchestrator.begin_turn(&user(), &turn_request("c1", "hi")).await;
        assert!(matches!(result, Err(TurnError::Unauthorized(_))));
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("Plain title"), "Plain title");
        assert_eq!(sanitize_title("\"Quoted\": subtitle"), "Quoted subtitle");
        assert_eq!(sanitize_title("  \n  "), "New chat");

        let long = "x".repeat(200);
        assert_eq!(sanitize_title(&long).chars().count(), 80);
    }

    #[test]
    fn test_to_model_messages_shapes_history() {
        let records = vec![
            ChatMessage {
                id: "m1".to_string(),
                chat_id: "c1".to_string(),
                role: MessageRole::User,
                parts: serde_json::to_string(&vec![MessagePart::Text {
                    text: "hello".to_string(),
                }])
                .unwrap(),
                attachments: "[]".to_string(),
                created_at: String::new(),
            },
            ChatMessage {
                id: "m2".to_string(),
                chat_id: "c1".to_string(),
                role: MessageRole::Assistant,
                parts: serde_json::to_string(&vec![
                    MessagePart::Text {
                        text: "done".to_string(),
                    },
                    MessagePart::ToolResult {
                        tool_call_id: "call_1".to_string(),
                        output: "42".to_string(),
                    },
                ])
                .unwrap(),
                attachments: "[]".to_string(),
                created_at: String::new(),
            },
        ];

        let messages = to_model_messages(&records);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "tool");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[2].content, "done");
    }
}
