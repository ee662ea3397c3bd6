//! Chat storage data models.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            "system" => Ok(MessageRole::System),
            _ => Err(format!("unknown message role: {}", s)),
        }
    }
}

impl TryFrom<String> for MessageRole {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Who can read a chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatVisibility {
    #[default]
    Private,
    Public,
}

impl std::fmt::Display for ChatVisibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatVisibility::Private => write!(f, "private"),
            ChatVisibility::Public => write!(f, "public"),
        }
    }
}

impl std::str::FromStr for ChatVisibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(ChatVisibility::Private),
            "public" => Ok(ChatVisibility::Public),
            _ => Err(format!("unknown visibility: {}", s)),
        }
    }
}

impl TryFrom<String> for ChatVisibility {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Kind of a generated or uploaded document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    #[default]
    Text,
    Code,
    Sheet,
    Image,
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Text => write!(f, "text"),
            DocumentKind::Code => write!(f, "code"),
            DocumentKind::Sheet => write!(f, "sheet"),
            DocumentKind::Image => write!(f, "image"),
        }
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(DocumentKind::Text),
            "code" => Ok(DocumentKind::Code),
            "sheet" => Ok(DocumentKind::Sheet),
            "image" => Ok(DocumentKind::Image),
            _ => Err(format!("unknown document kind: {}", s)),
        }
    }
}

impl TryFrom<String> for DocumentKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One typed part of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        tool_call_id: String,
        output: String,
    },
    Reasoning {
        text: String,
    },
}

/// Reference to an uploaded attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
}

/// A chat record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chat {
    /// Caller-supplied, globally unique identifier.
    pub id: String,
    /// Owner identity.
    pub user_id: String,
    pub title: String,
    #[sqlx(try_from = "String")]
    pub visibility: ChatVisibility,
    pub created_at: String,
}

/// A stored message. `parts` and `attachments` hold JSON.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    #[sqlx(try_from = "String")]
    pub role: MessageRole,
    pub parts: String,
    pub attachments: String,
    pub created_at: String,
}

impl ChatMessage {
    /// Decode the typed content parts.
    pub fn parts(&self) -> Result<Vec<MessagePart>> {
        serde_json::from_str(&self.parts).context("decoding message parts")
    }

    /// Decode the attachment references.
    pub fn attachments(&self) -> Result<Vec<AttachmentRef>> {
        serde_json::from_str(&self.attachments).context("decoding message attachments")
    }

    /// The plain text of the message: its text parts, in order.
    pub fn text_content(&self) -> String {
        self.parts()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Payload for inserting a chat.
#[derive(Debug, Clone)]
pub struct CreateChat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub visibility: ChatVisibility,
}

/// Payload for inserting a message.
#[derive(Debug, Clone)]
pub struct CreateChatMessage {
    pub chat_id: String,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub attachments: Vec<AttachmentRef>,
}

impl CreateChatMessage {
    /// A message with a single text part and no attachments.
    pub fn text(chat_id: impl Into<String>, role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            role,
            parts: vec![MessagePart::Text { text: text.into() }],
            attachments: Vec::new(),
        }
    }
}

/// A per-message vote.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Vote {
    pub chat_id: String,
    pub message_id: String,
    pub is_upvoted: bool,
}

/// A document produced by tools or uploads.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[sqlx(try_from = "String")]
    pub kind: DocumentKind,
    pub content: Option<String>,
    pub created_at: String,
}

/// An edit suggestion attached to a document.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Suggestion {
    pub id: String,
    pub document_id: String,
    pub original_text: String,
    pub suggested_text: String,
    pub description: Option<String>,
    pub is_resolved: bool,
    pub created_at: String,
}

/// Payload for inserting a suggestion.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSuggestion {
    pub original_text: String,
    pub suggested_text: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!("user".parse::<MessageRole>().unwrap(), MessageRole::User);
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
        assert!("robot".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_visibility_round_trip() {
        assert_eq!(
            "public".parse::<ChatVisibility>().unwrap(),
            ChatVisibility::Public
        );
        assert_eq!(ChatVisibility::Private.to_string(), "private");
    }

    #[test]
    fn test_message_text_content_joins_text_parts() {
        let message = ChatMessage {
            id: "m1".to_string(),
            chat_id: "c1".to_string(),
            role: MessageRole::Assistant,
            parts: serde_json::to_string(&vec![
                MessagePart::Text {
                    text: "Hi".to_string(),
                },
                MessagePart::ToolCall {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: "{}".to_string(),
                },
                MessagePart::Text {
                    text: " there".to_string(),
                },
            ])
            .unwrap(),
            attachments: "[]".to_string(),
            created_at: String::new(),
        };

        assert_eq!(message.text_content(), "Hi there");
    }

    #[test]
    fn test_part_serialization_tags() {
        let part = serde_json::to_value(MessagePart::ToolResult {
            tool_call_id: "call_1".to_string(),
            output: "42".to_string(),
        })
        .unwrap();
        assert_eq!(part["type"], "tool-result");
    }
}
