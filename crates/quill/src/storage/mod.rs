//! Durable chat storage: chats, messages, votes, documents, suggestions.

mod models;
mod repository;

pub use models::{
    AttachmentRef, Chat, ChatMessage, ChatVisibility, CreateChat, CreateChatMessage,
    CreateSuggestion, Document, DocumentKind, MessagePart, MessageRole, Suggestion, Vote,
};
pub use repository::ChatRepository;
