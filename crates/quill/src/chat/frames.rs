//! Stream frame types for live chat delivery.
//!
//! These frames define the protocol between backend and subscribed clients
//! over the chat event stream. Every frame is JSON with a `type` tag.

use serde::{Deserialize, Serialize};

/// Frames sent to every connection subscribed to a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamFrame {
    /// Incremental model output, in the order the model produced it.
    TextDelta { content: String },

    /// Keep-alive emitted while background work holds the chat warm.
    Heartbeat,

    /// The set of documents attached to the chat changed (file upload).
    DocumentContextUpdate {
        #[serde(rename = "hasImages")]
        has_images: bool,
    },

    /// Terminal error surfaced to subscribers.
    Error { message: String },
}
