//! Facade tying the connection registry, heartbeat scheduler and upload
//! tracker together for the API layer.

use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;

use super::frames::StreamFrame;
use super::heartbeat::HeartbeatScheduler;
use super::registry::{ConnectionRegistry, SubscriberId};
use super::uploads::UploadActivityTracker;

/// Live-stream hub for all chats in this process.
///
/// Owns the cross-component rule that the registry itself cannot express:
/// when the last subscriber of a chat goes away, any heartbeat still running
/// for it is stopped so no timer outlives its audience.
pub struct ChatStreams {
    registry: Arc<ConnectionRegistry>,
    heartbeats: HeartbeatScheduler,
    uploads: UploadActivityTracker,
}

impl ChatStreams {
    pub fn new() -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let heartbeats = HeartbeatScheduler::new(registry.clone());
        let uploads = UploadActivityTracker::new(heartbeats.clone());
        Self {
            registry,
            heartbeats,
            uploads,
        }
    }

    /// Open a new subscription to a chat's live events.
    ///
    /// The returned guard unsubscribes on drop; the receiver yields frames
    /// from the join point onward.
    pub fn subscribe(
        self: &Arc<Self>,
        chat_id: &str,
    ) -> (StreamSubscription, mpsc::Receiver<StreamFrame>) {
        let (id, rx) = self.registry.open_channel(chat_id);
        let guard = StreamSubscription {
            streams: self.clone(),
            chat_id: chat_id.to_string(),
            id,
        };
        (guard, rx)
    }

    /// Broadcast a frame to every subscriber of a chat.
    pub async fn broadcast(&self, chat_id: &str, frame: StreamFrame) {
        let outcome = self.registry.broadcast(chat_id, frame).await;
        if outcome.emptied {
            self.heartbeats.stop(chat_id);
        }
    }

    /// Record the start of a background upload for a chat.
    pub fn mark_upload_started(&self, chat_id: &str) {
        self.uploads.mark_started(chat_id);
    }

    /// Record the end of a background upload for a chat.
    pub fn mark_upload_complete(&self, chat_id: &str) {
        self.uploads.mark_complete(chat_id);
    }

    /// The underlying registry (for components that only broadcast).
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The heartbeat scheduler.
    pub fn heartbeats(&self) -> &HeartbeatScheduler {
        &self.heartbeats
    }
}

impl Default for ChatStreams {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for one subscription; unsubscribes on drop.
pub struct StreamSubscription {
    streams: Arc<ChatStreams>,
    chat_id: String,
    id: SubscriberId,
}

impl StreamSubscription {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        if self.streams.registry.unsubscribe(&self.chat_id, self.id) {
            debug!(
                "last subscriber of chat {} detached, stopping heartbeat",
                self.chat_id
            );
            self.streams.heartbeats.stop(&self.chat_id);
        }
    }
}
