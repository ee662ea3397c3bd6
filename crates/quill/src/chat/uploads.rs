//! Upload activity tracking.
//!
//! Chats with a file upload in flight keep a heartbeat running so the
//! client's event stream is not cut by idle timeouts while blob storage and
//! text extraction do their work. Activity is reference-counted per chat:
//! with two overlapping uploads, the first to finish must not silence the
//! heartbeat the second still depends on.

use dashmap::DashMap;
use log::debug;

use super::heartbeat::HeartbeatScheduler;

/// Tracks which chats currently have a background upload in progress.
pub struct UploadActivityTracker {
    heartbeats: HeartbeatScheduler,
    active: DashMap<String, usize>,
}

impl UploadActivityTracker {
    pub fn new(heartbeats: HeartbeatScheduler) -> Self {
        Self {
            heartbeats,
            active: DashMap::new(),
        }
    }

    /// Record the start of an upload for a chat and keep it warm.
    pub fn mark_started(&self, chat_id: &str) {
        let count = {
            let mut entry = self.active.entry(chat_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        debug!("upload started for chat {} ({} active)", chat_id, count);
        self.heartbeats.start(chat_id);
    }

    /// Record the end of an upload, stopping the heartbeat when it was the
    /// last one in flight for the chat.
    ///
    /// Callers must reach this on every exit path, error paths included; an
    /// upload that never completes here leaves the heartbeat to its bounded
    /// lifetime.
    pub fn mark_complete(&self, chat_id: &str) {
        let remaining = {
            match self.active.get_mut(chat_id) {
                Some(mut entry) => {
                    *entry = entry.saturating_sub(1);
                    Some(*entry)
                }
                None => None,
            }
        };

        match remaining {
            Some(0) => {
                self.active.remove_if(chat_id, |_, count| *count == 0);
                self.heartbeats.stop(chat_id);
                debug!("last upload finished for chat {}", chat_id);
            }
            Some(count) => {
                debug!("upload finished for chat {} ({} still active)", chat_id, count);
            }
            None => {}
        }
    }

    /// Whether the chat has at least one upload in flight.
    pub fn is_active(&self, chat_id: &str) -> bool {
        self.active.get(chat_id).map(|c| *c > 0).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::registry::ConnectionRegistry;
    use std::sync::Arc;
    use std::time::Duration;

    fn tracker() -> UploadActivityTracker {
        let registry = Arc::new(ConnectionRegistry::new());
        let heartbeats = HeartbeatScheduler::with_timings(
            registry,
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        UploadActivityTracker::new(heartbeats)
    }

    #[tokio::test]
    async fn test_start_and_complete_drive_heartbeat() {
        let tracker = tracker();

        tracker.mark_started("c1");
        assert!(tracker.is_active("c1"));
        assert!(tracker.heartbeats.is_running("c1"));

        tracker.mark_complete("c1");
        assert!(!tracker.is_active("c1"));
        assert!(!tracker.heartbeats.is_running("c1"));
    }

    #[tokio::test]
    async fn test_overlapping_uploads_share_one_heartbeat() {
        let tracker = tracker();

        tracker.mark_started("c1");
        tracker.mark_started("c1");

        // First upload finishing must not stop the shared heartbeat.
        tracker.mark_complete("c1");
        assert!(tracker.is_active("c1"));
        assert!(tracker.heartbeats.is_running("c1"));

        tracker.mark_complete("c1");
        assert!(!tracker.is_active("c1"));
        assert!(!tracker.heartbeats.is_running("c1"));
    }

    #[tokio::test]
    async fn test_complete_without_start_is_noop() {
        let tracker = tracker();
        tracker.mark_complete("c1");
        assert!(!tracker.is_active("c1"));
        assert!(!tracker.heartbeats.is_running("c1"));
    }

    #[tokio::test]
    async fn test_chats_are_independent() {
        let tracker = tracker();
        tracker.mark_started("c1");
        tracker.mark_started("c2");

        tracker.mark_complete("c1");
        assert!(!tracker.heartbeats.is_running("c1"));
        assert!(tracker.heartbeats.is_running("c2"));
        tracker.mark_complete("c2");
    }
}
