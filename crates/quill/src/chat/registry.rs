//! Connection registry for fanning chat events out to subscribed clients.

use dashmap::DashMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::frames::StreamFrame;

/// Size of the per-subscriber send buffer.
const SUBSCRIBER_BUFFER_SIZE: usize = 64;

/// A sender for stream frames to a specific subscriber.
pub type ChatSender = mpsc::Sender<StreamFrame>;

/// Identifier handed out per subscription, used to unsubscribe.
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    tx: ChatSender,
}

/// What happened during a single broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Number of subscribers a delivery was attempted to.
    pub attempted: usize,
    /// Number of subscribers removed because their channel was closed.
    pub pruned: usize,
    /// True when the chat had subscribers before this pass and has none left.
    pub emptied: bool,
}

/// Registry of live subscriber channels, keyed by chat id.
///
/// The registry is the single holder of output channels for in-flight chat
/// streams. Delivery is best-effort: a subscriber whose channel is closed is
/// dropped during the same broadcast pass, so the registry never retains a
/// channel known to be dead. There is no replay buffer; a subscriber only
/// sees frames broadcast after it joined.
pub struct ConnectionRegistry {
    chats: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            chats: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a fresh channel and subscribe it to `chat_id`.
    ///
    /// Returns the subscriber id and the receiving half for the connection.
    pub fn open_channel(
        &self,
        chat_id: &str,
    ) -> (SubscriberId, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER_SIZE);
        let id = self.subscribe(chat_id, tx);
        (id, rx)
    }

    /// Register `tx` as a recipient for `chat_id`.
    ///
    /// Subscribing the same channel twice is a no-op and returns the id of
    /// the existing subscription, so a broadcast delivers at most one frame
    /// per channel.
    pub fn subscribe(&self, chat_id: &str, tx: ChatSender) -> SubscriberId {
        let mut subscribers = self.chats.entry(chat_id.to_string()).or_default();
        if let Some(existing) = subscribers.iter().find(|s| s.tx.same_channel(&tx)) {
            return existing.id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        subscribers.push(Subscriber { id, tx });
        debug!("subscriber {} joined chat {}", id, chat_id);
        id
    }

    /// Remove a subscriber from `chat_id`.
    ///
    /// Returns true when this removed the chat's last subscriber; the caller
    /// is expected to stop any heartbeat still running for the chat.
    pub fn unsubscribe(&self, chat_id: &str, id: SubscriberId) -> bool {
        let mut emptied = false;
        if let Some(mut subscribers) = self.chats.get_mut(chat_id) {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            if subscribers.len() < before {
                debug!("subscriber {} left chat {}", id, chat_id);
            }
            emptied = before > 0 && subscribers.is_empty();
        }
        if emptied {
            self.chats.remove_if(chat_id, |_, subscribers| subscribers.is_empty());
        }
        emptied
    }

    /// Send `frame` to every current subscriber of `chat_id`.
    ///
    /// Frames from one logical writer arrive at all subscribers in the order
    /// they were broadcast. A failed send (connection gone) is logged and the
    /// subscriber is unsubscribed in the same pass; it never aborts delivery
    /// to the remaining subscribers.
    pub async fn broadcast(&self, chat_id: &str, frame: StreamFrame) -> BroadcastOutcome {
        let targets: Vec<(SubscriberId, ChatSender)> = match self.chats.get(chat_id) {
            Some(subscribers) => subscribers.iter().map(|s| (s.id, s.tx.clone())).collect(),
            None => return BroadcastOutcome::default(),
        };

        let mut outcome = BroadcastOutcome {
            attempted: targets.len(),
            ..Default::default()
        };

        let mut failed: Vec<SubscriberId> = Vec::new();
        for (id, tx) in targets {
            if tx.send(frame.clone()).await.is_err() {
                warn!("dropping closed subscriber {} of chat {}", id, chat_id);
                failed.push(id);
            }
        }

        outcome.pruned = failed.len();
        for id in failed {
            if self.unsubscribe(chat_id, id) {
                outcome.emptied = true;
            }
        }
        outcome
    }

    /// Number of live subscribers for a chat.
    pub fn subscriber_count(&self, chat_id: &str) -> usize {
        self.chats.get(chat_id).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let registry = ConnectionRegistry::new();
        let (_id1, mut rx1) = registry.open_channel("c1");
        let (_id2, mut rx2) = registry.open_channel("c1");

        let outcome = registry
            .broadcast(
                "c1",
                StreamFrame::TextDelta {
                    content: "hi".to_string(),
                },
            )
            .await;

        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.pruned, 0);
        assert!(matches!(
            rx1.recv().await,
            Some(StreamFrame::TextDelta { .. })
        ));
        assert!(matches!(
            rx2.recv().await,
            Some(StreamFrame::TextDelta { .. })
        ));
    }

    #[tokio::test]
    async fn test_broadcast_prunes_closed_channels() {
        let registry = ConnectionRegistry::new();
        let (_id1, rx1) = registry.open_channel("c1");
        let (_id2, mut rx2) = registry.open_channel("c1");
        drop(rx1);

        let outcome = registry.broadcast("c1", StreamFrame::Heartbeat).await;

        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.pruned, 1);
        assert!(!outcome.emptied);
        assert_eq!(registry.subscriber_count("c1"), 1);
        assert!(matches!(rx2.recv().await, Some(StreamFrame::Heartbeat)));
    }

    #[tokio::test]
    async fn test_broadcast_reports_emptied_registry() {
        let registry = ConnectionRegistry::new();
        let (_id, rx) = registry.open_channel("c1");
        drop(rx);

        let outcome = registry.broadcast("c1", StreamFrame::Heartbeat).await;
        assert!(outcome.emptied);
        assert_eq!(registry.subscriber_count("c1"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_same_channel_twice_is_noop() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        let id1 = registry.subscribe("c1", tx.clone());
        let id2 = registry.subscribe("c1", tx);

        assert_eq!(id1, id2);
        assert_eq!(registry.subscriber_count("c1"), 1);

        registry.broadcast("c1", StreamFrame::Heartbeat).await;
        assert!(matches!(rx.recv().await, Some(StreamFrame::Heartbeat)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_last_reports_empty() {
        let registry = ConnectionRegistry::new();
        let (id1, _rx1) = registry.open_channel("c1");
        let (id2, _rx2) = registry.open_channel("c1");

        assert!(!registry.unsubscribe("c1", id1));
        assert!(registry.unsubscribe("c1", id2));
        assert_eq!(registry.subscriber_count("c1"), 0);

        // Safe to call again once gone.
        assert!(!registry.unsubscribe("c1", id2));
    }

    #[tokio::test]
    async fn test_broadcast_unknown_chat_is_noop() {
        let registry = ConnectionRegistry::new();
        let outcome = registry.broadcast("nope", StreamFrame::Heartbeat).await;
        assert_eq!(outcome, BroadcastOutcome::default());
    }
}
