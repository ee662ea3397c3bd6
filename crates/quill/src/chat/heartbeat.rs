//! Per-chat heartbeat timers.
//!
//! A running heartbeat broadcasts a keep-alive frame on a fixed cadence so
//! long-lived connections survive idle timeouts while background work (file
//! uploads, long tool calls) is in flight. Every heartbeat also carries a
//! bounded lifetime: a chat that is never explicitly stopped goes quiet on
//! its own, so a forgotten start can never tick forever.

use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::frames::StreamFrame;
use super::registry::ConnectionRegistry;

/// Cadence of heartbeat frames.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

/// Hard cap on how long one `start` keeps a heartbeat alive.
pub const HEARTBEAT_MAX_LIFETIME: Duration = Duration::from_secs(120);

struct HeartbeatTimers {
    periodic: JoinHandle<()>,
    lifetime: JoinHandle<()>,
}

struct Inner {
    registry: Arc<ConnectionRegistry>,
    timers: DashMap<String, HeartbeatTimers>,
    period: Duration,
    max_lifetime: Duration,
}

/// Schedules and cancels per-chat heartbeat timers.
///
/// Per chat the state is `Stopped` (no entry) or `Running` (a periodic timer
/// plus a bounded-lifetime timer). `start` on a running chat restarts both
/// timers; `extend` replaces only the lifetime timer; `stop` cancels both.
#[derive(Clone)]
pub struct HeartbeatScheduler {
    inner: Arc<Inner>,
}

impl HeartbeatScheduler {
    /// Create a scheduler broadcasting through `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self::with_timings(registry, HEARTBEAT_PERIOD, HEARTBEAT_MAX_LIFETIME)
    }

    /// Create a scheduler with custom timings.
    pub fn with_timings(
        registry: Arc<ConnectionRegistry>,
        period: Duration,
        max_lifetime: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                timers: DashMap::new(),
                period,
                max_lifetime,
            }),
        }
    }

    /// Start (or restart) the heartbeat for a chat.
    ///
    /// Restarting is not a no-op: both timers are replaced, which resets the
    /// bounded lifetime.
    pub fn start(&self, chat_id: &str) {
        self.stop(chat_id);

        let periodic = self.spawn_periodic(chat_id);
        let lifetime = self.spawn_lifetime(chat_id);
        self.inner
            .timers
            .insert(chat_id.to_string(), HeartbeatTimers { periodic, lifetime });
        debug!("heartbeat started for chat {}", chat_id);
    }

    /// Reset the bounded lifetime of a running heartbeat.
    ///
    /// The periodic timer keeps its phase; only the lifetime timer is
    /// replaced. No-op when the chat has no running heartbeat.
    pub fn extend(&self, chat_id: &str) {
        if let Some(mut timers) = self.inner.timers.get_mut(chat_id) {
            timers.lifetime.abort();
            timers.lifetime = self.spawn_lifetime(chat_id);
            debug!("heartbeat lifetime extended for chat {}", chat_id);
        }
    }

    /// Cancel both timers for a chat. Safe to call when not running.
    pub fn stop(&self, chat_id: &str) {
        if let Some((_, timers)) = self.inner.timers.remove(chat_id) {
            timers.periodic.abort();
            timers.lifetime.abort();
            debug!("heartbeat stopped for chat {}", chat_id);
        }
    }

    /// Whether a heartbeat is currently running for the chat.
    pub fn is_running(&self, chat_id: &str) -> bool {
        self.inner.timers.contains_key(chat_id)
    }

    fn spawn_periodic(&self, chat_id: &str) -> JoinHandle<()> {
        let scheduler = self.clone();
        let chat_id = chat_id.to_string();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.inner.period);
            // The immediate first tick is skipped; a heartbeat announces
            // ongoing work, not the start of it.
            interval.tick().await;
            loop {
                interval.tick().await;
                let outcome = scheduler
                    .inner
                    .registry
                    .broadcast(&chat_id, StreamFrame::Heartbeat)
                    .await;
                if outcome.emptied {
                    debug!("chat {} lost its last subscriber, stopping heartbeat", chat_id);
                    scheduler.stop(&chat_id);
                    return;
                }
            }
        })
    }

    fn spawn_lifetime(&self, chat_id: &str) -> JoinHandle<()> {
        let scheduler = self.clone();
        let chat_id = chat_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.inner.max_lifetime).await;
            warn!("heartbeat for chat {} hit its maximum lifetime", chat_id);
            scheduler.stop(&chat_id);
        })
    }
}
