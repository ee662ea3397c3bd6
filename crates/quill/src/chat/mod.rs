//! Live chat streaming core.
//!
//! The pieces compose leaf-first: the [`registry::ConnectionRegistry`] holds
//! subscriber channels per chat; the [`heartbeat::HeartbeatScheduler`] keeps
//! chats warm through it; the [`uploads::UploadActivityTracker`] drives the
//! scheduler around background uploads; and the
//! [`orchestrator::ChatTurnOrchestrator`] runs the per-request turn state
//! machine. [`streams::ChatStreams`] is the facade the API layer talks to.

pub mod frames;
pub mod heartbeat;
pub mod orchestrator;
pub mod registry;
pub mod streams;
pub mod uploads;

pub use frames::StreamFrame;
pub use heartbeat::HeartbeatScheduler;
pub use orchestrator::{ChatTurnOrchestrator, ChatTurnRequest, IncomingMessage, TurnError};
pub use registry::{BroadcastOutcome, ChatSender, ConnectionRegistry, SubscriberId};
pub use streams::{ChatStreams, StreamSubscription};
pub use uploads::UploadActivityTracker;
