//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::AuthState;
use crate::chat::{ChatStreams, ChatTurnOrchestrator};
use crate::model::ModelProvider;
use crate::storage::ChatRepository;
use crate::tools::ToolSet;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Chat storage repository.
    pub store: Arc<ChatRepository>,
    /// Live stream hub (registry + heartbeats + upload tracking).
    pub streams: Arc<ChatStreams>,
    /// Language model collaborator.
    pub model: Arc<dyn ModelProvider>,
    /// Tools offered to the model.
    pub tools: Arc<ToolSet>,
    /// Turn orchestrator.
    pub orchestrator: Arc<ChatTurnOrchestrator>,
    /// Authentication state.
    pub auth: AuthState,
    /// Directory uploaded files land in.
    pub uploads_dir: PathBuf,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        store: ChatRepository,
        model: Arc<dyn ModelProvider>,
        tools: ToolSet,
        auth: AuthState,
        default_model: String,
        uploads_dir: PathBuf,
    ) -> Self {
        let store = Arc::new(store);
        let streams = Arc::new(ChatStreams::new());
        let tools = Arc::new(tools);
        let orchestrator = Arc::new(ChatTurnOrchestrator::new(
            store.clone(),
            streams.clone(),
            model.clone(),
            tools.clone(),
            default_model,
        ));

        Self {
            store,
            streams,
            model,
            tools,
            orchestrator,
            auth,
            uploads_dir,
        }
    }
}
