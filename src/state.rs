use crate::services::chat_hub::ChatHubService;
use std::sync::Arc;

/// Application state shared across all HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Chat turn orchestrator and session operations
    pub chat_hub: Arc<ChatHubService>,
}

impl AppState {
    pub fn new(chat_hub: Arc<ChatHubService>) -> Self {
        Self { chat_hub }
    }
}
