use axum::extract::FromRef;
use std::sync::Arc;

use crate::services::ConversationService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub conversation_service: Arc<ConversationService>,
}

impl AppState {
    pub fn new(conversation_service: Arc<ConversationService>) -> Self {
        Self {
            conversation_service,
        }
    }
}

impl FromRef<AppState> for Arc<ConversationService> {
    fn from_ref(state: &AppState) -> Self {
        state.conversation_service.clone()
    }
}
