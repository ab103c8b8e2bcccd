use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::debug;

use crate::models::chat::{SessionEndResponse, SessionInfoResponse, SessionResponse};
use crate::services::ConversationService;
use crate::utils::error::ApiError;

/// POST /api/v1/sessions
pub async fn create_session(
    State(service): State<Arc<ConversationService>>,
) -> (StatusCode, Json<SessionResponse>) {
    (StatusCode::CREATED, Json(service.create_session()))
}

/// GET /api/v1/sessions/{session_id}
pub async fn get_session(
    State(service): State<Arc<ConversationService>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfoResponse>, ApiError> {
    debug!("Session info requested: {}", session_id);
    Ok(Json(service.session_info(&session_id)?))
}

/// DELETE /api/v1/sessions/{session_id}
pub async fn end_session(
    State(service): State<Arc<ConversationService>>,
    Path(session_id): Path<String>,
) -> Json<SessionEndResponse> {
    Json(service.end_session(&session_id))
}
