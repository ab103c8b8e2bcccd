use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::models::chat::{HistoryResponse, QueryRequest, QueryResponse};
use crate::services::ConversationService;
use crate::utils::error::ApiError;

/// POST /api/v1/chat/{session_id}/query
pub async fn submit_query(
    State(service): State<Arc<ConversationService>>,
    Path(session_id): Path<String>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let query = request.validate()?;

    info!(
        "Query request: session={}, query_len={}",
        session_id,
        query.chars().count()
    );

    Ok(Json(service.submit_query(&session_id, query).await?))
}

/// GET /api/v1/chat/{session_id}/history
pub async fn get_history(
    State(service): State<Arc<ConversationService>>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    Ok(Json(service.history(&session_id)?))
}
