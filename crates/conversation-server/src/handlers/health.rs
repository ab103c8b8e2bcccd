use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::chat::{HealthResponse, StatsResponse};
use crate::services::ConversationService;

/// GET /api/v1/health
///
/// Always 200; a failed provider probe shows up as `status: "degraded"`.
pub async fn health_check(State(service): State<Arc<ConversationService>>) -> Json<HealthResponse> {
    Json(service.health().await)
}

/// GET /api/v1/stats
pub async fn stats(State(service): State<Arc<ConversationService>>) -> Json<StatsResponse> {
    Json(service.stats())
}
