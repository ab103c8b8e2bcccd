use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::ApiError;

/// Opaque session identifier (UUID v4 string)
pub type SessionId = String;

/// Maximum accepted query length, in characters
pub const MAX_QUERY_CHARS: usize = 2000;

/// Convert a timestamp into fractional Unix seconds for the wire format
pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

// ===== HISTORY =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ApiError;

    /// Unknown roles are rejected, never defaulted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ApiError::Internal(format!(
                "unrecognized history role '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = ApiError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp,
        }
    }
}

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

impl QueryRequest {
    /// Boundary validation: non-blank, bounded length
    pub fn validate(&self) -> Result<&str, ApiError> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(ApiError::Validation("query must not be empty".to_string()));
        }
        let len = query.chars().count();
        if len > MAX_QUERY_CHARS {
            return Err(ApiError::Validation(format!(
                "query is {} characters, maximum is {}",
                len, MAX_QUERY_CHARS
            )));
        }
        Ok(query)
    }
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub created_at: f64,
    pub message_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfoResponse {
    pub session_id: SessionId,
    pub created_at: f64,
    pub last_active_at: f64,
    pub message_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionEndResponse {
    pub session_id: SessionId,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub session_id: SessionId,
    pub query: String,
    pub response: String,
    pub message_count: usize,
    pub processing_time_ms: u64,
    pub timestamp: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: f64,
}

impl From<&ChatMessage> for HistoryMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            timestamp: unix_seconds(msg.timestamp),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: SessionId,
    pub created_at: f64,
    pub last_active_at: f64,
    pub message_count: usize,
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: f64,
    pub active_sessions: usize,
    pub provider_reachable: bool,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatsResponse {
    pub active_count: usize,
    pub total_messages: usize,
    pub average_messages: f64,
    pub oldest_age_secs: f64,
    pub newest_age_secs: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub timestamp: f64,
    pub sessions: SessionStatsResponse,
    pub cached_workflows: usize,
    pub expired_removed: usize,
    pub provider_permits_available: usize,
}
