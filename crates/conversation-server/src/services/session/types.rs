use chrono::{DateTime, TimeDelta, Utc};

use crate::models::chat::{ChatMessage, SessionId};

/// Conversation state owned by the session manager
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,

    /// Never moves backwards, even if the clock does
    pub last_active_at: DateTime<Utc>,

    /// Ordered by occurrence; only ever appended to
    pub history: Vec<ChatMessage>,
}

impl Session {
    pub fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_active_at: now,
            history: Vec::new(),
        }
    }

    /// Expired once inactivity strictly exceeds the timeout
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        now.signed_duration_since(self.last_active_at) > timeout
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_active_at {
            self.last_active_at = now;
        }
    }

    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            message_count: self.message_count(),
        }
    }
}

/// Read-only view handed out across the manager boundary
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Aggregate statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub active_count: usize,
    pub total_messages: usize,
    pub average_messages: f64,
    pub oldest_age_secs: f64,
    pub newest_age_secs: f64,
}
