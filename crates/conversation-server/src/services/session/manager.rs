use chrono::TimeDelta;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::chat::{ChatMessage, SessionId};
use crate::services::workflow::WorkflowCache;
use crate::utils::error::ApiError;

use super::clock::Clock;
use super::types::{Session, SessionSnapshot, SessionStats};

/// Per-session storage.
///
/// Lock order is always `gate` -> `state` -> map shard, and `state` is never
/// held across an await.
struct SessionSlot {
    /// Serializes workflow executions; held for the whole query, provider
    /// round trip included. FIFO, so queued queries commit in arrival order.
    gate: Arc<AsyncMutex<()>>,

    /// `None` once the session has been ended or evicted
    state: Mutex<Option<Session>>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            gate: Arc::new(AsyncMutex::new(())),
            state: Mutex::new(Some(session)),
        }
    }
}

/// Proof that the holder owns the session's execution slot
pub struct SessionGuard {
    session_id: SessionId,
    _permit: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Owns every live session. Constructed once at startup and shared via `Arc`.
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    workflows: Arc<WorkflowCache>,
    clock: Arc<dyn Clock>,
    timeout: TimeDelta,
}

impl SessionManager {
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>, workflows: Arc<WorkflowCache>) -> Self {
        info!("SessionManager initialized with {:?} inactivity timeout", timeout);
        Self {
            sessions: DashMap::new(),
            workflows,
            clock,
            timeout: TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn workflows(&self) -> &Arc<WorkflowCache> {
        &self.workflows
    }

    pub fn create(&self) -> SessionSnapshot {
        let now = self.clock.now();
        loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                let session = Session::new(id.clone(), now);
                let snapshot = session.snapshot();
                slot.insert(Arc::new(SessionSlot::new(session)));
                info!("Created new session: {}", id);
                return snapshot;
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        self.with_session(session_id, true, |s| s.snapshot())
    }

    pub fn touch(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        let now = self.clock.now();
        self.with_session(session_id, true, |s| {
            s.touch(now);
            s.snapshot()
        })
    }

    pub fn history(&self, session_id: &str) -> Result<(SessionSnapshot, Vec<ChatMessage>), ApiError> {
        self.with_session(session_id, true, |s| (s.snapshot(), s.history.clone()))
    }

    /// Wait for the session's execution slot.
    ///
    /// Validity is checked before queueing and again once the slot is held,
    /// since the session may have been ended or expired while waiting.
    pub async fn acquire(&self, session_id: &str) -> Result<SessionGuard, ApiError> {
        let slot = self.live_slot(session_id)?;

        let permit = slot.gate.clone().lock_owned().await;

        self.with_slot(session_id, &slot, true, |_| ())?;
        Ok(SessionGuard {
            session_id: session_id.to_string(),
            _permit: permit,
        })
    }

    /// Append one user/assistant pair and touch the session.
    pub fn append_exchange(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<SessionSnapshot, ApiError> {
        let now = self.clock.now();
        let exchange = [
            ChatMessage::user(user_text, now),
            ChatMessage::assistant(assistant_text, now),
        ];
        self.commit(session_id, None, exchange)
    }

    /// Compare-and-append: commits only if history still has `base_len`
    /// entries. Under the execution gate a mismatch is an invariant violation.
    pub fn commit_exchange(
        &self,
        guard: &SessionGuard,
        base_len: usize,
        exchange: [ChatMessage; 2],
    ) -> Result<SessionSnapshot, ApiError> {
        self.commit(guard.session_id(), Some(base_len), exchange)
    }

    fn commit(
        &self,
        session_id: &str,
        base_len: Option<usize>,
        exchange: [ChatMessage; 2],
    ) -> Result<SessionSnapshot, ApiError> {
        let now = self.clock.now();
        // Existence only: a session mid-execution cannot be evicted for
        // inactivity, so expiry is not re-checked here.
        self.with_session(session_id, false, |s| {
            if let Some(expected) = base_len {
                if s.history.len() != expected {
                    error!(
                        "History of session {} changed under its execution gate ({} != {})",
                        session_id,
                        s.history.len(),
                        expected
                    );
                    return Err(ApiError::Internal(format!(
                        "history of session {} changed concurrently",
                        session_id
                    )));
                }
            }
            s.history.extend(exchange);
            s.touch(now);
            Ok(s.snapshot())
        })?
    }

    /// Remove the session and its compiled workflow. Ending an absent or
    /// expired session is not an error; returns whether anything was removed.
    pub fn end(&self, session_id: &str) -> bool {
        let removed = match self.sessions.remove(session_id) {
            Some((_, slot)) => slot.state.lock().take().is_some(),
            None => false,
        };
        self.workflows.evict(session_id);

        if removed {
            info!("Ended session: {}", session_id);
        } else {
            debug!("End requested for absent session: {}", session_id);
        }
        removed
    }

    /// Evict every expired session that is not mid-execution.
    pub fn cleanup_expired(&self) -> usize {
        let candidates: Vec<(SessionId, Arc<SessionSlot>)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let removed = candidates
            .iter()
            .filter(|(id, slot)| self.evict_if_expired(id, slot))
            .count();

        if removed > 0 {
            info!("Cleaned up {} expired sessions", removed);
        }
        removed
    }

    pub fn stats(&self) -> SessionStats {
        let now = self.clock.now();
        let slots: Vec<Arc<SessionSlot>> = self.sessions.iter().map(|e| e.value().clone()).collect();

        let mut stats = SessionStats::default();
        let mut oldest: Option<f64> = None;
        let mut newest: Option<f64> = None;

        for slot in slots {
            let state = slot.state.lock();
            let Some(session) = state.as_ref() else { continue };
            if session.is_expired(now, self.timeout) {
                continue;
            }

            let age = (now - session.created_at).num_milliseconds().max(0) as f64 / 1000.0;
            stats.active_count += 1;
            stats.total_messages += session.message_count();
            oldest = Some(oldest.map_or(age, |o| o.max(age)));
            newest = Some(newest.map_or(age, |n| n.min(age)));
        }

        if stats.active_count > 0 {
            stats.average_messages = stats.total_messages as f64 / stats.active_count as f64;
        }
        stats.oldest_age_secs = oldest.unwrap_or(0.0);
        stats.newest_age_secs = newest.unwrap_or(0.0);
        stats
    }

    /// Entries in the map, expired-but-unswept included
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn slot(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    fn live_slot(&self, session_id: &str) -> Result<Arc<SessionSlot>, ApiError> {
        let slot = self
            .slot(session_id)
            .ok_or_else(|| ApiError::session_not_found(session_id))?;
        self.with_slot(session_id, &slot, true, |_| ())?;
        Ok(slot)
    }

    fn with_session<R>(
        &self,
        session_id: &str,
        check_expiry: bool,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, ApiError> {
        let slot = self
            .slot(session_id)
            .ok_or_else(|| ApiError::session_not_found(session_id))?;
        self.with_slot(session_id, &slot, check_expiry, f)
    }

    fn with_slot<R>(
        &self,
        session_id: &str,
        slot: &Arc<SessionSlot>,
        check_expiry: bool,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, ApiError> {
        let now = self.clock.now();
        {
            let mut state = slot.state.lock();
            match state.as_mut() {
                None => return Err(ApiError::session_not_found(session_id)),
                Some(session) if !check_expiry || !session.is_expired(now, self.timeout) => {
                    return Ok(f(session));
                }
                Some(_) => {}
            }
        }

        info!("Session expired: {}", session_id);
        self.evict_if_expired(session_id, slot);
        Err(ApiError::session_not_found(session_id))
    }

    /// Takes the execution gate first; a session with a query in flight is
    /// left alone.
    fn evict_if_expired(&self, session_id: &str, slot: &Arc<SessionSlot>) -> bool {
        let Ok(_gate) = slot.gate.try_lock() else {
            debug!("Session {} is mid-execution, skipping eviction", session_id);
            return false;
        };

        let now = self.clock.now();
        {
            let mut state = slot.state.lock();
            match state.as_ref() {
                Some(session) if session.is_expired(now, self.timeout) => {
                    state.take();
                }
                _ => return false,
            }
        }

        self.sessions.remove_if(session_id, |_, current| Arc::ptr_eq(current, slot));
        self.workflows.evict(session_id);
        debug!("Evicted expired session {}", session_id);
        true
    }
}
