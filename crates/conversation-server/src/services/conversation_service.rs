use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::chat::{
    unix_seconds, HealthResponse, HistoryMessage, HistoryResponse, QueryResponse,
    SessionEndResponse, SessionInfoResponse, SessionResponse, SessionStatsResponse, StatsResponse,
};
use crate::services::provider::LanguageModelProvider;
use crate::services::session::{SessionManager, SessionStats};
use crate::utils::error::ApiError;
use crate::utils::limiters::ProviderLimiter;

/// Drives one query through the session, the cached workflow and back.
pub struct ConversationService {
    sessions: Arc<SessionManager>,
    provider: Arc<dyn LanguageModelProvider>,
    limiter: ProviderLimiter,
    expired_removed: AtomicUsize,
}

impl ConversationService {
    pub fn new(
        sessions: Arc<SessionManager>,
        provider: Arc<dyn LanguageModelProvider>,
        limiter: ProviderLimiter,
    ) -> Self {
        Self {
            sessions,
            provider,
            limiter,
            expired_removed: AtomicUsize::new(0),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn create_session(&self) -> SessionResponse {
        let snapshot = self.sessions.create();
        SessionResponse {
            session_id: snapshot.session_id,
            created_at: unix_seconds(snapshot.created_at),
            message_count: snapshot.message_count,
        }
    }

    pub fn session_info(&self, session_id: &str) -> Result<SessionInfoResponse, ApiError> {
        let snapshot = self.sessions.get(session_id)?;
        Ok(SessionInfoResponse {
            session_id: snapshot.session_id,
            created_at: unix_seconds(snapshot.created_at),
            last_active_at: unix_seconds(snapshot.last_active_at),
            message_count: snapshot.message_count,
        })
    }

    /// Always succeeds: ending an absent session is a no-op.
    pub fn end_session(&self, session_id: &str) -> SessionEndResponse {
        let removed = self.sessions.end(session_id);
        SessionEndResponse {
            session_id: session_id.to_string(),
            success: true,
            message: if removed {
                "Session ended successfully".to_string()
            } else {
                "Session already ended or expired".to_string()
            },
        }
    }

    pub fn history(&self, session_id: &str) -> Result<HistoryResponse, ApiError> {
        let (snapshot, messages) = self.sessions.history(session_id)?;
        Ok(HistoryResponse {
            session_id: snapshot.session_id,
            created_at: unix_seconds(snapshot.created_at),
            last_active_at: unix_seconds(snapshot.last_active_at),
            message_count: snapshot.message_count,
            messages: messages.iter().map(HistoryMessage::from).collect(),
        })
    }

    /// Queries on one session run one at a time in arrival order; the
    /// exchange is committed only if the whole workflow succeeded.
    pub async fn submit_query(&self, session_id: &str, query: &str) -> Result<QueryResponse, ApiError> {
        let started = Instant::now();

        let guard = self.sessions.acquire(session_id).await?;
        self.sessions.touch(session_id)?;
        let (_, history) = self.sessions.history(session_id)?;

        let workflow = self.sessions.workflows().get_or_create(session_id);
        let outcome = match workflow.run(&history, query).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Query failed for session {} ({}), history left at {} messages",
                    session_id,
                    e.kind(),
                    history.len()
                );
                self.evict_workflow_if_ended(session_id);
                return Err(e);
            }
        };

        let snapshot = match self
            .sessions
            .commit_exchange(&guard, outcome.base_len, outcome.exchange)
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.evict_workflow_if_ended(session_id);
                return Err(e);
            }
        };
        drop(guard);

        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            "Processed query for session {} in {}ms ({} messages)",
            session_id, processing_time_ms, snapshot.message_count
        );

        Ok(QueryResponse {
            session_id: snapshot.session_id,
            query: query.to_string(),
            response: outcome.response,
            message_count: snapshot.message_count,
            processing_time_ms,
            timestamp: unix_seconds(snapshot.last_active_at),
        })
    }

    /// Workflow entries of sessions ended mid-query are removed here.
    fn evict_workflow_if_ended(&self, session_id: &str) {
        if self.sessions.get(session_id).is_err() {
            self.sessions.workflows().evict(session_id);
        }
    }

    pub fn cleanup_expired(&self) -> usize {
        let removed = self.sessions.cleanup_expired();
        self.expired_removed.fetch_add(removed, Ordering::Relaxed);
        removed
    }

    pub async fn health(&self) -> HealthResponse {
        self.cleanup_expired();
        let stats = self.sessions.stats();

        let provider_reachable = self
            .limiter
            .run("health_check", async { Ok::<_, ApiError>(self.provider.health_check().await) })
            .await
            .unwrap_or(false);

        HealthResponse {
            status: if provider_reachable { "healthy" } else { "degraded" }.to_string(),
            timestamp: unix_seconds(self.sessions.clock().now()),
            active_sessions: stats.active_count,
            provider_reachable,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn stats(&self) -> StatsResponse {
        self.cleanup_expired();
        let stats = self.sessions.stats();

        StatsResponse {
            timestamp: unix_seconds(self.sessions.clock().now()),
            sessions: stats.into(),
            cached_workflows: self.sessions.workflows().len(),
            expired_removed: self.expired_removed.load(Ordering::Relaxed),
            provider_permits_available: self.limiter.available_permits(),
        }
    }

    /// Periodic expiry sweep. A zero interval disables it; sweeps from
    /// `health` and `stats` still run.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            info!("Session cleanup timer disabled");
            return None;
        }

        let service = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = service.cleanup_expired();
                debug!(
                    "Cleanup sweep removed {} sessions, {} remain",
                    removed,
                    service.sessions.len()
                );
                if service.sessions.workflows().len() > service.sessions.len() {
                    warn!(
                        "Workflow cache holds {} entries for {} sessions",
                        service.sessions.workflows().len(),
                        service.sessions.len()
                    );
                }
            }
        }))
    }
}

impl From<SessionStats> for SessionStatsResponse {
    fn from(s: SessionStats) -> Self {
        Self {
            active_count: s.active_count,
            total_messages: s.total_messages,
            average_messages: s.average_messages,
            oldest_age_secs: s.oldest_age_secs,
            newest_age_secs: s.newest_age_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptsConfig;
    use crate::models::chat::Role;
    use crate::services::session::ManualClock;
    use crate::services::testing::{test_service, ScriptedProvider};

    #[tokio::test]
    async fn test_spain_then_joke_scenario() {
        let provider =
            Arc::new(ScriptedProvider::echo().answer("Spain", "The capital of Spain is Madrid."));
        let (service, _) = test_service(provider.clone());

        let id = service.create_session().session_id;

        let first = service
            .submit_query(&id, "What is the capital of Spain?")
            .await
            .unwrap();
        assert!(first.response.contains("Madrid"));
        assert_eq!(first.message_count, 2);

        let second = service.submit_query(&id, "Tell me a joke").await.unwrap();
        assert_eq!(second.response, PromptsConfig::default().default_response);
        assert_eq!(second.message_count, 4);

        let history = service.history(&id).unwrap();
        let flat: Vec<(Role, &str)> = history
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(flat.len(), 4);
        assert_eq!(flat[0], (Role::User, "What is the capital of Spain?"));
        assert_eq!(flat[1], (Role::Assistant, first.response.as_str()));
        assert_eq!(flat[2], (Role::User, "Tell me a joke"));
        assert_eq!(flat[3], (Role::Assistant, second.response.as_str()));

        // Only the domain answer hit the provider
        assert_eq!(provider.respond_calls(), 1);
        assert_eq!(provider.classify_calls(), 0);

        assert!(service.end_session(&id).success);
        assert_eq!(service.session_info(&id).unwrap_err().kind(), "NOT_FOUND");
        assert_eq!(
            service.submit_query(&id, "What is the capital of Peru?").await.unwrap_err().kind(),
            "NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_sequential_queries_keep_order() {
        let (service, _) = test_service(Arc::new(ScriptedProvider::echo()));
        let id = service.create_session().session_id;

        service.submit_query(&id, "capital of Chile?").await.unwrap();
        service.submit_query(&id, "capital of Peru?").await.unwrap();

        let history = service.history(&id).unwrap();
        let contents: Vec<&str> = history.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "capital of Chile?",
                "answer: capital of Chile?",
                "capital of Peru?",
                "answer: capital of Peru?",
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_on_one_session_never_interleave() {
        // Earlier queries answer slower, so completion order differs from
        // arrival order unless execution is serialized.
        let provider = Arc::new(ScriptedProvider::echo().with_delay(|query| {
            let n: u64 = query
                .trim_start_matches("capital of country ")
                .parse()
                .unwrap_or(0);
            Duration::from_millis(40u64.saturating_sub(n * 3))
        }));
        let (service, _) = test_service(provider);
        let id = service.create_session().session_id;

        const K: usize = 10;
        let handles: Vec<_> = (0..K)
            .map(|n| {
                let service = service.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    service
                        .submit_query(&id, &format!("capital of country {}", n))
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        let history = service.history(&id).unwrap();
        assert_eq!(history.message_count, 2 * K);
        for pair in history.messages.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[1].content, format!("answer: {}", pair[0].content));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sessions_do_not_block_each_other() {
        let provider = Arc::new(ScriptedProvider::echo().with_delay(|query| {
            if query.contains("slow") {
                Duration::from_millis(500)
            } else {
                Duration::ZERO
            }
        }));
        let (service, _) = test_service(provider);
        let slow = service.create_session().session_id;
        let fast = service.create_session().session_id;

        let slow_task = {
            let service = service.clone();
            tokio::spawn(async move { service.submit_query(&slow, "slow capital question").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        service.submit_query(&fast, "capital of Peru?").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));

        slow_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_history_untouched() {
        let provider = Arc::new(ScriptedProvider::echo());
        let (service, _) = test_service(provider.clone());
        let id = service.create_session().session_id;

        service.submit_query(&id, "capital of Chile?").await.unwrap();
        let before = service.history(&id).unwrap();

        provider.arm_failures(1);
        let err = service.submit_query(&id, "capital of Peru?").await.unwrap_err();
        assert_eq!(err.kind(), "PROVIDER_ERROR");
        assert!(err.is_retryable());

        let unchanged = service.history(&id).unwrap();
        assert_eq!(unchanged.message_count, before.message_count);

        let retry = service.submit_query(&id, "capital of Peru?").await.unwrap();
        assert_eq!(retry.message_count, before.message_count + 2);

        let after = service.history(&id).unwrap();
        assert_eq!(after.messages[0].content, "capital of Chile?");
        assert_eq!(after.messages[2].content, "capital of Peru?");
        assert_eq!(after.messages[3].content, "answer: capital of Peru?");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_query_on_ended_session_drops_workflow() {
        let provider = Arc::new(
            ScriptedProvider::echo().with_delay(|_| Duration::from_millis(300)),
        );
        let (service, _) = test_service(provider.clone());
        let id = service.create_session().session_id;

        provider.arm_failures(1);
        let running = {
            let service = service.clone();
            let id = id.clone();
            tokio::spawn(async move { service.submit_query(&id, "capital of Peru?").await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.end_session(&id).success);
        // Rebuilt behind the ended session while the provider is answering
        service.sessions().workflows().get_or_create(&id);
        assert!(service.sessions().workflows().contains(&id));

        let err = running.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "PROVIDER_ERROR");
        assert!(!service.sessions().workflows().contains(&id));
        assert_eq!(service.stats().cached_workflows, 0);
    }

    #[tokio::test]
    async fn test_timeout_leaves_session_and_workflow_reusable() {
        let provider = Arc::new(ScriptedProvider::echo().with_delay(|query| {
            if query.contains("slow") {
                Duration::from_secs(5)
            } else {
                Duration::ZERO
            }
        }));
        let (service, _) = test_service(provider);
        let id = service.create_session().session_id;

        let err = service
            .submit_query(&id, "slow capital question")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PROVIDER_TIMEOUT");
        assert_eq!(service.session_info(&id).unwrap().message_count, 0);

        let ok = service.submit_query(&id, "capital of Peru?").await.unwrap();
        assert_eq!(ok.message_count, 2);
        assert_eq!(service.sessions().workflows().build_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_swept_by_stats() {
        let clock = Arc::new(ManualClock::default());
        let (service, _) = crate::services::testing::test_service_with_clock(
            Arc::new(ScriptedProvider::echo()),
            clock.clone(),
        );
        let id = service.create_session().session_id;
        service.submit_query(&id, "capital of Chile?").await.unwrap();
        assert_eq!(service.stats().cached_workflows, 1);

        clock.advance(Duration::from_secs(31 * 60));
        let stats = service.stats();
        assert_eq!(stats.sessions.active_count, 0);
        assert_eq!(stats.expired_removed, 1);
        assert_eq!(stats.cached_workflows, 0);
        assert_eq!(
            service.submit_query(&id, "capital of Peru?").await.unwrap_err().kind(),
            "NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_end_session_is_idempotent() {
        let (service, _) = test_service(Arc::new(ScriptedProvider::echo()));
        let id = service.create_session().session_id;

        let first = service.end_session(&id);
        let second = service.end_session(&id);
        assert!(first.success && second.success);
        assert_ne!(first.message, second.message);
    }

    #[tokio::test]
    async fn test_health_reports_provider_reachability() {
        let (service, _) = test_service(Arc::new(ScriptedProvider::echo()));
        service.create_session();
        let health = service.health().await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.active_sessions, 1);

        let (service, _) = test_service(Arc::new(ScriptedProvider::echo().unreachable()));
        let health = service.health().await;
        assert_eq!(health.status, "degraded");
        assert!(!health.provider_reachable);
    }

    #[tokio::test]
    async fn test_cleanup_task_sweeps_on_interval() {
        let clock = Arc::new(ManualClock::default());
        let (service, _) = crate::services::testing::test_service_with_clock(
            Arc::new(ScriptedProvider::echo()),
            clock.clone(),
        );
        service.create_session();
        clock.advance(Duration::from_secs(31 * 60));

        let handle = service.spawn_cleanup_task(Duration::from_millis(20)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(service.sessions().len(), 0);
        handle.abort();

        assert!(service.spawn_cleanup_task(Duration::ZERO).is_none());
    }
}
