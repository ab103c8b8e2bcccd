//! In-crate test doubles and stack builders

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClassifierConfig, PromptsConfig};
use crate::models::chat::ChatMessage;
use crate::services::classifier::Classifier;
use crate::services::conversation_service::ConversationService;
use crate::services::provider::{DomainVerdict, LanguageModelProvider};
use crate::services::session::{Clock, SessionManager, SystemClock};
use crate::services::workflow::{WorkflowCache, WorkflowDefinition};
use crate::utils::error::ApiError;
use crate::utils::limiters::ProviderLimiter;

pub(crate) const TEST_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

type DelayFn = Box<dyn Fn(&str) -> Duration + Send + Sync>;

/// Deterministic provider: answers `"answer: {query}"` unless a canned
/// answer matches, with optional per-query latency and armed failures.
pub(crate) struct ScriptedProvider {
    answers: Vec<(String, String)>,
    delay: Option<DelayFn>,
    failures: AtomicUsize,
    reachable: bool,
    classify_calls: AtomicUsize,
    respond_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn echo() -> Self {
        Self {
            answers: Vec::new(),
            delay: None,
            failures: AtomicUsize::new(0),
            reachable: true,
            classify_calls: AtomicUsize::new(0),
            respond_calls: AtomicUsize::new(0),
        }
    }

    /// Queries containing `needle` get `answer`
    pub fn answer(mut self, needle: &str, answer: &str) -> Self {
        self.answers.push((needle.to_string(), answer.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// The next `n` provider calls fail with `ProviderError`
    pub fn arm_failures(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn respond_calls(&self) -> usize {
        self.respond_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<(), ApiError> {
        match self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(_) => Err(ApiError::ProviderError("scripted failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    async fn pause(&self, query: &str) {
        if let Some(delay) = &self.delay {
            let d = delay(query);
            if !d.is_zero() {
                tokio::time::sleep(d).await;
            }
        }
    }
}

#[async_trait]
impl LanguageModelProvider for ScriptedProvider {
    async fn classify(&self, query: &str) -> Result<DomainVerdict, ApiError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.pause(query).await;
        self.take_failure()?;
        Ok(DomainVerdict {
            in_domain: true,
            confidence: 0.5,
        })
    }

    async fn respond(
        &self,
        _system_prompt: &str,
        _history: &[ChatMessage],
        query: &str,
    ) -> Result<String, ApiError> {
        self.respond_calls.fetch_add(1, Ordering::SeqCst);
        self.pause(query).await;
        self.take_failure()?;

        let canned = self
            .answers
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, answer)| answer.clone());
        Ok(canned.unwrap_or_else(|| format!("answer: {}", query)))
    }

    async fn health_check(&self) -> bool {
        self.reachable
    }
}

pub(crate) fn test_limiter() -> ProviderLimiter {
    ProviderLimiter::new(8, Duration::from_secs(1), Duration::from_secs(1))
}

pub(crate) fn test_definition(provider: Arc<dyn LanguageModelProvider>) -> Arc<WorkflowDefinition> {
    test_definition_with_clock(provider, Arc::new(SystemClock))
}

pub(crate) fn test_definition_with_clock(
    provider: Arc<dyn LanguageModelProvider>,
    clock: Arc<dyn Clock>,
) -> Arc<WorkflowDefinition> {
    let limiter = test_limiter();
    let classifier = Arc::new(
        Classifier::new(&ClassifierConfig::default(), provider.clone(), limiter.clone())
            .expect("default classifier config is valid"),
    );
    Arc::new(WorkflowDefinition::new(
        &PromptsConfig::default(),
        classifier,
        provider,
        limiter,
        clock,
    ))
}

pub(crate) fn test_service(
    provider: Arc<dyn LanguageModelProvider>,
) -> (Arc<ConversationService>, Arc<SessionManager>) {
    test_service_with_clock(provider, Arc::new(SystemClock))
}

/// Full stack minus HTTP, wired the way `main` wires it
pub(crate) fn test_service_with_clock(
    provider: Arc<dyn LanguageModelProvider>,
    clock: Arc<dyn Clock>,
) -> (Arc<ConversationService>, Arc<SessionManager>) {
    let workflows = Arc::new(WorkflowCache::new(test_definition_with_clock(
        provider.clone(),
        clock.clone(),
    )));
    let sessions = Arc::new(SessionManager::new(TEST_SESSION_TIMEOUT, clock, workflows));
    let service = Arc::new(ConversationService::new(
        sessions.clone(),
        provider,
        test_limiter(),
    ));
    (service, sessions)
}
