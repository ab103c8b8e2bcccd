use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DefaultResponseMode, PromptsConfig};
use crate::models::chat::{ChatMessage, SessionId};
use crate::services::classifier::Classifier;
use crate::services::provider::LanguageModelProvider;
use crate::services::session::Clock;
use crate::utils::error::ApiError;
use crate::utils::limiters::ProviderLimiter;

use super::state::{route_after_classify, Node, WorkflowOutcome, WorkflowState};

/// Session-independent part of the workflow: prompts plus the collaborators
/// every node needs. Shared by all compiled instances.
pub struct WorkflowDefinition {
    domain_system_prompt: String,
    redirect_system_prompt: String,
    default_response: String,
    default_mode: DefaultResponseMode,
    classifier: Arc<Classifier>,
    provider: Arc<dyn LanguageModelProvider>,
    limiter: ProviderLimiter,
    clock: Arc<dyn Clock>,
}

impl WorkflowDefinition {
    pub fn new(
        prompts: &PromptsConfig,
        classifier: Arc<Classifier>,
        provider: Arc<dyn LanguageModelProvider>,
        limiter: ProviderLimiter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            domain_system_prompt: prompts.domain_system_prompt.clone(),
            redirect_system_prompt: prompts.redirect_system_prompt.clone(),
            default_response: prompts.default_response.clone(),
            default_mode: prompts.default_response_mode,
            classifier,
            provider,
            limiter,
            clock,
        }
    }

    /// Bind the definition to one session.
    pub fn compile(self: &Arc<Self>, session_id: SessionId) -> CompiledWorkflow {
        CompiledWorkflow {
            session_id,
            definition: Arc::clone(self),
            runs: AtomicU64::new(0),
        }
    }
}

/// Reusable, session-bound workflow instance.
///
/// Holds no per-run state: a failed or timed-out run leaves it ready for the
/// next query.
pub struct CompiledWorkflow {
    session_id: SessionId,
    definition: Arc<WorkflowDefinition>,
    runs: AtomicU64,
}

impl CompiledWorkflow {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Execute Start → SessionInit → Classify → {Domain|Default}Response → End.
    /// Pure with respect to session storage: the caller commits the outcome.
    pub async fn run(&self, history: &[ChatMessage], query: &str) -> Result<WorkflowOutcome, ApiError> {
        let started = Instant::now();
        let run_no = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let asked_at = self.definition.clock.now();

        let mut state = WorkflowState::new(self.session_id.clone());
        let mut node = Node::Start;

        while node != Node::End {
            let next = match self.step(node, &mut state, history, query).await {
                Ok(next) => next,
                Err(e) => {
                    warn!(
                        "Workflow run #{} for session {} failed in {}: {}",
                        run_no,
                        self.session_id,
                        node.as_str(),
                        e
                    );
                    return Err(e);
                }
            };
            debug!(
                "Session {} run #{}: {} -> {}",
                self.session_id,
                run_no,
                node.as_str(),
                next.as_str()
            );
            node = next;
        }

        let answered_at = self.definition.clock.now();
        let exchange = [
            ChatMessage::user(state.pending_query.clone(), asked_at),
            ChatMessage::assistant(state.response_text.clone().unwrap_or_default(), answered_at),
        ];
        let outcome = WorkflowOutcome::from_state(state, exchange)?;

        info!(
            "Session {} run #{} answered via {:?}/{:?} in {:?}",
            self.session_id,
            run_no,
            outcome.classification.route,
            outcome.classification.source,
            started.elapsed()
        );
        Ok(outcome)
    }

    async fn step(
        &self,
        node: Node,
        state: &mut WorkflowState,
        history: &[ChatMessage],
        query: &str,
    ) -> Result<Node, ApiError> {
        let def = &self.definition;

        match node {
            Node::Start => Ok(Node::SessionInit),

            Node::SessionInit => {
                state.reconstructed_history = history.to_vec();
                state.pending_query = query.to_string();
                Ok(Node::Classify)
            }

            Node::Classify => {
                let classification = def.classifier.classify(&state.pending_query).await?;
                let next = route_after_classify(&classification);
                state.classification = Some(classification);
                Ok(next)
            }

            Node::DomainResponse => {
                let text = def
                    .limiter
                    .run(
                        "respond",
                        def.provider.respond(
                            &def.domain_system_prompt,
                            &state.reconstructed_history,
                            &state.pending_query,
                        ),
                    )
                    .await?;
                state.response_text = Some(text);
                Ok(Node::End)
            }

            Node::DefaultResponse => {
                let text = match def.default_mode {
                    DefaultResponseMode::Template => def.default_response.clone(),
                    DefaultResponseMode::Provider => {
                        def.limiter
                            .run(
                                "redirect",
                                def.provider.respond(
                                    &def.redirect_system_prompt,
                                    &state.reconstructed_history,
                                    &state.pending_query,
                                ),
                            )
                            .await?
                    }
                };
                state.response_text = Some(text);
                Ok(Node::End)
            }

            Node::End => Ok(Node::End),
        }
    }
}
