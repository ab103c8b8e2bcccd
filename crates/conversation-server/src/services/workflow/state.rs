use crate::models::chat::{ChatMessage, SessionId};
use crate::services::classifier::{ClassificationResult, Route};
use crate::utils::error::ApiError;

/// Nodes of the per-query state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Start,
    SessionInit,
    Classify,
    DomainResponse,
    DefaultResponse,
    End,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Start => "start",
            Node::SessionInit => "session_init",
            Node::Classify => "classify",
            Node::DomainResponse => "domain_response",
            Node::DefaultResponse => "default_response",
            Node::End => "end",
        }
    }
}

/// Conditional edge out of `Classify`: depends on the route and nothing else
pub fn route_after_classify(classification: &ClassificationResult) -> Node {
    match classification.route {
        Route::InDomain => Node::DomainResponse,
        Route::OutOfDomain => Node::DefaultResponse,
    }
}

/// Ephemeral state of one query execution
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub session_id: SessionId,
    pub reconstructed_history: Vec<ChatMessage>,
    pub pending_query: String,
    pub classification: Option<ClassificationResult>,
    pub response_text: Option<String>,
}

impl WorkflowState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            reconstructed_history: Vec::new(),
            pending_query: String::new(),
            classification: None,
            response_text: None,
        }
    }
}

/// What `End` hands back to the caller. Nothing here is committed yet.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub response: String,
    pub classification: ClassificationResult,
    /// The user/assistant pair this query adds
    pub exchange: [ChatMessage; 2],
    /// Prior history followed by `exchange`
    pub updated_history: Vec<ChatMessage>,
    /// History length the exchange was computed against
    pub base_len: usize,
}

impl WorkflowOutcome {
    pub(crate) fn from_state(
        state: WorkflowState,
        exchange: [ChatMessage; 2],
    ) -> Result<Self, ApiError> {
        let classification = state.classification.ok_or_else(|| {
            ApiError::Internal(format!(
                "workflow for session {} reached end without classification",
                state.session_id
            ))
        })?;
        let response = state.response_text.ok_or_else(|| {
            ApiError::Internal(format!(
                "workflow for session {} reached end without response",
                state.session_id
            ))
        })?;

        let base_len = state.reconstructed_history.len();
        let mut updated_history = state.reconstructed_history;
        updated_history.extend(exchange.iter().cloned());

        Ok(Self {
            response,
            classification,
            exchange,
            updated_history,
            base_len,
        })
    }
}
