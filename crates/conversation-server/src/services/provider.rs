use async_trait::async_trait;

use crate::models::chat::ChatMessage;
use crate::utils::error::ApiError;

/// Provider's answer to "is this query in the supported domain?"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainVerdict {
    pub in_domain: bool,
    pub confidence: f32,
}

/// Narrow interface to the remote language model.
///
/// The provider is stateless: every `respond` call carries the full history.
/// Either call may fail with `ProviderError` or `ProviderTimeout`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    async fn classify(&self, query: &str) -> Result<DomainVerdict, ApiError>;

    async fn respond(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        query: &str,
    ) -> Result<String, ApiError>;

    /// Cheap reachability probe for health reporting
    async fn health_check(&self) -> bool;
}
