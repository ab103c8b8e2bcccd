pub mod classifier;
pub mod conversation_service;
pub mod gemini;
pub mod provider;
pub mod session;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::Classifier;
pub use conversation_service::ConversationService;
pub use gemini::GeminiProvider;
pub use provider::LanguageModelProvider;
pub use session::{Clock, SessionManager, SystemClock};
pub use workflow::{WorkflowCache, WorkflowDefinition};
