use anyhow::Result;
use config::{Config, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::error::ApiError;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_minutes: u64,
    /// 0 disables the background sweep
    pub cleanup_interval_seconds: u64,
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            cleanup_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub max_concurrency: usize,
    pub acquire_timeout_ms: u64,
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.0-flash-exp".to_string(),
            temperature: 0.7,
            timeout_seconds: 30,
            max_concurrency: 16,
            acquire_timeout_ms: 5000,
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Whole-word keywords that mark a query as in-domain
    pub domain_keywords: Vec<String>,
    /// Regexes (case-insensitive) that mark a query as clearly off-topic
    pub off_topic_patterns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            domain_keywords: [
                "capital", "capitals", "city", "country", "countries", "nation", "nations",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            off_topic_patterns: [
                r"\b(joke|jokes|riddle|riddles|poem|poems|song|songs|story|stories|limerick)\b",
                r"^\s*(hi|hello|hey|good (morning|afternoon|evening))\b[\s!.?]*$",
                r"^\s*how are you\b",
                r"^\s*(thanks|thank you)\b",
                r"^\s*(what is|what's|calculate)\s+[\d\s.+\-*/x()]+\??\s*$",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DefaultResponseMode {
    /// Fixed redirection text, no provider call
    Template,
    /// Provider call with the redirect prompt
    Provider,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    pub domain_system_prompt: String,
    pub redirect_system_prompt: String,
    pub default_response: String,
    pub default_response_mode: DefaultResponseMode,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            domain_system_prompt: "You are a geography expert focused specifically on country capitals.\n\
                Provide accurate, concise answers about country capitals, capital cities, and related geographic information.\n\
                If asked about anything not related to country capitals, politely redirect to that topic."
                .to_string(),
            redirect_system_prompt: "You only answer questions about country capitals.\n\
                The user asked about something else. In one or two friendly sentences, say so and invite them to ask about a country's capital city."
                .to_string(),
            default_response: "I can only help with country capitals. Please ask about a country's capital city."
                .to_string(),
            default_response_mode: DefaultResponseMode::Template,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Daily-rotated file sink, disabled when unset
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            directory: None,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            // Example: APP_SESSION__TIMEOUT_MINUTES=10
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("llm.api_key", std::env::var("GEMINI_API_KEY").ok())?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the server must not start with.
    pub fn validate(&self) -> Result<(), ApiError> {
        let api_key_missing = self
            .llm
            .api_key
            .as_deref()
            .map(|k| k.trim().is_empty())
            .unwrap_or(true);
        if api_key_missing {
            return Err(ApiError::Configuration(
                "GEMINI_API_KEY (or APP_LLM__API_KEY) is required".to_string(),
            ));
        }
        if self.session.timeout_minutes == 0 {
            return Err(ApiError::Configuration(
                "session.timeout_minutes must be greater than 0".to_string(),
            ));
        }
        if self.llm.timeout_seconds == 0 {
            return Err(ApiError::Configuration(
                "llm.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.llm.max_concurrency == 0 {
            return Err(ApiError::Configuration(
                "llm.max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.classifier.domain_keywords.is_empty() {
            return Err(ApiError::Configuration(
                "classifier.domain_keywords must not be empty".to_string(),
            ));
        }
        if self.classifier.domain_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ApiError::Configuration(
                "classifier.domain_keywords must not contain blank entries".to_string(),
            ));
        }
        for pattern in &self.classifier.off_topic_patterns {
            Regex::new(pattern).map_err(|e| {
                ApiError::Configuration(format!("invalid off-topic pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}
