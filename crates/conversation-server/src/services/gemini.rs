use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::services::provider::{DomainVerdict, LanguageModelProvider};
use crate::utils::error::ApiError;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Gemini through its OpenAI-compatible endpoint
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: String,
}

// Minimal OpenAI-compatible request
#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize, Debug, PartialEq)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

impl GeminiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, ApiError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ApiError::Configuration("GEMINI_API_KEY is required".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ApiError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        })
    }

    async fn chat(&self, messages: Vec<OpenAiMessage<'_>>, temperature: f32) -> Result<String, ApiError> {
        debug!("Gemini chat completion with {} messages", messages.len());

        let request = OpenAiChatRequest {
            model: &self.model,
            messages,
            temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::ProviderError(format!(
                "Gemini API Error ({}): {}",
                status, text
            )));
        }

        let body: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ProviderError(format!("Failed to parse Gemini response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ApiError::ProviderError("Gemini returned an empty completion".to_string()))
    }
}

#[async_trait]
impl LanguageModelProvider for GeminiProvider {
    async fn classify(&self, query: &str) -> Result<DomainVerdict, ApiError> {
        let prompt = classification_prompt(query);
        let messages = vec![OpenAiMessage {
            role: "user",
            content: &prompt,
        }];

        let answer = self.chat(messages, 0.0).await?;
        parse_classification(&answer)
    }

    async fn respond(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        query: &str,
    ) -> Result<String, ApiError> {
        let messages = build_messages(system_prompt, history, query);
        self.chat(messages, self.temperature).await
    }

    async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("Gemini health check returned {}", resp.status());
                false
            }
            Err(e) => {
                warn!("Gemini health check failed: {}", e);
                false
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::ProviderTimeout(format!("Gemini request timed out: {}", e))
    } else {
        ApiError::ProviderError(format!("Gemini Network Error: {}", e))
    }
}

fn classification_prompt(query: &str) -> String {
    format!(
        r#"You are a question classifier. Determine if this question is about geography (specifically country capitals, cities, or countries) or something else.

Question: "{}"

Answer with exactly one word: "geography" or "other"

Examples:
- "What's the capital of France?" -> geography
- "Tell me about Paris" -> geography
- "What's 2+2?" -> other
- "How are you?" -> other
- "What's the main city of Germany?" -> geography"#,
        query
    )
}

/// Anything but the two expected words is a provider error, never a guess.
fn parse_classification(answer: &str) -> Result<DomainVerdict, ApiError> {
    let normalized = answer
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();

    match normalized.as_str() {
        "geography" => Ok(DomainVerdict {
            in_domain: true,
            confidence: 1.0,
        }),
        "other" => Ok(DomainVerdict {
            in_domain: false,
            confidence: 1.0,
        }),
        _ => Err(ApiError::ProviderError(format!(
            "unexpected classification answer: {:?}",
            answer.chars().take(50).collect::<String>()
        ))),
    }
}

fn build_messages<'a>(
    system_prompt: &'a str,
    history: &'a [ChatMessage],
    query: &'a str,
) -> Vec<OpenAiMessage<'a>> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(OpenAiMessage {
        role: "system",
        content: system_prompt,
    });
    messages.extend(history.iter().map(|m| OpenAiMessage {
        role: m.role.as_str(),
        content: &m.content,
    }));
    messages.push(OpenAiMessage {
        role: "user",
        content: query,
    });
    messages
}
