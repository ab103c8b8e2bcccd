//! Query Domain Classifier
//! Rule pass first (keywords / off-topic patterns, no I/O), provider
//! fallback only when the rules cannot decide.

use regex::{Regex, RegexBuilder, RegexSet, RegexSetBuilder};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ClassifierConfig;
use crate::services::provider::LanguageModelProvider;
use crate::utils::error::ApiError;
use crate::utils::limiters::ProviderLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    InDomain,
    OutOfDomain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    Rule,
    Provider,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub route: Route,
    pub source: ClassificationSource,
    pub confidence: Option<f32>,
}

/// Outcome of the rule pass alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVerdict {
    InDomain,
    OutOfDomain,
    Inconclusive,
}

pub struct Classifier {
    domain_keywords: Regex,
    off_topic: RegexSet,
    provider: Arc<dyn LanguageModelProvider>,
    limiter: ProviderLimiter,
}

impl Classifier {
    pub fn new(
        cfg: &ClassifierConfig,
        provider: Arc<dyn LanguageModelProvider>,
        limiter: ProviderLimiter,
    ) -> Result<Self, ApiError> {
        if cfg.domain_keywords.is_empty() {
            return Err(ApiError::Configuration(
                "classifier needs at least one domain keyword".to_string(),
            ));
        }
        if cfg.domain_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ApiError::Configuration(
                "domain keywords must not be blank".to_string(),
            ));
        }

        let alternation = cfg
            .domain_keywords
            .iter()
            .map(|k| regex::escape(k.trim()))
            .collect::<Vec<_>>()
            .join("|");

        let domain_keywords = RegexBuilder::new(&format!(r"\b(?:{})\b", alternation))
            .case_insensitive(true)
            .build()
            .map_err(|e| ApiError::Configuration(format!("invalid domain keywords: {}", e)))?;

        let off_topic = RegexSetBuilder::new(&cfg.off_topic_patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| ApiError::Configuration(format!("invalid off-topic patterns: {}", e)))?;

        info!(
            "Classifier ready: {} domain keywords, {} off-topic patterns",
            cfg.domain_keywords.len(),
            cfg.off_topic_patterns.len()
        );

        Ok(Self {
            domain_keywords,
            off_topic,
            provider,
            limiter,
        })
    }

    /// Deterministic rule pass. Conflicting signals are inconclusive.
    pub fn rule_verdict(&self, query: &str) -> RuleVerdict {
        let domain_hit = self.domain_keywords.is_match(query);
        let off_topic_hit = self.off_topic.is_match(query);

        match (domain_hit, off_topic_hit) {
            (true, false) => RuleVerdict::InDomain,
            (false, true) => RuleVerdict::OutOfDomain,
            _ => RuleVerdict::Inconclusive,
        }
    }

    pub async fn classify(&self, query: &str) -> Result<ClassificationResult, ApiError> {
        let preview: String = query.chars().take(30).collect();

        let route = match self.rule_verdict(query) {
            RuleVerdict::InDomain => Some(Route::InDomain),
            RuleVerdict::OutOfDomain => Some(Route::OutOfDomain),
            RuleVerdict::Inconclusive => None,
        };

        if let Some(route) = route {
            debug!("Rule classification: '{}' -> {:?}", preview, route);
            return Ok(ClassificationResult {
                route,
                source: ClassificationSource::Rule,
                confidence: None,
            });
        }

        let verdict = self
            .limiter
            .run("classify", self.provider.classify(query))
            .await
            .map_err(|e| {
                warn!("Provider classification failed for '{}': {}", preview, e);
                e
            })?;

        let route = if verdict.in_domain {
            Route::InDomain
        } else {
            Route::OutOfDomain
        };
        debug!(
            "Provider classification: '{}' -> {:?} (confidence {:.2})",
            preview, route, verdict.confidence
        );

        Ok(ClassificationResult {
            route,
            source: ClassificationSource::Provider,
            confidence: Some(verdict.confidence),
        })
    }
}
