// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Priority-ordered LLM fallback.
//!
//! Providers are tried strictly one after another. After a failure the
//! failing provider's `fallback_triggers` decide whether the next provider
//! is tried: an empty list always falls back, otherwise the error message
//! must contain one of the triggers (case-insensitive).

use ner_core::NerError;
use ner_core::types::{ChatMessage, TextCompletion, TextParams};
use ner_registry::LlmEntry;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("no LLM providers available")]
    NoProviders,

    #[error("all LLM providers failed (last error: {last})")]
    Exhausted { last: NerError },

    /// A provider failed with an error its triggers do not cover.
    #[error(transparent)]
    Aborted(NerError),
}

/// The winning completion and which provider produced it.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub provider: String,
    pub completion: TextCompletion,
    pub attempts: usize,
}

/// Decides whether `err` allows moving on to the next provider.
pub fn should_fallback(err: &NerError, triggers: &[String]) -> bool {
    let triggers: Vec<String> = triggers
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if triggers.is_empty() {
        return true;
    }
    let message = err.to_string().to_lowercase();
    triggers.iter().any(|t| message.contains(t))
}

/// Runs `messages` through the LLM providers in registry order.
pub async fn generate_with_fallback(
    providers: &[LlmEntry],
    messages: &[ChatMessage],
    temperature: f32,
    max_tokens: u32,
) -> Result<FallbackOutcome, FallbackError> {
    let mut last_error = None;

    for (attempt, entry) in providers.iter().enumerate() {
        let params = TextParams {
            model: entry.record.model.clone(),
            temperature,
            max_tokens,
        };
        debug!(provider = %entry.record.slug, attempt, "requesting prompt variations");

        match entry.client.generate(messages, &params).await {
            Ok(completion) => {
                info!(
                    provider = %entry.record.slug,
                    tokens = completion.tokens_used,
                    "LLM provider succeeded"
                );
                return Ok(FallbackOutcome {
                    provider: entry.record.slug.clone(),
                    completion,
                    attempts: attempt + 1,
                });
            }
            Err(err) => {
                if !should_fallback(&err, &entry.record.settings.fallback_triggers) {
                    warn!(
                        provider = %entry.record.slug,
                        error = %err,
                        "LLM provider failed, error does not allow fallback"
                    );
                    return Err(FallbackError::Aborted(err));
                }
                warn!(
                    provider = %entry.record.slug,
                    error = %err,
                    "LLM provider failed, trying next"
                );
                last_error = Some(err);
            }
        }
    }

    match last_error {
        Some(last) => Err(FallbackError::Exhausted { last }),
        None => Err(FallbackError::NoProviders),
    }
}
