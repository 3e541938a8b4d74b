// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Kie.ai adapter.
//!
//! One vendor account serves two capability sets: an OpenAI-compatible chat
//! proxy used for prompt engineering, and asynchronous image generation whose
//! results arrive through a webhook.

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use ner_config::model::ProviderConfig;
use ner_core::NerError;
use ner_core::traits::{ImageGenerationProvider, ProviderAdapter, TextGenerationProvider};
use ner_core::types::{
    CallbackOutcome, CallbackStatus, ChatMessage, HealthStatus, ImageParams, ImageSubmission,
    TextCompletion, TextParams,
};
use tracing::{debug, info};

use crate::client::KieAiClient;
use crate::types::{ApiMessage, CallbackPayload, ChatRequest, ChatResponse, ImageRequest, ImageResponse};

const API_KEY_ENV: &str = "KIEAI_API_KEY";

pub struct KieAiProvider {
    slug: String,
    client: KieAiClient,
}

impl KieAiProvider {
    /// Builds the adapter from a `[[providers]]` entry.
    ///
    /// The API key comes from the entry, else `KIEAI_API_KEY`.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, NerError> {
        let api_key = resolve_api_key(config.api_key.as_deref())?;
        let mut client = KieAiClient::new(
            &config.slug,
            &api_key,
            Duration::from_millis(config.effective_timeout_ms()),
            config.max_retries,
        )?;
        if let Some(url) = &config.base_url {
            client = client.with_base_url(url.as_str());
        }
        info!(slug = %config.slug, model = %config.model, category = %config.category, "Kie.ai provider initialized");
        Ok(Self::with_client(&config.slug, client))
    }

    pub fn with_client(slug: &str, client: KieAiClient) -> Self {
        Self {
            slug: slug.to_string(),
            client,
        }
    }
}

fn resolve_api_key(configured: Option<&str>) -> Result<String, NerError> {
    match configured {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => std::env::var(API_KEY_ENV).map_err(|_| {
            NerError::Config(format!(
                "Kie.ai API key not found: set api_key in the provider entry or {API_KEY_ENV}"
            ))
        }),
    }
}

/// Maps the vendor's status vocabulary onto completed/failed.
fn normalize_status(status: &str) -> Option<CallbackStatus> {
    match status.to_ascii_lowercase().as_str() {
        "success" | "succeeded" | "completed" => Some(CallbackStatus::Completed),
        "failed" | "fail" | "error" => Some(CallbackStatus::Failed),
        _ => None,
    }
}

#[async_trait]
impl ProviderAdapter for KieAiProvider {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn health_check(&self) -> Result<HealthStatus, NerError> {
        match self.client.probe().await {
            Ok(status) if status.is_server_error() => {
                Ok(HealthStatus::Degraded(format!("Kie.ai answered {status}")))
            }
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(format!("Kie.ai unreachable: {e}"))),
        }
    }
}

#[async_trait]
impl TextGenerationProvider for KieAiProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &TextParams,
    ) -> Result<TextCompletion, NerError> {
        let request = ChatRequest {
            model: &params.model,
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };
        debug!(slug = %self.slug, model = %params.model, messages = messages.len(), "sending chat completion");

        let response: ChatResponse = self.client.post_json("/v1/chat/completions", &request).await?;
        let tokens_used = response.usage.map(|u| u.total_tokens).unwrap_or(0);
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| NerError::EmptyResponse {
                provider: self.slug.clone(),
            })?;

        Ok(TextCompletion {
            content: choice.message.content,
            tokens_used,
            finish_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl ImageGenerationProvider for KieAiProvider {
    async fn submit(
        &self,
        prompt: &str,
        params: &ImageParams,
    ) -> Result<ImageSubmission, NerError> {
        let request = ImageRequest {
            model: &params.model,
            prompt,
            width: params.width,
            height: params.height,
            callback_url: &params.callback_url,
        };
        let response: ImageResponse = self
            .client
            .post_json("/v1/images/generations", &request)
            .await?;
        if response.task_id.is_empty() {
            return Err(NerError::provider(&self.slug, "image submission returned no task id"));
        }
        debug!(slug = %self.slug, task_id = %response.task_id, "image task submitted");
        Ok(ImageSubmission {
            task_id: response.task_id,
            status: response.status,
        })
    }

    fn parse_callback(&self, payload: &[u8]) -> Result<CallbackOutcome, NerError> {
        let raw: CallbackPayload = serde_json::from_slice(payload)
            .map_err(|e| NerError::Validation(format!("malformed Kie.ai callback: {e}")))?;
        if raw.task_id.is_empty() {
            return Err(NerError::Validation(
                "malformed Kie.ai callback: empty task_id".to_string(),
            ));
        }
        let status = normalize_status(&raw.status).ok_or_else(|| {
            NerError::Validation(format!(
                "malformed Kie.ai callback: unknown status {:?}",
                raw.status
            ))
        })?;

        Ok(CallbackOutcome {
            task_id: raw.task_id,
            status,
            image_url: raw.image_url.filter(|u| !u.is_empty()),
            error_code: raw.error_code.filter(|c| !c.is_empty()),
            error_message: raw.error_message.filter(|m| !m.is_empty()),
        })
    }
}
