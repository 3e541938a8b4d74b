// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI vision adapter.
//!
//! Asks a multimodal chat model for a JSON object describing a reference
//! image. A reply that is not the expected JSON is kept as a free-form
//! description rather than failing the job.

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use ner_config::model::ProviderConfig;
use ner_core::NerError;
use ner_core::traits::{ProviderAdapter, VisionProvider};
use ner_core::types::{HealthStatus, VisionAnalysis};
use tracing::{debug, info, warn};

use crate::client::OpenAiClient;
use crate::types::{
    AnalysisPayload, ChatCompletionRequest, ContentPart, ImageUrl, MessageContent,
    RequestMessage, ResponseFormat,
};

pub const DEFAULT_MODEL: &str = "gpt-4o";
const API_KEY_ENV: &str = "OPENAI_API_KEY";
const FALLBACK_STYLE_NOTES: &str = "Style derived from reference image";

const ANALYSIS_PROMPT: &str = "You are a professional creative director analyzing reference \
images for an AI image generation platform.

Analyze the provided image and describe:
1. Overall visual style (artistic style, mood, atmosphere)
2. Color palette and lighting
3. Composition and framing
4. Key visual elements that should be preserved

Format your response as JSON with these fields:
{
  \"description\": \"detailed description of what's in the image\",
  \"style_notes\": \"key style characteristics to apply to generated images\"
}";

pub struct OpenAiVisionProvider {
    slug: String,
    model: String,
    client: OpenAiClient,
}

impl OpenAiVisionProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, NerError> {
        let api_key = match config.api_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => std::env::var(API_KEY_ENV).map_err(|_| {
                NerError::Config(format!(
                    "OpenAI API key not found: set api_key in the provider entry or {API_KEY_ENV}"
                ))
            })?,
        };
        let mut client = OpenAiClient::new(
            &config.slug,
            &api_key,
            Duration::from_millis(config.effective_timeout_ms()),
            config.max_retries,
        )?;
        if let Some(url) = &config.base_url {
            client = client.with_base_url(url.as_str());
        }
        info!(slug = %config.slug, model = %config.model, "OpenAI vision provider initialized");
        Ok(Self::with_client(&config.slug, &config.model, client))
    }

    pub fn with_client(slug: &str, model: &str, client: OpenAiClient) -> Self {
        let model = if model.is_empty() { DEFAULT_MODEL } else { model };
        Self {
            slug: slug.to_string(),
            model: model.to_string(),
            client,
        }
    }

    fn request(&self, image_url: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                RequestMessage {
                    role: "system",
                    content: MessageContent::Text(ANALYSIS_PROMPT.to_string()),
                },
                RequestMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: "Analyze this reference image for style direction:".to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: image_url.to_string(),
                            },
                        },
                    ]),
                },
            ],
            max_tokens: 1000,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        }
    }
}

/// Reads the model's JSON answer, or keeps the raw text as the description.
fn parse_analysis(content: String) -> VisionAnalysis {
    match serde_json::from_str::<AnalysisPayload>(&content) {
        Ok(payload) => VisionAnalysis {
            description: payload.description,
            style_notes: payload.style_notes,
        },
        Err(e) => {
            warn!(error = %e, "vision reply was not the expected JSON, using raw text");
            VisionAnalysis {
                description: content,
                style_notes: FALLBACK_STYLE_NOTES.to_string(),
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiVisionProvider {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn health_check(&self) -> Result<HealthStatus, NerError> {
        match self.client.probe().await {
            Ok(status) if status.is_success() => Ok(HealthStatus::Healthy),
            Ok(status) => Ok(HealthStatus::Degraded(format!("OpenAI answered {status}"))),
            Err(e) => Ok(HealthStatus::Unhealthy(format!("OpenAI unreachable: {e}"))),
        }
    }
}

#[async_trait]
impl VisionProvider for OpenAiVisionProvider {
    async fn analyze(&self, image_url: &str) -> Result<VisionAnalysis, NerError> {
        debug!(slug = %self.slug, model = %self.model, "analyzing reference image");
        let response = self.client.complete(&self.request(image_url)).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| NerError::EmptyResponse {
                provider: self.slug.clone(),
            })?;
        Ok(parse_analysis(content))
    }
}
