// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Google Gemini adapter implementing [`TextGenerationProvider`].
//!
//! Gemini has no system role: system messages are merged into the request's
//! `systemInstruction`, and the assistant role is sent as `model`.

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use ner_config::model::ProviderConfig;
use ner_core::NerError;
use ner_core::traits::{ProviderAdapter, TextGenerationProvider};
use ner_core::types::{ChatMessage, HealthStatus, MessageRole, TextCompletion, TextParams};
use tracing::{debug, info};

use crate::client::GeminiClient;
use crate::types::{Content, GenerateContentRequest, GenerationConfig, Part};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub struct GeminiProvider {
    slug: String,
    model: String,
    client: GeminiClient,
}

impl GeminiProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, NerError> {
        let api_key = match config.api_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => std::env::var(API_KEY_ENV).map_err(|_| {
                NerError::Config(format!(
                    "Gemini API key not found: set api_key in the provider entry or {API_KEY_ENV}"
                ))
            })?,
        };
        let mut client = GeminiClient::new(
            &config.slug,
            &api_key,
            Duration::from_millis(config.effective_timeout_ms()),
            config.max_retries,
        )?;
        if let Some(url) = &config.base_url {
            client = client.with_base_url(url.as_str());
        }
        info!(slug = %config.slug, model = %config.model, "Gemini provider initialized");
        Ok(Self::with_client(&config.slug, &config.model, client))
    }

    pub fn with_client(slug: &str, model: &str, client: GeminiClient) -> Self {
        let model = if model.is_empty() { DEFAULT_MODEL } else { model };
        Self {
            slug: slug.to_string(),
            model: model.to_string(),
            client,
        }
    }
}

/// Converts chat messages into Gemini contents plus a system instruction.
fn to_request(messages: &[ChatMessage], params: &TextParams) -> GenerateContentRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for message in messages {
        let role = match message.role {
            MessageRole::System => {
                system_parts.push(Part {
                    text: message.content.clone(),
                });
                continue;
            }
            MessageRole::User => "user",
            MessageRole::Assistant => "model",
        };
        contents.push(Content {
            role: Some(role.to_string()),
            parts: vec![Part {
                text: message.content.clone(),
            }],
        });
    }

    GenerateContentRequest {
        contents,
        system_instruction: (!system_parts.is_empty()).then(|| Content {
            role: None,
            parts: system_parts,
        }),
        generation_config: GenerationConfig {
            temperature: params.temperature,
            max_output_tokens: params.max_tokens,
        },
    }
}

#[async_trait]
impl ProviderAdapter for GeminiProvider {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn health_check(&self) -> Result<HealthStatus, NerError> {
        match self.client.probe().await {
            Ok(status) if status.is_success() => Ok(HealthStatus::Healthy),
            Ok(status) => Ok(HealthStatus::Degraded(format!("Gemini answered {status}"))),
            Err(e) => Ok(HealthStatus::Unhealthy(format!("Gemini unreachable: {e}"))),
        }
    }
}

#[async_trait]
impl TextGenerationProvider for GeminiProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &TextParams,
    ) -> Result<TextCompletion, NerError> {
        let model = if params.model.is_empty() {
            self.model.as_str()
        } else {
            params.model.as_str()
        };
        let request = to_request(messages, params);
        debug!(slug = %self.slug, model, contents = request.contents.len(), "sending generateContent");

        let response = self.client.generate_content(model, &request).await?;
        let tokens_used = response
            .usage_metadata
            .map(|u| u.total_token_count)
            .unwrap_or(0);
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| NerError::EmptyResponse {
                provider: self.slug.clone(),
            })?;
        let content: String = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect();

        Ok(TextCompletion {
            content,
            tokens_used,
            finish_reason: candidate.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> GeminiProvider {
        let client = GeminiClient::new("google-gemini", "g-key", Duration::from_secs(5), 1)
            .unwrap()
            .with_base_url(server.uri())
            .with_retry_backoff(Duration::ZERO);
        GeminiProvider::with_client("google-gemini", "", client)
    }

    fn params(model: &str) -> TextParams {
        TextParams {
            model: model.into(),
            temperature: 0.7,
            max_tokens: 512,
        }
    }

    #[test]
    fn system_goes_to_instruction_and_assistant_becomes_model() {
        let messages = vec![
            ChatMessage::system("rules"),
            ChatMessage::user("hello"),
            ChatMessage {
                role: MessageRole::Assistant,
                content: "hi".into(),
            },
        ];
        let request = to_request(&messages, &params("m"));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "rules");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"].as_array().unwrap().len(), 2);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn no_system_message_omits_instruction() {
        let request = to_request(&[ChatMessage::user("x")], &params("m"));
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[tokio::test]
    async fn generate_concatenates_parts_of_first_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "g-key"))
            .and(body_partial_json(serde_json::json!({
                "systemInstruction": {"parts": [{"text": "rules"}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "first "}, {"text": "second"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"totalTokenCount": 77}
            })))
            .mount(&server)
            .await;

        let out = provider(&server)
            .generate(
                &[ChatMessage::system("rules"), ChatMessage::user("go")],
                &params(""),
            )
            .await
            .unwrap();
        assert_eq!(out.content, "first second");
        assert_eq!(out.tokens_used, 77);
        assert_eq!(out.finish_reason.as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn zero_candidates_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(&[ChatMessage::user("go")], &params("gemini-pro"))
            .await
            .unwrap_err();
        assert!(matches!(err, NerError::EmptyResponse { ref provider } if provider == "google-gemini"));
    }

    #[tokio::test]
    async fn api_error_message_is_extracted_and_body_kept() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "error": {"code": 400, "status": "INVALID_ARGUMENT", "message": "API key not valid"}
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(&body))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(&[ChatMessage::user("go")], &params("m"))
            .await
            .unwrap_err();
        match err {
            NerError::Provider { message, body, .. } => {
                assert!(message.contains("INVALID_ARGUMENT"));
                assert!(message.contains("API key not valid"));
                assert!(body.unwrap().contains("API key not valid"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .expect(2)
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(&[ChatMessage::user("go")], &params("m"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
    }
}
