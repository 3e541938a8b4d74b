// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Gemini `generateContent` endpoint.
//!
//! Authentication is an API key query parameter. Transient errors (429, 500,
//! 502, 503) are retried with linear backoff.

use std::time::Duration;

use ner_core::NerError;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::types::{ApiErrorResponse, GenerateContentRequest, GenerateContentResponse};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    provider: String,
    api_key: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("provider", &self.provider)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(
        provider: &str,
        api_key: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, NerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NerError::Provider {
                provider: provider.to_string(),
                message: format!("failed to build HTTP client: {e}"),
                body: None,
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            provider: provider.to_string(),
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
            max_retries,
            retry_backoff: Duration::from_secs(1),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, NerError> {
        let path = format!("/v1beta/models/{model}:generateContent");
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_backoff * attempt;
                warn!(provider = %self.provider, attempt, ?delay, "retrying Gemini request");
                tokio::time::sleep(delay).await;
            }

            let sent = self
                .client
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
                .json(request)
                .send()
                .await;
            let response = match sent {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    last_error = Some(NerError::Timeout {
                        duration: self.timeout,
                    });
                    continue;
                }
                Err(e) => {
                    // reqwest errors embed the URL, which carries the key.
                    return Err(NerError::provider(
                        &self.provider,
                        format!("HTTP request failed: {}", e.without_url()),
                    ));
                }
            };

            let status = response.status();
            debug!(provider = %self.provider, %path, %status, attempt, "Gemini response received");
            let text = response.text().await.unwrap_or_default();

            if status.is_success() {
                return serde_json::from_str(&text).map_err(|e| NerError::Provider {
                    provider: self.provider.clone(),
                    message: format!("failed to parse Gemini response: {e}"),
                    body: Some(text),
                    source: Some(Box::new(e)),
                });
            }

            let message = match serde_json::from_str::<ApiErrorResponse>(&text) {
                Ok(api) => format!("Gemini API error {status} ({}): {}", api.error.status, api.error.message),
                Err(_) => format!("API returned {status}: {text}"),
            };
            let err = NerError::Provider {
                provider: self.provider.clone(),
                message,
                body: Some(text),
                source: None,
            };
            if !is_transient(status) {
                return Err(err);
            }
            last_error = Some(err);
        }

        Err(last_error.unwrap_or_else(|| {
            NerError::provider(&self.provider, "request failed after retries")
        }))
    }

    /// Lists models as a cheap authenticated reachability probe.
    pub async fn probe(&self) -> Result<StatusCode, reqwest::Error> {
        let url = format!("{}/v1beta/models", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| e.without_url())?;
        Ok(response.status())
    }
}

fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503)
}
