// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Kie.ai API.
//!
//! Handles bearer authentication, per-provider timeouts, and retry of
//! transient failures (429, 500, 502, 503) with linear backoff.

use std::time::Duration;

use ner_core::NerError;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.kie.ai";

#[derive(Debug, Clone)]
pub struct KieAiClient {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl KieAiClient {
    pub fn new(
        provider: &str,
        api_key: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, NerError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| NerError::Config(format!("invalid API key header value: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
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

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POSTs `body` as JSON and decodes a response whose status is success.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, NerError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_backoff * attempt;
                warn!(provider = %self.provider, attempt, ?delay, "retrying Kie.ai request");
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.post(&url).json(body).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    last_error = Some(NerError::Timeout {
                        duration: self.timeout,
                    });
                    continue;
                }
                Err(e) => {
                    return Err(NerError::Provider {
                        provider: self.provider.clone(),
                        message: format!("HTTP request failed: {e}"),
                        body: None,
                        source: Some(Box::new(e)),
                    });
                }
            };

            let status = response.status();
            debug!(provider = %self.provider, %url, %status, attempt, "Kie.ai response received");
            let text = response.text().await.unwrap_or_default();

            if status.is_success() {
                return serde_json::from_str(&text).map_err(|e| NerError::Provider {
                    provider: self.provider.clone(),
                    message: format!("failed to parse response: {e}"),
                    body: Some(text),
                    source: Some(Box::new(e)),
                });
            }

            let err = NerError::Provider {
                provider: self.provider.clone(),
                message: format!("API returned {status}: {text}"),
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

    /// Probes the base URL; any answer below 500 counts as reachable.
    pub async fn probe(&self) -> Result<StatusCode, reqwest::Error> {
        Ok(self.client.get(&self.base_url).send().await?.status())
    }
}

pub(crate) fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503)
}
