// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted provider adapters for deterministic testing.
//!
//! Each mock pops its next scripted outcome from a FIFO queue and falls back
//! to a fixed default once the queue is empty. Calls are recorded so tests
//! can assert on what the pipeline sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use ner_core::NerError;
use ner_core::traits::{
    ImageGenerationProvider, ProviderAdapter, TextGenerationProvider, VisionProvider,
};
use ner_core::types::{
    CallbackOutcome, CallbackStatus, ChatMessage, HealthStatus, ImageParams, ImageSubmission,
    TextCompletion, TextParams, VisionAnalysis,
};

/// Default text returned by [`MockLlm`] once its script runs out.
pub const DEFAULT_LLM_RESPONSE: &str =
    "1. A misty forest at dawn\n\n2. A neon city street at night\n\n3. A quiet beach at sunset";

// --- Vision ---

pub struct MockVision {
    slug: String,
    script: Mutex<VecDeque<Result<VisionAnalysis, NerError>>>,
    calls: Mutex<Vec<String>>,
}

impl MockVision {
    pub fn new(slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues the outcome of the next `analyze` call.
    pub async fn push(&self, outcome: Result<VisionAnalysis, NerError>) {
        self.script.lock().await.push_back(outcome);
    }

    /// Image URLs analysed so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ProviderAdapter for MockVision {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn health_check(&self) -> Result<HealthStatus, NerError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl VisionProvider for MockVision {
    async fn analyze(&self, image_url: &str) -> Result<VisionAnalysis, NerError> {
        self.calls.lock().await.push(image_url.to_string());
        self.script.lock().await.pop_front().unwrap_or_else(|| {
            Ok(VisionAnalysis {
                description: format!("analysis of {image_url}"),
                style_notes: "soft lighting".to_string(),
            })
        })
    }
}

// --- LLM ---

/// One scripted outcome of [`MockLlm::generate`].
#[derive(Debug)]
pub enum LlmStep {
    Reply(String),
    Fail(NerError),
    /// Panics inside the provider call.
    Panic(&'static str),
    /// Never returns.
    Hang,
}

pub struct MockLlm {
    slug: String,
    script: Mutex<VecDeque<LlmStep>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlm {
    pub fn new(slug: &str) -> Self {
        Self::with_steps(slug, Vec::new())
    }

    pub fn with_steps(slug: &str, steps: Vec<LlmStep>) -> Self {
        Self {
            slug: slug.to_string(),
            script: Mutex::new(VecDeque::from(steps)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, step: LlmStep) {
        self.script.lock().await.push_back(step);
    }

    /// Message sets received so far.
    pub async fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl ProviderAdapter for MockLlm {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn health_check(&self) -> Result<HealthStatus, NerError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl TextGenerationProvider for MockLlm {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _params: &TextParams,
    ) -> Result<TextCompletion, NerError> {
        self.calls.lock().await.push(messages.to_vec());
        let step = self.script.lock().await.pop_front();
        match step.unwrap_or_else(|| LlmStep::Reply(DEFAULT_LLM_RESPONSE.to_string())) {
            LlmStep::Reply(content) => Ok(TextCompletion {
                tokens_used: u32::try_from(content.len()).unwrap_or(u32::MAX),
                content,
                finish_reason: Some("stop".to_string()),
            }),
            LlmStep::Fail(err) => Err(err),
            LlmStep::Panic(message) => panic!("{message}"),
            LlmStep::Hang => std::future::pending().await,
        }
    }
}

// --- Image generation ---

/// A task accepted by [`MockImageProvider`].
#[derive(Debug, Clone)]
pub struct SubmittedTask {
    pub task_id: String,
    pub prompt: String,
    pub params: ImageParams,
}

/// Webhook body understood by [`MockImageProvider::parse_callback`].
#[derive(Debug, Serialize, Deserialize)]
pub struct MockCallback {
    pub task_id: String,
    pub status: CallbackStatus,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Serializes a callback for [`MockImageProvider`].
pub fn callback_payload(
    task_id: &str,
    status: CallbackStatus,
    image_url: Option<&str>,
    error_message: Option<&str>,
) -> Vec<u8> {
    let body = MockCallback {
        task_id: task_id.to_string(),
        status,
        image_url: image_url.map(str::to_string),
        error_message: error_message.map(str::to_string),
    };
    serde_json::to_vec(&body).unwrap_or_default()
}

pub struct MockImageProvider {
    slug: String,
    next_task: AtomicUsize,
    /// Submissions of prompts containing any of these substrings fail.
    failing: Vec<String>,
    accepted: Mutex<Vec<SubmittedTask>>,
    attempts: AtomicUsize,
}

impl MockImageProvider {
    pub fn new(slug: &str) -> Self {
        Self::failing_on(slug, Vec::new())
    }

    pub fn failing_on(slug: &str, failing: Vec<String>) -> Self {
        Self {
            slug: slug.to_string(),
            next_task: AtomicUsize::new(1),
            failing,
            accepted: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Tasks accepted so far, in submission order.
    pub async fn accepted(&self) -> Vec<SubmittedTask> {
        self.accepted.lock().await.clone()
    }

    pub async fn task_ids(&self) -> Vec<String> {
        self.accepted
            .lock()
            .await
            .iter()
            .map(|t| t.task_id.clone())
            .collect()
    }

    /// Submissions attempted, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockImageProvider {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn health_check(&self) -> Result<HealthStatus, NerError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl ImageGenerationProvider for MockImageProvider {
    async fn submit(
        &self,
        prompt: &str,
        params: &ImageParams,
    ) -> Result<ImageSubmission, NerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|f| prompt.contains(f.as_str())) {
            return Err(NerError::provider(
                &self.slug,
                "API returned 500: upstream unavailable",
            ));
        }
        let n = self.next_task.fetch_add(1, Ordering::SeqCst);
        let task_id = format!("{}-task-{n}", self.slug);
        self.accepted.lock().await.push(SubmittedTask {
            task_id: task_id.clone(),
            prompt: prompt.to_string(),
            params: params.clone(),
        });
        Ok(ImageSubmission {
            task_id,
            status: "queued".to_string(),
        })
    }

    fn parse_callback(&self, payload: &[u8]) -> Result<CallbackOutcome, NerError> {
        let body: MockCallback = serde_json::from_slice(payload)
            .map_err(|e| NerError::Validation(format!("malformed mock callback: {e}")))?;
        Ok(CallbackOutcome {
            task_id: body.task_id,
            status: body.status,
            image_url: body.image_url,
            error_code: None,
            error_message: body.error_message,
        })
    }
}
