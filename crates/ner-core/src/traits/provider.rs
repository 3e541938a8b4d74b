// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider capability traits.
//!
//! Each vendor adapter implements [`ProviderAdapter`] plus one or more of the
//! three capability traits. The orchestrator only ever talks to these traits.

use async_trait::async_trait;

use crate::error::NerError;
use crate::types::{
    CallbackOutcome, ChatMessage, HealthStatus, ImageParams, ImageSubmission, TextCompletion,
    TextParams, VisionAnalysis,
};

/// Identity and health shared by every provider adapter.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + 'static {
    /// The configured slug of this adapter instance.
    fn slug(&self) -> &str;

    /// Performs a cheap reachability check against the vendor.
    async fn health_check(&self) -> Result<HealthStatus, NerError>;
}

/// Describes a reference image for prompt engineering.
#[async_trait]
pub trait VisionProvider: ProviderAdapter {
    async fn analyze(&self, image_url: &str) -> Result<VisionAnalysis, NerError>;
}

/// Chat-style text generation.
///
/// Adapters may remap roles their wire protocol lacks (for example a system
/// message becoming a dedicated instruction field).
#[async_trait]
pub trait TextGenerationProvider: ProviderAdapter {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &TextParams,
    ) -> Result<TextCompletion, NerError>;
}

/// Asynchronous image generation completed through a vendor webhook.
#[async_trait]
pub trait ImageGenerationProvider: ProviderAdapter {
    /// Submits a task. The image is delivered later to `params.callback_url`.
    async fn submit(&self, prompt: &str, params: &ImageParams)
    -> Result<ImageSubmission, NerError>;

    /// Parses a raw webhook body, normalizing vendor statuses to
    /// completed/failed.
    fn parse_callback(&self, payload: &[u8]) -> Result<CallbackOutcome, NerError>;
}
