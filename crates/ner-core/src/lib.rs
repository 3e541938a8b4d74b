// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for NER Studio.
//!
//! Holds the error taxonomy, the persisted domain records, and the provider
//! capability traits every vendor adapter implements.

pub mod error;
pub mod traits;
pub mod types;

pub use error::NerError;
pub use types::{
    CallbackOutcome, CallbackStatus, ChatMessage, GenerationStatus, HealthStatus, ImageParams,
    ImageSubmission, MessageRole, ProviderCategory, TextCompletion, TextParams, VisionAnalysis,
};

pub use traits::{
    BlobStore, ImageGenerationProvider, ProviderAdapter, TextGenerationProvider, VisionProvider,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_traits_are_object_safe() {
        fn _vision(_: &dyn VisionProvider) {}
        fn _text(_: &dyn TextGenerationProvider) {}
        fn _image(_: &dyn ImageGenerationProvider) {}
        fn _blob(_: &dyn BlobStore) {}
    }

    #[test]
    fn health_status_variants() {
        let healthy = HealthStatus::Healthy;
        assert_ne!(HealthStatus::Degraded("slow".into()), healthy);
        assert_ne!(HealthStatus::Unhealthy("down".into()), healthy);
    }
}
