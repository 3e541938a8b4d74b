// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for NER Studio.

use thiserror::Error;

/// The primary error type used across providers, storage, and the generation pipeline.
#[derive(Debug, Error)]
pub enum NerError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Bad identifiers or missing fields. The caller's fault, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The organization balance cannot cover the requested amount.
    #[error("insufficient credits: available {available}, required {required}")]
    InsufficientCredits { available: i64, required: i64 },

    /// A vendor call failed. `body` carries the raw response for diagnostics.
    #[error("provider {provider} error: {message}")]
    Provider {
        provider: String,
        message: String,
        body: Option<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The vendor answered but returned zero usable candidates or choices.
    #[error("provider {provider} returned an empty response")]
    EmptyResponse { provider: String },

    /// Unknown job, image, provider, organization, or task id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Missing, expired, or invalid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NerError {
    /// Shorthand for a provider error without a response body or source.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            body: None,
            source: None,
        }
    }

    /// Shorthand for a not-found error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Wraps any error as a storage failure.
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage {
            source: Box::new(err),
        }
    }

    /// True for failures attributable to a vendor call.
    ///
    /// An empty response counts as a provider failure for fallback purposes.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::EmptyResponse { .. } | Self::Timeout { .. }
        )
    }

    /// True when repeating the same call may succeed without any change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Storage { .. })
    }
}
