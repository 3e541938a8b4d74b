// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping of [`NerError`] onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ner_core::NerError;
use serde::Serialize;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A handler error. Wraps [`NerError`] so handlers can use `?`.
#[derive(Debug)]
pub struct ApiError(pub NerError);

impl From<NerError> for ApiError {
    fn from(err: NerError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            NerError::Validation(_) => StatusCode::BAD_REQUEST,
            NerError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            NerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            NerError::NotFound { .. } => StatusCode::NOT_FOUND,
            NerError::Provider { .. } | NerError::EmptyResponse { .. } => StatusCode::BAD_GATEWAY,
            NerError::Config(_)
            | NerError::Storage { .. }
            | NerError::Timeout { .. }
            | NerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}
