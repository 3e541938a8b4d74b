// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bearer-token authentication middleware.
//!
//! Every protected route requires `Authorization: Bearer <token>`. The token
//! is resolved to an [`Identity`] which handlers read from request
//! extensions. Missing, malformed, unknown, and expired tokens are all
//! rejected with 401 (fail-closed).

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use ner_auth::Identity;
use ner_core::NerError;

use crate::error::ApiError;
use crate::server::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| NerError::Unauthorized("missing bearer token".to_string()))?;

    let identity = state.auth.authenticate(token).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Rejects callers without the admin role.
pub fn require_admin(identity: &Identity) -> Result<(), ApiError> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(NerError::Unauthorized("admin role required".to_string()).into())
    }
}
