// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the API.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use ner_auth::AuthService;
use ner_blob::UploadService;
use ner_core::NerError;
use ner_core::traits::BlobStore;
use ner_credits::CreditLedger;
use ner_generation::GenerationService;
use ner_storage::Database;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::handlers;

/// Body limit of the upload route when no upload service is configured.
const FALLBACK_UPLOAD_LIMIT: usize = 10 * 1024 * 1024;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct AppState {
    pub generation: GenerationService,
    pub auth: AuthService,
    pub ledger: CreditLedger,
    /// `None` disables `/api/v1/uploads`.
    pub uploads: Option<UploadService>,
    /// Backs `GET /files/{*key}`; `None` disables it.
    pub files: Option<Arc<dyn BlobStore>>,
    pub db: Database,
    /// Process start time for uptime calculation.
    pub start_time: Instant,
}

/// Builds the full router.
///
/// - `GET /health`, auth, stored files, and vendor callbacks are public
/// - everything else under `/api/v1` requires a bearer token
pub fn build_router(state: AppState) -> Router {
    let upload_limit = state
        .uploads
        .as_ref()
        .map_or(FALLBACK_UPLOAD_LIMIT, UploadService::max_bytes);

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/auth/register", post(handlers::register))
        .route("/api/v1/auth/login", post(handlers::login))
        .route("/files/{*key}", get(handlers::serve_file))
        .route("/api/v1/callbacks/{provider}", post(handlers::provider_callback));

    let api_routes = Router::new()
        .route(
            "/api/v1/generations",
            post(handlers::create_generation).get(handlers::list_generations),
        )
        .route("/api/v1/generations/{id}", get(handlers::get_generation))
        .route(
            "/api/v1/uploads",
            post(handlers::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/v1/providers", get(handlers::list_providers))
        .route("/api/v1/credits", get(handlers::get_credits))
        .route("/api/v1/admin/credits", post(handlers::grant_credits))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds `host:port` and serves until `shutdown` is cancelled.
pub async fn serve(
    host: &str,
    port: u16,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), NerError> {
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| NerError::Internal(format!("failed to bind {addr}: {e}")))?;

    tracing::info!("HTTP server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| NerError::Internal(format!("HTTP server error: {e}")))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
