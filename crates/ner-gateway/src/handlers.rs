// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the REST API.

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use ner_auth::{Identity, RegisterRequest, Registration, Session};
use ner_blob::UploadResult;
use ner_blob::upload::image_content_type;
use ner_core::NerError;
use ner_core::types::{
    CreditLedgerEntry, GenerationDetails, GenerationJob, GenerationRequest, GenerationStatus,
    LedgerKind, ProviderCategory, ProviderRecord,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::require_admin;
use crate::error::ApiError;
use crate::server::AppState;

const DEFAULT_PAGE_SIZE: u32 = 20;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the database does not answer.
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub database: bool,
    /// Registered providers across all categories.
    pub providers: usize,
    /// Generation pipelines currently running.
    pub in_flight: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for POST /api/v1/generations.
///
/// Tenant and user come from the bearer token, never from the body.
#[derive(Debug, Deserialize)]
pub struct CreateGenerationRequest {
    pub provider_id: String,
    pub base_prompt: String,
    #[serde(default)]
    pub reference_images: Vec<String>,
    #[serde(default)]
    pub product_images: Vec<String>,
    #[serde(default)]
    pub num_variations: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GenerationAccepted {
    pub id: Uuid,
    pub status: GenerationStatus,
    pub message: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Pagination {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Serialize)]
pub struct GenerationList {
    pub generations: Vec<GenerationJob>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub folder: String,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProviderList {
    pub providers: Vec<ProviderRecord>,
}

#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub balance: i64,
    pub history: Vec<CreditLedgerEntry>,
}

/// Request body for POST /api/v1/admin/credits.
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub amount: i64,
    /// Defaults to `purchase`.
    #[serde(default)]
    pub kind: Option<LedgerKind>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let database = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            false
        }
    };
    let (code, status) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        database,
        providers: state.generation.registry().len(),
        in_flight: state.generation.in_flight(),
    };
    (code, Json(body)).into_response()
}

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let registration = state.auth.register(body).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.auth.login(&body.email, &body.password).await?))
}

/// GET /files/{*key}
pub async fn serve_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let store = state
        .files
        .as_ref()
        .ok_or_else(|| NerError::not_found("blob", &key))?;
    let bytes = store.get(&key).await?;
    let content_type = image_content_type(&key).unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// POST /api/v1/callbacks/{provider}
pub async fn provider_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.generation.handle_callback(&provider, &body).await {
        Ok(_) => Ok(Json(serde_json::json!({ "status": "ok" }))),
        Err(e) => {
            tracing::warn!(provider = %provider, error = %e, "callback rejected");
            Err(e.into())
        }
    }
}

/// POST /api/v1/generations
pub async fn create_generation(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateGenerationRequest>,
) -> Result<(StatusCode, Json<GenerationAccepted>), ApiError> {
    let request = GenerationRequest {
        organization_id: identity.organization_id.to_string(),
        user_id: identity.user_id.to_string(),
        provider_id: body.provider_id,
        base_prompt: body.base_prompt,
        reference_images: body.reference_images,
        product_images: body.product_images,
        num_variations: body.num_variations,
    };
    let submitted = state.generation.submit_generation(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(GenerationAccepted {
            id: submitted.job_id,
            status: submitted.status,
            message: "Generation started",
        }),
    ))
}

/// GET /api/v1/generations
pub async fn list_generations(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<Pagination>,
) -> Result<Json<GenerationList>, ApiError> {
    let generations = state
        .generation
        .list_generations(identity.organization_id, page.limit(), page.offset())
        .await?;
    Ok(Json(GenerationList { generations }))
}

/// GET /api/v1/generations/{id}
///
/// Jobs of other organizations are reported as missing.
pub async fn get_generation(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<GenerationDetails>, ApiError> {
    let job_id = Uuid::parse_str(&id)
        .map_err(|_| NerError::Validation(format!("invalid generation id: {id}")))?;
    let details = state.generation.get_generation(job_id).await?;
    if details.generation.organization_id != identity.organization_id {
        return Err(NerError::not_found("generation", job_id).into());
    }
    Ok(Json(details))
}

/// POST /api/v1/uploads?folder=&filename=
pub async fn upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResult>), ApiError> {
    let uploads = state
        .uploads
        .as_ref()
        .ok_or_else(|| NerError::Internal("uploads are not configured".to_string()))?;
    let result = uploads
        .upload_image(
            identity.organization_id,
            &query.folder,
            &query.filename,
            body.to_vec(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /api/v1/providers?category=
pub async fn list_providers(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<ProviderList>, ApiError> {
    let category = match query.category.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<ProviderCategory>().map_err(|_| {
            NerError::Validation(format!(
                "invalid category {raw:?} (allowed: vision, llm, image_generation)"
            ))
        })?),
    };
    let providers = state
        .generation
        .registry()
        .records(category)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(ProviderList { providers }))
}

/// GET /api/v1/credits
pub async fn get_credits(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<Pagination>,
) -> Result<Json<CreditsResponse>, ApiError> {
    let organization_id = identity.organization_id;
    let balance = state.ledger.balance(organization_id).await?;
    let history = state
        .ledger
        .history(organization_id, page.limit().clamp(1, 100), page.offset())
        .await?;
    Ok(Json(CreditsResponse { balance, history }))
}

/// POST /api/v1/admin/credits
///
/// Grants credits to the caller's own organization.
pub async fn grant_credits(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<GrantRequest>,
) -> Result<(StatusCode, Json<CreditLedgerEntry>), ApiError> {
    require_admin(&identity)?;
    let kind = body.kind.unwrap_or(LedgerKind::Purchase);
    let reason = body.reason.as_deref().unwrap_or("admin grant");
    let entry = state
        .ledger
        .grant(
            identity.organization_id,
            body.amount,
            kind,
            reason,
            Some(identity.user_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
