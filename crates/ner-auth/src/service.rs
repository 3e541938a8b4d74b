// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Account registration, login, and bearer-token authentication.

use std::sync::LazyLock;

use chrono::Utc;
use ner_config::model::AuthConfig;
use ner_core::NerError;
use ner_core::types::{
    MemberRole, Organization, Profile, User, format_timestamp, timestamp_now,
};
use ner_storage::Database;
use ner_storage::queries::{organizations, users};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::password::{hash_password, verify_password};
use crate::slug::{candidates, slugify};
use crate::token::{generate_token, hash_token};

const INVALID_CREDENTIALS: &str = "invalid email or password";
const MAX_SLUG_ATTEMPTS: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub organization_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub user: User,
    pub organization: Organization,
    pub profile: Profile,
}

/// A freshly issued bearer token. The plaintext is only ever returned here.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub expires_at: String,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: MemberRole,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: MemberRole,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == MemberRole::Admin
    }
}

#[derive(Clone)]
pub struct AuthService {
    db: Database,
    token_ttl: chrono::Duration,
    min_password_length: usize,
}

impl AuthService {
    pub fn new(db: Database, config: &AuthConfig) -> Self {
        Self {
            db,
            token_ttl: i64::try_from(config.token_ttl_hours)
                .ok()
                .and_then(chrono::Duration::try_hours)
                .unwrap_or(chrono::Duration::days(365)),
            min_password_length: config.min_password_length,
        }
    }

    /// Creates a user, a new organization, and an admin membership.
    pub async fn register(&self, request: RegisterRequest) -> Result<Registration, NerError> {
        let email = normalize_email(&request.email)?;
        if request.password.chars().count() < self.min_password_length {
            return Err(NerError::Validation(format!(
                "password must be at least {} characters",
                self.min_password_length
            )));
        }
        let org_name = request.organization_name.trim();
        if org_name.is_empty() {
            return Err(NerError::Validation("organization name is required".into()));
        }
        if users::get_credentials_by_email(&self.db, &email).await?.is_some() {
            return Err(NerError::Validation("email is already registered".into()));
        }

        let slug = self.unique_slug(org_name).await?;
        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| NerError::Internal(format!("hashing task failed: {e}")))??;

        let now = timestamp_now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            created_at: now.clone(),
            last_login_at: None,
        };
        let organization = Organization {
            id: Uuid::new_v4(),
            name: org_name.to_string(),
            slug,
            credits: 0,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let profile = Profile {
            id: Uuid::new_v4(),
            user_id: user.id,
            organization_id: organization.id,
            full_name: request.full_name.trim().to_string(),
            role: MemberRole::Admin,
            created_at: now,
        };
        users::create_account(
            &self.db,
            &users::NewAccount {
                user: user.clone(),
                password_hash,
                organization: organization.clone(),
                profile: profile.clone(),
            },
        )
        .await?;

        info!(user_id = %user.id, organization_id = %organization.id, slug = %organization.slug, "account registered");
        Ok(Registration {
            user,
            organization,
            profile,
        })
    }

    async fn unique_slug(&self, name: &str) -> Result<String, NerError> {
        let base = match slugify(name) {
            s if s.is_empty() => "org".to_string(),
            s => s,
        };
        for candidate in candidates(&base).take(MAX_SLUG_ATTEMPTS) {
            if !organizations::slug_exists(&self.db, &candidate).await? {
                return Ok(candidate);
            }
        }
        let suffix = Uuid::new_v4().simple().to_string();
        Ok(format!("{base}-{}", &suffix[..8]))
    }

    /// Verifies credentials and issues a bearer token.
    ///
    /// Unknown emails and wrong passwords produce the same error.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, NerError> {
        let email = normalize_email(email).map_err(|_| NerError::Unauthorized(INVALID_CREDENTIALS.into()))?;
        let credentials = users::get_credentials_by_email(&self.db, &email).await?;

        // Unknown emails still pay for one verification.
        let stored = credentials
            .as_ref()
            .map(|c| c.password_hash.clone())
            .unwrap_or_else(|| DUMMY_HASH.clone());
        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| NerError::Internal(format!("verification task failed: {e}")))?;

        let credentials = match credentials {
            Some(c) if verified => c,
            _ => {
                warn!("login rejected");
                return Err(NerError::Unauthorized(INVALID_CREDENTIALS.into()));
            }
        };

        let profile = users::get_primary_profile(&self.db, credentials.user.id)
            .await?
            .ok_or_else(|| NerError::Unauthorized("user has no organization".into()))?;

        let token = generate_token();
        let now = Utc::now();
        let expires_at = format_timestamp(now + self.token_ttl);
        let now = format_timestamp(now);
        users::insert_token(
            &self.db,
            &hash_token(&token),
            credentials.user.id,
            profile.organization_id,
            &expires_at,
            &now,
        )
        .await?;
        users::touch_last_login(&self.db, credentials.user.id, &now).await?;

        info!(user_id = %credentials.user.id, organization_id = %profile.organization_id, "login succeeded");
        Ok(Session {
            token,
            expires_at,
            user_id: credentials.user.id,
            organization_id: profile.organization_id,
            role: profile.role,
        })
    }

    /// Resolves a bearer token to the caller's identity.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, NerError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(NerError::Unauthorized("missing bearer token".into()));
        }
        let owner = users::resolve_token(&self.db, &hash_token(token), &timestamp_now())
            .await?
            .ok_or_else(|| NerError::Unauthorized("invalid or expired token".into()))?;
        Ok(Identity {
            user_id: owner.user_id,
            organization_id: owner.organization_id,
            role: owner.role,
        })
    }

    /// Removes expired tokens.
    pub async fn purge_expired(&self) -> Result<usize, NerError> {
        users::purge_expired_tokens(&self.db, &timestamp_now()).await
    }
}

/// Hash verified against when the email is unknown.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password(&generate_token()).unwrap_or_default());

fn normalize_email(email: &str) -> Result<String, NerError> {
    let email = email.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(NerError::Validation(format!("invalid email address: {email}")));
    }
    Ok(email)
}
