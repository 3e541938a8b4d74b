// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registration, login, and token authentication against SQLite.

use ner_auth::{AuthService, RegisterRequest};
use ner_config::model::AuthConfig;
use ner_core::NerError;
use ner_core::types::MemberRole;
use ner_storage::Database;
use ner_storage::queries::{organizations, users};

async fn service(ttl_hours: u64) -> (AuthService, Database) {
    let db = Database::open_in_memory().await.unwrap();
    let config = AuthConfig {
        token_ttl_hours: ttl_hours,
        min_password_length: 8,
    };
    (AuthService::new(db.clone(), &config), db)
}

fn request(email: &str, org: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.into(),
        password: "hunter2hunter2".into(),
        full_name: "Rin Tanaka".into(),
        organization_name: org.into(),
    }
}

#[tokio::test]
async fn register_creates_admin_membership_with_zero_credits() {
    let (auth, db) = service(24).await;
    let reg = auth.register(request("Rin@Studio.test", "Acme Studio")).await.unwrap();

    assert_eq!(reg.user.email, "rin@studio.test");
    assert_eq!(reg.organization.slug, "acme-studio");
    assert_eq!(reg.organization.credits, 0);
    assert_eq!(reg.profile.role, MemberRole::Admin);

    let stored = organizations::get_organization(&db, reg.organization.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.credits, 0);

    let creds = users::get_credentials_by_email(&db, "rin@studio.test")
        .await
        .unwrap()
        .unwrap();
    assert!(creds.password_hash.starts_with("$argon2id$"));
}

#[tokio::test]
async fn clashing_org_names_get_numeric_suffixes() {
    let (auth, _db) = service(24).await;
    let a = auth.register(request("a@x.test", "Acme")).await.unwrap();
    let b = auth.register(request("b@x.test", "ACME")).await.unwrap();
    let c = auth.register(request("c@x.test", "acme")).await.unwrap();
    assert_eq!(a.organization.slug, "acme");
    assert_eq!(b.organization.slug, "acme-2");
    assert_eq!(c.organization.slug, "acme-3");
}

#[tokio::test]
async fn register_validates_input() {
    let (auth, _db) = service(24).await;
    let mut short = request("s@x.test", "Org");
    short.password = "short".into();
    assert!(matches!(auth.register(short).await, Err(NerError::Validation(_))));
    assert!(matches!(
        auth.register(request("not-an-email", "Org")).await,
        Err(NerError::Validation(_))
    ));
    assert!(matches!(
        auth.register(request("e@x.test", "   ")).await,
        Err(NerError::Validation(_))
    ));

    auth.register(request("dup@x.test", "One")).await.unwrap();
    assert!(matches!(
        auth.register(request("DUP@x.test", "Two")).await,
        Err(NerError::Validation(_))
    ));
}

#[tokio::test]
async fn login_issues_token_that_authenticates() {
    let (auth, _db) = service(24).await;
    let reg = auth.register(request("rin@x.test", "Rin Co")).await.unwrap();

    let session = auth.login("RIN@x.test", "hunter2hunter2").await.unwrap();
    assert_eq!(session.token.len(), 64);
    assert_eq!(session.organization_id, reg.organization.id);

    let identity = auth.authenticate(&session.token).await.unwrap();
    assert_eq!(identity.user_id, reg.user.id);
    assert_eq!(identity.organization_id, reg.organization.id);
    assert!(identity.is_admin());
}

#[tokio::test]
async fn bad_credentials_are_indistinguishable() {
    let (auth, _db) = service(24).await;
    auth.register(request("rin@x.test", "Rin Co")).await.unwrap();

    let wrong_password = auth.login("rin@x.test", "nope-nope").await.unwrap_err();
    let unknown_email = auth.login("ghost@x.test", "hunter2hunter2").await.unwrap_err();
    assert!(matches!(wrong_password, NerError::Unauthorized(_)));
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());
}

#[tokio::test]
async fn unknown_and_expired_tokens_are_rejected() {
    let (auth, _db) = service(0).await;
    auth.register(request("rin@x.test", "Rin Co")).await.unwrap();
    let session = auth.login("rin@x.test", "hunter2hunter2").await.unwrap();

    // A zero-hour TTL expires immediately.
    assert!(matches!(
        auth.authenticate(&session.token).await,
        Err(NerError::Unauthorized(_))
    ));
    assert_eq!(auth.purge_expired().await.unwrap(), 1);

    assert!(matches!(auth.authenticate("deadbeef").await, Err(NerError::Unauthorized(_))));
    assert!(matches!(auth.authenticate("  ").await, Err(NerError::Unauthorized(_))));
}
