// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ledger atomicity and settlement tests against an in-memory database.

use std::sync::Arc;

use ner_core::NerError;
use ner_core::types::{
    GenerationImage, GenerationJob, GenerationStatus, LedgerKind, MemberRole, Organization,
    Profile, ProviderCategory, ProviderRecord, ProviderSettings, User, timestamp_now,
};
use ner_credits::{CreditLedger, settle_generation};
use ner_storage::Database;
use ner_storage::queries::{generations, providers, users};
use uuid::Uuid;

struct Tenant {
    db: Database,
    ledger: CreditLedger,
    org_id: Uuid,
    user_id: Uuid,
    provider_id: Uuid,
}

async fn tenant(initial_credits: i64) -> Tenant {
    let db = Database::open_in_memory().await.unwrap();
    let now = timestamp_now();
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}@example.com", Uuid::new_v4()),
        created_at: now.clone(),
        last_login_at: None,
    };
    let organization = Organization {
        id: Uuid::new_v4(),
        name: "Ledger Co".into(),
        slug: format!("ledger-{}", Uuid::new_v4()),
        credits: 0,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    users::create_account(
        &db,
        &users::NewAccount {
            profile: Profile {
                id: Uuid::new_v4(),
                user_id: user.id,
                organization_id: organization.id,
                full_name: "Ledger Owner".into(),
                role: MemberRole::Admin,
                created_at: now.clone(),
            },
            user: user.clone(),
            password_hash: "x".into(),
            organization: organization.clone(),
        },
    )
    .await
    .unwrap();

    let provider = providers::upsert_provider(
        &db,
        &ProviderRecord {
            id: Uuid::new_v4(),
            slug: "kieai-seedream".into(),
            name: "Seedream".into(),
            category: ProviderCategory::ImageGeneration,
            model: "seedream-v1".into(),
            priority: 0,
            settings: ProviderSettings {
                timeout_ms: 120_000,
                max_retries: 0,
                fallback_triggers: vec![],
            },
            cost_per_use: 10,
            is_active: true,
        },
    )
    .await
    .unwrap();

    let ledger = CreditLedger::new(db.clone());
    if initial_credits > 0 {
        ledger
            .grant(organization.id, initial_credits, LedgerKind::Purchase, "starter pack", None)
            .await
            .unwrap();
    }
    Tenant {
        db,
        ledger,
        org_id: organization.id,
        user_id: user.id,
        provider_id: provider.id,
    }
}

/// Creates a `processing` job with `n` submitted images and returns their ids.
async fn processing_job(t: &Tenant, n: usize, estimated_cost: i64) -> (Uuid, Vec<Uuid>) {
    let now = timestamp_now();
    let job = GenerationJob {
        id: Uuid::new_v4(),
        organization_id: t.org_id,
        user_id: t.user_id,
        status: GenerationStatus::Pending,
        base_prompt: "a lighthouse at dusk".into(),
        reference_images: vec![],
        product_images: vec![],
        provider_id: t.provider_id,
        num_variations: n as u32,
        estimated_cost,
        actual_cost: None,
        error_message: None,
        created_at: now.clone(),
        updated_at: now.clone(),
        completed_at: None,
    };
    generations::create_generation(&t.db, &job).await.unwrap();
    generations::mark_processing(&t.db, job.id, &now).await.unwrap();

    let images: Vec<GenerationImage> = (0..n)
        .map(|i| GenerationImage {
            id: Uuid::new_v4(),
            generation_id: job.id,
            prompt: format!("prompt {i}"),
            status: GenerationStatus::Pending,
            task_id: None,
            image_url: None,
            storage_key: None,
            error_message: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        })
        .collect();
    generations::insert_images(&t.db, &images).await.unwrap();
    for (i, image) in images.iter().enumerate() {
        generations::mark_image_submitted(&t.db, image.id, &format!("{}-{i}", job.id), &now)
            .await
            .unwrap();
    }
    (job.id, images.into_iter().map(|i| i.id).collect())
}

#[tokio::test]
async fn deduct_beyond_balance_changes_nothing() {
    let t = tenant(50).await;

    let err = t
        .ledger
        .deduct(t.org_id, 51, "too much", Some(t.user_id), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NerError::InsufficientCredits {
            available: 50,
            required: 51
        }
    ));

    assert_eq!(t.ledger.balance(t.org_id).await.unwrap(), 50);
    let audit = t.ledger.audit(t.org_id).await.unwrap();
    assert_eq!(audit.entries, 1);
    assert!(audit.is_consistent());
}

#[tokio::test]
async fn deduct_and_grant_keep_balance_equal_to_ledger_sum() {
    let t = tenant(100).await;
    t.ledger
        .deduct(t.org_id, 30, "manual", Some(t.user_id), None)
        .await
        .unwrap();
    t.ledger
        .grant(t.org_id, 5, LedgerKind::Refund, "goodwill", None)
        .await
        .unwrap();

    assert_eq!(t.ledger.balance(t.org_id).await.unwrap(), 75);
    let audit = t.ledger.audit(t.org_id).await.unwrap();
    assert_eq!(audit.ledger_sum, 75);
    assert!(audit.is_consistent());

    let history = t.ledger.history(t.org_id, 10, 0).await.unwrap();
    let amounts: Vec<i64> = history.iter().map(|e| e.amount).collect();
    assert_eq!(amounts, vec![5, -30, 100]);
}

#[tokio::test]
async fn invalid_amounts_and_unknown_orgs_are_rejected() {
    let t = tenant(10).await;
    assert!(matches!(
        t.ledger.deduct(t.org_id, 0, "zero", None, None).await,
        Err(NerError::Validation(_))
    ));
    assert!(matches!(
        t.ledger
            .grant(t.org_id, 5, LedgerKind::Generation, "sneaky", None)
            .await,
        Err(NerError::Validation(_))
    ));
    assert!(matches!(
        t.ledger.deduct(Uuid::new_v4(), 1, "ghost", None, None).await,
        Err(NerError::NotFound { .. })
    ));
}

#[tokio::test]
async fn concurrent_deductions_never_overdraw() {
    let t = tenant(100).await;
    let ledger = Arc::new(t.ledger.clone());

    // 10 x 15 = 150 requested against 100 available: exactly 6 fit.
    let attempts = (0..10).map(|i| {
        let ledger = Arc::clone(&ledger);
        let org = t.org_id;
        tokio::spawn(async move { ledger.deduct(org, 15, &format!("attempt {i}"), None, None).await })
    });
    let results = futures::future::join_all(attempts).await;

    let succeeded = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(NerError::InsufficientCredits { .. }))))
        .count();
    assert_eq!(succeeded, 6);
    assert_eq!(rejected, 4);

    assert_eq!(t.ledger.balance(t.org_id).await.unwrap(), 10);
    assert!(t.ledger.audit(t.org_id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn settlement_waits_for_every_image() {
    let t = tenant(100).await;
    let (job_id, images) = processing_job(&t, 3, 30).await;
    let now = timestamp_now();

    generations::complete_image(&t.db, images[0], "https://img/0.jpg", None, &now)
        .await
        .unwrap();
    assert!(settle_generation(&t.db, job_id).await.unwrap().is_none());

    generations::fail_image(&t.db, images[1], "nsfw filter", &now)
        .await
        .unwrap();
    assert!(settle_generation(&t.db, job_id).await.unwrap().is_none());
    let job = generations::get_generation(&t.db, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, GenerationStatus::Processing);
    assert_eq!(job.actual_cost, None);

    generations::complete_image(&t.db, images[2], "https://img/2.jpg", None, &now)
        .await
        .unwrap();
    let settlement = settle_generation(&t.db, job_id).await.unwrap().unwrap();
    assert_eq!(settlement.status, GenerationStatus::Completed);
    assert_eq!(settlement.actual_cost, 20);
    assert!(settlement.charged);

    // A repeated check after finalization is a no-op.
    assert!(settle_generation(&t.db, job_id).await.unwrap().is_none());
    assert_eq!(t.ledger.balance(t.org_id).await.unwrap(), 80);

    let job = generations::get_generation(&t.db, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, GenerationStatus::Completed);
    assert_eq!(job.actual_cost, Some(20));
}

#[tokio::test]
async fn racing_settlements_finalize_once() {
    let t = tenant(100).await;
    let (job_id, images) = processing_job(&t, 2, 20).await;
    let now = timestamp_now();
    for image in &images {
        generations::complete_image(&t.db, *image, "https://img/x.jpg", None, &now)
            .await
            .unwrap();
    }

    let racers = (0..8).map(|_| {
        let db = t.db.clone();
        tokio::spawn(async move { settle_generation(&db, job_id).await })
    });
    let finalized = futures::future::join_all(racers)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(Some(_)))))
        .count();
    assert_eq!(finalized, 1);

    assert_eq!(t.ledger.balance(t.org_id).await.unwrap(), 80);
    let audit = t.ledger.audit(t.org_id).await.unwrap();
    assert_eq!(audit.entries, 2);
    assert!(audit.is_consistent());
}

#[tokio::test]
async fn all_failed_images_fail_the_job_without_charge() {
    let t = tenant(100).await;
    let (job_id, images) = processing_job(&t, 2, 20).await;
    let now = timestamp_now();
    for image in &images {
        generations::fail_image(&t.db, *image, "upstream 500", &now)
            .await
            .unwrap();
    }

    let settlement = settle_generation(&t.db, job_id).await.unwrap().unwrap();
    assert_eq!(settlement.status, GenerationStatus::Failed);
    assert_eq!(settlement.actual_cost, 0);

    let job = generations::get_generation(&t.db, job_id).await.unwrap().unwrap();
    let message = job.error_message.unwrap();
    assert!(message.starts_with("all 2 images failed"), "{message}");
    assert!(message.contains("upstream 500"));
    assert_eq!(t.ledger.balance(t.org_id).await.unwrap(), 100);
}

#[tokio::test]
async fn settlement_without_funds_finalizes_and_records_the_shortfall() {
    let t = tenant(5).await;
    let (job_id, images) = processing_job(&t, 1, 10).await;
    generations::complete_image(&t.db, images[0], "https://img/0.jpg", None, &timestamp_now())
        .await
        .unwrap();

    let settlement = settle_generation(&t.db, job_id).await.unwrap().unwrap();
    assert_eq!(settlement.status, GenerationStatus::Completed);
    assert!(!settlement.charged);

    let job = generations::get_generation(&t.db, job_id).await.unwrap().unwrap();
    assert!(job.error_message.unwrap().contains("insufficient credits"));
    assert_eq!(t.ledger.balance(t.org_id).await.unwrap(), 5);
    assert!(t.ledger.audit(t.org_id).await.unwrap().is_consistent());
}
