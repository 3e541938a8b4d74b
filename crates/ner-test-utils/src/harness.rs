// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end generation tests.
//!
//! `TestHarness` assembles a complete [`GenerationService`] over a temp
//! SQLite database with scripted providers, one funded organization, and one
//! user, so tests can drive submissions and callbacks directly.

use std::sync::Arc;
use std::time::Duration;

use ner_blob::ImageArchiver;
use ner_core::NerError;
use ner_core::types::{
    CallbackStatus, GenerationDetails, GenerationRequest, LedgerKind, MemberRole, Organization,
    Profile, ProviderCategory, ProviderRecord, ProviderSettings, User, timestamp_now,
};
use ner_credits::{CreditLedger, Settlement};
use ner_generation::{GenerationService, GenerationSettings};
use ner_registry::ProviderRegistry;
use ner_storage::Database;
use ner_storage::queries::{providers, users};
use uuid::Uuid;

use crate::mock_provider::{LlmStep, MockImageProvider, MockLlm, MockVision, callback_payload};

pub const VISION_SLUG: &str = "mock-vision";
pub const LLM_SLUG: &str = "mock-llm";
pub const BACKUP_LLM_SLUG: &str = "mock-llm-backup";
pub const IMAGE_SLUG: &str = "mock-image";

/// Builds a provider record with test-friendly settings.
pub fn provider_record(
    slug: &str,
    category: ProviderCategory,
    priority: i32,
    cost_per_use: i64,
    fallback_triggers: Vec<String>,
) -> ProviderRecord {
    ProviderRecord {
        id: Uuid::new_v4(),
        slug: slug.to_string(),
        name: slug.to_string(),
        category,
        model: format!("{slug}-model"),
        priority,
        settings: ProviderSettings {
            timeout_ms: 1_000,
            max_retries: 0,
            fallback_triggers,
        },
        cost_per_use,
        is_active: true,
    }
}

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    llm_steps: Vec<LlmStep>,
    llm_triggers: Vec<String>,
    backup_steps: Option<Vec<LlmStep>>,
    with_vision: bool,
    failing_prompts: Vec<String>,
    credits: i64,
    cost_per_use: i64,
    archiver: Option<ImageArchiver>,
    settings: GenerationSettings,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            llm_steps: Vec::new(),
            llm_triggers: Vec::new(),
            backup_steps: None,
            with_vision: true,
            failing_prompts: Vec::new(),
            credits: 1_000,
            cost_per_use: 10,
            archiver: None,
            settings: GenerationSettings::default(),
        }
    }

    /// Script the primary LLM.
    pub fn with_llm_steps(mut self, steps: Vec<LlmStep>) -> Self {
        self.llm_steps = steps;
        self
    }

    /// Fallback triggers of the primary LLM.
    pub fn with_llm_triggers(mut self, triggers: &[&str]) -> Self {
        self.llm_triggers = triggers.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Adds a second LLM at lower priority.
    pub fn with_backup_llm(mut self, steps: Vec<LlmStep>) -> Self {
        self.backup_steps = Some(steps);
        self
    }

    pub fn without_vision(mut self) -> Self {
        self.with_vision = false;
        self
    }

    /// Image submissions for prompts containing `needle` fail synchronously.
    pub fn failing_prompts_containing(mut self, needle: &str) -> Self {
        self.failing_prompts.push(needle.to_string());
        self
    }

    pub fn with_credits(mut self, credits: i64) -> Self {
        self.credits = credits;
        self
    }

    pub fn with_cost_per_use(mut self, cost: i64) -> Self {
        self.cost_per_use = cost;
        self
    }

    pub fn with_parallel_submissions(mut self) -> Self {
        self.settings.parallel_submissions = true;
        self
    }

    /// Copy completed images into a blob store.
    pub fn with_archiver(mut self, archiver: ImageArchiver) -> Self {
        self.archiver = Some(archiver);
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.settings.stale_after = Some(stale_after);
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, NerError> {
        let temp_dir = tempfile::TempDir::new().map_err(NerError::storage)?;
        let db_path = temp_dir.path().join("test.db");
        let db = Database::open(&db_path.to_string_lossy(), true).await?;

        let mut builder = ProviderRegistry::builder();

        let vision = Arc::new(MockVision::new(VISION_SLUG));
        if self.with_vision {
            let record = providers::upsert_provider(
                &db,
                &provider_record(VISION_SLUG, ProviderCategory::Vision, 0, 0, Vec::new()),
            )
            .await?;
            builder.register_vision(record, vision.clone())?;
        }

        let llm = Arc::new(MockLlm::with_steps(LLM_SLUG, self.llm_steps));
        let record = providers::upsert_provider(
            &db,
            &provider_record(LLM_SLUG, ProviderCategory::Llm, 0, 0, self.llm_triggers),
        )
        .await?;
        builder.register_llm(record, llm.clone())?;

        let backup_llm = match self.backup_steps {
            Some(steps) => {
                let backup = Arc::new(MockLlm::with_steps(BACKUP_LLM_SLUG, steps));
                let record = providers::upsert_provider(
                    &db,
                    &provider_record(BACKUP_LLM_SLUG, ProviderCategory::Llm, 1, 0, Vec::new()),
                )
                .await?;
                builder.register_llm(record, backup.clone())?;
                Some(backup)
            }
            None => None,
        };

        let image = Arc::new(MockImageProvider::failing_on(
            IMAGE_SLUG,
            self.failing_prompts,
        ));
        let image_record = providers::upsert_provider(
            &db,
            &provider_record(
                IMAGE_SLUG,
                ProviderCategory::ImageGeneration,
                0,
                self.cost_per_use,
                Vec::new(),
            ),
        )
        .await?;
        let image_provider_id = image_record.id;
        builder.register_image(image_record, image.clone())?;

        let (organization_id, user_id) = create_tenant(&db).await?;
        let ledger = CreditLedger::new(db.clone());
        if self.credits > 0 {
            ledger
                .grant(
                    organization_id,
                    self.credits,
                    LedgerKind::Purchase,
                    "test funding",
                    Some(user_id),
                )
                .await?;
        }

        let service = GenerationService::new(
            db.clone(),
            Arc::new(builder.build()),
            self.archiver,
            self.settings,
        );

        Ok(TestHarness {
            db,
            ledger,
            service,
            vision,
            llm,
            backup_llm,
            image,
            image_provider_id,
            organization_id,
            user_id,
            _temp_dir: temp_dir,
        })
    }
}

async fn create_tenant(db: &Database) -> Result<(Uuid, Uuid), NerError> {
    let now = timestamp_now();
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}@test.example", Uuid::new_v4()),
        created_at: now.clone(),
        last_login_at: None,
    };
    let organization = Organization {
        id: Uuid::new_v4(),
        name: "Test Studio".to_string(),
        slug: format!("test-studio-{}", Uuid::new_v4()),
        credits: 0,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    let ids = (organization.id, user.id);
    users::create_account(
        db,
        &users::NewAccount {
            profile: Profile {
                id: Uuid::new_v4(),
                user_id: user.id,
                organization_id: organization.id,
                full_name: "Test Owner".to_string(),
                role: MemberRole::Admin,
                created_at: now,
            },
            user,
            password_hash: "unused".to_string(),
            organization,
        },
    )
    .await?;
    Ok(ids)
}

/// A complete generation stack over a temp database.
pub struct TestHarness {
    pub db: Database,
    pub ledger: CreditLedger,
    pub service: GenerationService,
    pub vision: Arc<MockVision>,
    pub llm: Arc<MockLlm>,
    pub backup_llm: Option<Arc<MockLlm>>,
    pub image: Arc<MockImageProvider>,
    pub image_provider_id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A harness with default mocks and 1000 credits.
    pub async fn new() -> Result<Self, NerError> {
        Self::builder().build().await
    }

    /// A valid request for this harness's tenant and image provider.
    pub fn request(&self, base_prompt: &str, num_variations: Option<i64>) -> GenerationRequest {
        GenerationRequest {
            organization_id: self.organization_id.to_string(),
            user_id: self.user_id.to_string(),
            provider_id: self.image_provider_id.to_string(),
            base_prompt: base_prompt.to_string(),
            reference_images: Vec::new(),
            product_images: Vec::new(),
            num_variations,
        }
    }

    /// Submits a request and waits for its pipeline to finish.
    pub async fn run(&self, request: GenerationRequest) -> Result<GenerationDetails, NerError> {
        let submitted = self.service.submit_generation(request).await?;
        self.service.wait_idle().await;
        self.service.get_generation(submitted.job_id).await
    }

    /// Delivers a callback for `task_id` through the image provider's webhook.
    pub async fn callback(
        &self,
        task_id: &str,
        status: CallbackStatus,
        image_url: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<Option<Settlement>, NerError> {
        let body = callback_payload(task_id, status, image_url, error_message);
        self.service.handle_callback(IMAGE_SLUG, &body).await
    }

    pub async fn balance(&self) -> Result<i64, NerError> {
        self.ledger.balance(self.organization_id).await
    }
}
