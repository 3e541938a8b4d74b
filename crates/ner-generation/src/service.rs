// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The generation orchestrator.
//!
//! [`GenerationService::submit_generation`] validates a request, persists the
//! job as `pending`, and hands the rest of the pipeline to a supervised
//! background task:
//!
//! 1. `pending -> processing`
//! 2. vision analysis of every reference image (any failure fails the job)
//! 3. prompt expansion through the LLM providers with fallback
//! 4. splitting the response into prompts and persisting one image per prompt
//! 5. submitting every image to the job's image provider
//! 6. one completion check, so a job whose submissions all failed finalizes
//!
//! Images then finish through vendor callbacks ([`GenerationService::handle_callback`]).
//! Every callback runs the completion check, which finalizes and settles the
//! job exactly once (see [`ner_credits::settlement`]).

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use ner_blob::ImageArchiver;
use ner_core::NerError;
use ner_core::types::{
    CallbackOutcome, CallbackStatus, GenerationDetails, GenerationImage, GenerationJob,
    GenerationRequest, GenerationStats, GenerationStatus, ImageParams, SubmittedGeneration,
    VisionAnalysis, format_timestamp, timestamp_now,
};
use ner_credits::{Settlement, pricing, settle_generation};
use ner_registry::{ImageEntry, ProviderRegistry};
use ner_storage::Database;
use ner_storage::queries::{generations, organizations, users};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::fallback::{FallbackError, generate_with_fallback};
use crate::messages::build_messages;
use crate::prompts::split_prompts;
use crate::settings::GenerationSettings;

pub const CANCELLED_MESSAGE: &str = "generation cancelled: server shutting down";
pub const STALE_MESSAGE: &str = "timed out waiting for provider callback";
const MISSING_URL_MESSAGE: &str = "provider reported completion without an image URL";

const MAX_PAGE_SIZE: u32 = 100;

/// Fatal pipeline failures, recorded verbatim on the job.
#[derive(Debug, Error)]
enum PipelineError {
    #[error("no vision provider available")]
    NoVisionProvider,

    #[error(transparent)]
    Vision(NerError),

    #[error(transparent)]
    Llm(#[from] FallbackError),

    #[error("no prompts generated")]
    NoPrompts,

    #[error(transparent)]
    Other(#[from] NerError),
}

/// Orchestrates generation jobs from submission to settlement.
///
/// Cloning is cheap; clones share the task tracker and registry.
#[derive(Clone)]
pub struct GenerationService {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    registry: Arc<ProviderRegistry>,
    archiver: Option<ImageArchiver>,
    settings: GenerationSettings,
    tracker: TaskTracker,
    cancel: CancellationToken,
    accepting: AtomicBool,
    /// Jobs whose pipeline task is still running.
    active: DashMap<Uuid, ()>,
}

impl GenerationService {
    pub fn new(
        db: Database,
        registry: Arc<ProviderRegistry>,
        archiver: Option<ImageArchiver>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                registry,
                archiver,
                settings,
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
                accepting: AtomicBool::new(true),
                active: DashMap::new(),
            }),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.inner.settings
    }

    /// Number of pipelines currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.active.len()
    }

    /// Validates and persists a job, then starts its pipeline in the background.
    ///
    /// The credit check here is advisory; the balance is only debited when the
    /// job settles.
    pub async fn submit_generation(
        &self,
        request: GenerationRequest,
    ) -> Result<SubmittedGeneration, NerError> {
        if !self.inner.accepting.load(Ordering::Acquire) {
            return Err(NerError::Internal("server is shutting down".to_string()));
        }

        let organization_id = parse_id("organization_id", &request.organization_id)?;
        let user_id = parse_id("user_id", &request.user_id)?;
        let provider_id = parse_id("provider_id", &request.provider_id)?;

        let base_prompt = request.base_prompt.trim();
        if base_prompt.is_empty() {
            return Err(NerError::Validation("base_prompt is required".to_string()));
        }
        for url in request.reference_images.iter().chain(&request.product_images) {
            validate_image_url(url)?;
        }

        let provider = self.inner.registry.image_provider_by_id(provider_id)?;
        let settings = &self.inner.settings;
        let num_variations = pricing::clamp_variations(
            request.num_variations,
            settings.default_variations,
            settings.max_variations,
        );
        let estimated_cost = pricing::estimated_cost(provider.record.cost_per_use, num_variations);

        let organization = organizations::get_organization(&self.inner.db, organization_id)
            .await?
            .ok_or_else(|| NerError::not_found("organization", organization_id))?;
        users::get_user(&self.inner.db, user_id)
            .await?
            .ok_or_else(|| NerError::not_found("user", user_id))?;
        if organization.credits < estimated_cost {
            return Err(NerError::InsufficientCredits {
                available: organization.credits,
                required: estimated_cost,
            });
        }

        let now = timestamp_now();
        let job = GenerationJob {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            status: GenerationStatus::Pending,
            base_prompt: base_prompt.to_string(),
            reference_images: request.reference_images,
            product_images: request.product_images,
            provider_id,
            num_variations,
            estimated_cost,
            actual_cost: None,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        };
        generations::create_generation(&self.inner.db, &job).await?;

        info!(
            job_id = %job.id,
            organization_id = %organization_id,
            provider = %provider.record.slug,
            num_variations,
            estimated_cost,
            "generation submitted"
        );
        let submitted = SubmittedGeneration {
            job_id: job.id,
            status: GenerationStatus::Pending,
        };
        self.spawn_pipeline(job);
        Ok(submitted)
    }

    /// Runs the pipeline under the tracker.
    ///
    /// The pipeline itself is an inner task so a panic surfaces as a
    /// `JoinError` and can be recorded on the job.
    fn spawn_pipeline(&self, job: GenerationJob) {
        let inner = Arc::clone(&self.inner);
        let job_id = job.id;
        inner.active.insert(job_id, ());

        self.inner.tracker.spawn(async move {
            let worker = tokio::spawn({
                let inner = Arc::clone(&inner);
                async move { inner.run_pipeline(job).await }
            });
            let abort = worker.abort_handle();

            tokio::select! {
                joined = worker => match joined {
                    Ok(()) => {}
                    Err(e) if e.is_panic() => {
                        let message = format!("pipeline panicked: {}", panic_message(e.into_panic()));
                        error!(job_id = %job_id, error = %message, "generation pipeline panicked");
                        inner.abandon(job_id, &message).await;
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "generation pipeline aborted");
                        inner.abandon(job_id, CANCELLED_MESSAGE).await;
                    }
                },
                () = inner.cancel.cancelled() => {
                    abort.abort();
                    warn!(job_id = %job_id, "cancelling in-flight generation");
                    inner.abandon(job_id, CANCELLED_MESSAGE).await;
                }
            }
            inner.active.remove(&job_id);
        });
    }

    /// Applies a vendor webhook to its image and runs the completion check.
    ///
    /// Unknown providers and task ids are `NotFound`; malformed payloads are
    /// `Validation`. Neither mutates any job. A repeated callback for an image
    /// that already finished is accepted and changes nothing.
    pub async fn handle_callback(
        &self,
        provider_slug: &str,
        payload: &[u8],
    ) -> Result<Option<Settlement>, NerError> {
        let provider = self.inner.registry.image_provider(provider_slug)?;
        let outcome = provider.client.parse_callback(payload)?;
        let db = &self.inner.db;

        let image = generations::find_image_by_task(db, &outcome.task_id)
            .await?
            .ok_or_else(|| NerError::not_found("generation image", &outcome.task_id))?;

        if image.status.is_terminal() {
            debug!(
                image_id = %image.id,
                task_id = %outcome.task_id,
                status = %image.status,
                "duplicate callback for finished image"
            );
        } else {
            self.inner.apply_outcome(&image, outcome).await?;
        }

        settle_generation(db, image.generation_id).await
    }

    /// Fails images stuck waiting for callbacks and finalizes their jobs.
    ///
    /// Returns the number of jobs finalized. Jobs whose pipeline is still
    /// running are skipped.
    pub async fn reap_stale_jobs(&self) -> Result<usize, NerError> {
        let Some(stale_after) = self.inner.settings.stale_after else {
            return Ok(0);
        };
        let age = chrono::TimeDelta::from_std(stale_after)
            .map_err(|e| NerError::Config(format!("stale_after_secs out of range: {e}")))?;
        let cutoff = chrono::Utc::now()
            .checked_sub_signed(age)
            .map(format_timestamp)
            .ok_or_else(|| NerError::Config("stale_after_secs out of range".to_string()))?;

        let db = &self.inner.db;
        let mut finalized = 0;
        for job_id in generations::stale_generation_ids(db, &cutoff).await? {
            if self.inner.active.contains_key(&job_id) {
                continue;
            }
            let now = timestamp_now();
            let failed = generations::fail_unfinished_images(db, job_id, STALE_MESSAGE, &now).await?;
            if settle_generation(db, job_id).await?.is_some() {
                finalized += 1;
            } else if generations::generation_stats(db, job_id).await?.total == 0 {
                // The pipeline died before creating images.
                if generations::fail_generation(db, job_id, STALE_MESSAGE, &now).await? {
                    finalized += 1;
                }
            }
            info!(job_id = %job_id, images_failed = failed, "stale generation reaped");
        }
        Ok(finalized)
    }

    /// Starts the periodic reaper if a stale threshold is configured.
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let stale_after = self.inner.settings.stale_after?;
        let interval = self.inner.settings.reaper_interval;
        let service = self.clone();
        info!(?stale_after, ?interval, "stale generation reaper started");

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.reap_stale_jobs().await {
                            Ok(0) => {}
                            Ok(n) => info!(finalized = n, "reaper finalized stale generations"),
                            Err(e) => warn!(error = %e, "stale generation sweep failed"),
                        }
                    }
                    () = shutdown.cancelled() => {
                        debug!("stale generation reaper stopping");
                        break;
                    }
                }
            }
        }))
    }

    /// A job with all of its images.
    pub async fn get_generation(&self, job_id: Uuid) -> Result<GenerationDetails, NerError> {
        let generation = generations::get_generation(&self.inner.db, job_id)
            .await?
            .ok_or_else(|| NerError::not_found("generation", job_id))?;
        let images = generations::list_images(&self.inner.db, job_id).await?;
        Ok(GenerationDetails { generation, images })
    }

    /// An organization's jobs, newest first. `limit` is clamped to 1..=100.
    pub async fn list_generations(
        &self,
        organization_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<GenerationJob>, NerError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        generations::list_generations(&self.inner.db, organization_id, limit, offset).await
    }

    pub async fn generation_stats(&self, job_id: Uuid) -> Result<GenerationStats, NerError> {
        if generations::get_generation(&self.inner.db, job_id)
            .await?
            .is_none()
        {
            return Err(NerError::not_found("generation", job_id));
        }
        generations::generation_stats(&self.inner.db, job_id).await
    }

    /// Stops accepting jobs and drains running pipelines.
    ///
    /// Pipelines still running after `grace` are cancelled and their jobs
    /// finalized with [`CANCELLED_MESSAGE`].
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.accepting.store(false, Ordering::Release);
        self.inner.tracker.close();
        info!(in_flight = self.in_flight(), "draining generation pipelines");

        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.in_flight(),
                "grace period elapsed, cancelling generation pipelines"
            );
            self.inner.cancel.cancel();
            self.inner.tracker.wait().await;
        }
        info!("generation pipelines drained");
    }

    /// Waits until every pipeline spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }
}

impl Inner {
    async fn run_pipeline(&self, job: GenerationJob) {
        let job_id = job.id;
        if let Err(err) = self.execute(&job).await {
            let message = err.to_string();
            warn!(job_id = %job_id, error = %message, "generation failed");
            if let Err(e) =
                generations::fail_generation(&self.db, job_id, &message, &timestamp_now()).await
            {
                error!(job_id = %job_id, error = %e, "failed to record generation failure");
            }
        }
    }

    async fn execute(&self, job: &GenerationJob) -> Result<(), PipelineError> {
        if !generations::mark_processing(&self.db, job.id, &timestamp_now()).await? {
            debug!(job_id = %job.id, "generation no longer pending, skipping pipeline");
            return Ok(());
        }

        let analyses = self.analyze_references(job).await?;
        let messages = build_messages(&job.base_prompt, &analyses);

        let outcome = generate_with_fallback(
            self.registry.llm(),
            &messages,
            self.settings.temperature,
            self.settings.max_tokens,
        )
        .await?;

        let prompts = split_prompts(&outcome.completion.content);
        if prompts.is_empty() {
            return Err(PipelineError::NoPrompts);
        }

        let provider = self.registry.image_provider_by_id(job.provider_id)?;
        let now = timestamp_now();
        let images: Vec<GenerationImage> = prompts
            .iter()
            .map(|prompt| GenerationImage {
                id: Uuid::new_v4(),
                generation_id: job.id,
                prompt: (*prompt).to_string(),
                status: GenerationStatus::Pending,
                task_id: None,
                image_url: None,
                storage_key: None,
                error_message: None,
                created_at: now.clone(),
                updated_at: now.clone(),
            })
            .collect();
        generations::insert_images(&self.db, &images).await?;
        info!(
            job_id = %job.id,
            llm_provider = %outcome.provider,
            images = images.len(),
            "prompts generated"
        );

        let params = ImageParams {
            model: provider.record.model.clone(),
            width: self.settings.image_width,
            height: self.settings.image_height,
            callback_url: self.settings.callback_url(&provider.record.slug),
        };
        if self.settings.parallel_submissions {
            join_all(
                images
                    .iter()
                    .map(|image| self.submit_image(provider, image, &params)),
            )
            .await;
        } else {
            for image in &images {
                self.submit_image(provider, image, &params).await;
            }
        }

        settle_generation(&self.db, job.id).await?;
        Ok(())
    }

    async fn analyze_references(
        &self,
        job: &GenerationJob,
    ) -> Result<Vec<VisionAnalysis>, PipelineError> {
        if job.reference_images.is_empty() {
            return Ok(Vec::new());
        }
        let vision = self
            .registry
            .vision()
            .first()
            .ok_or(PipelineError::NoVisionProvider)?;

        let mut analyses = Vec::with_capacity(job.reference_images.len());
        for url in &job.reference_images {
            let analysis = vision
                .client
                .analyze(url)
                .await
                .map_err(PipelineError::Vision)?;
            debug!(job_id = %job.id, provider = %vision.record.slug, "reference image analysed");
            analyses.push(analysis);
        }
        Ok(analyses)
    }

    /// Submits one image. Failures only fail that image.
    async fn submit_image(&self, provider: &ImageEntry, image: &GenerationImage, params: &ImageParams) {
        let message = match provider.client.submit(&image.prompt, params).await {
            Ok(submission) => {
                match generations::mark_image_submitted(
                    &self.db,
                    image.id,
                    &submission.task_id,
                    &timestamp_now(),
                )
                .await
                {
                    Ok(true) => {
                        debug!(
                            image_id = %image.id,
                            task_id = %submission.task_id,
                            "image task submitted"
                        );
                        return;
                    }
                    Ok(false) => {
                        warn!(image_id = %image.id, "image finished before its task id was stored");
                        return;
                    }
                    Err(e) => format!("failed to record task {}: {e}", submission.task_id),
                }
            }
            Err(e) => e.to_string(),
        };

        warn!(image_id = %image.id, error = %message, "image submission failed");
        if let Err(e) = generations::fail_image(&self.db, image.id, &message, &timestamp_now()).await
        {
            error!(image_id = %image.id, error = %e, "failed to record image failure");
        }
    }

    async fn apply_outcome(
        &self,
        image: &GenerationImage,
        outcome: CallbackOutcome,
    ) -> Result<(), NerError> {
        let now = timestamp_now();
        let applied = match (outcome.status, outcome.image_url) {
            (CallbackStatus::Completed, Some(url)) if !url.trim().is_empty() => {
                let applied =
                    generations::complete_image(&self.db, image.id, &url, None, &now).await?;
                if applied {
                    self.archive(image, &url).await;
                }
                applied
            }
            (CallbackStatus::Completed, _) => {
                generations::fail_image(&self.db, image.id, MISSING_URL_MESSAGE, &now).await?
            }
            (CallbackStatus::Failed, _) => {
                let message = failure_message(outcome.error_code, outcome.error_message);
                generations::fail_image(&self.db, image.id, &message, &now).await?
            }
        };
        info!(
            image_id = %image.id,
            generation_id = %image.generation_id,
            status = %outcome.status,
            applied,
            "image callback processed"
        );
        Ok(())
    }

    /// Copies a completed image into the blob store when one is configured.
    /// Runs only for the callback that completed the image; the vendor URL
    /// stays on the row on any failure.
    async fn archive(&self, image: &GenerationImage, url: &str) {
        let Some(archiver) = &self.archiver else {
            return;
        };
        let organization_id = match generations::get_generation(&self.db, image.generation_id).await
        {
            Ok(Some(job)) => job.organization_id,
            Ok(None) => return,
            Err(e) => {
                warn!(image_id = %image.id, error = %e, "could not load job for archiving");
                return;
            }
        };
        let archived = match archiver.archive(organization_id, image.id, url).await {
            Ok(archived) => archived,
            Err(e) => {
                warn!(image_id = %image.id, error = %e, "archiving failed, keeping provider URL");
                return;
            }
        };
        let recorded = generations::record_archived_image(
            &self.db,
            image.id,
            &archived.url,
            &archived.key,
            &timestamp_now(),
        )
        .await;
        match recorded {
            Ok(true) => {}
            Ok(false) => {
                debug!(image_id = %image.id, key = %archived.key, "image already archived");
                archiver.discard(&archived.key).await;
            }
            Err(e) => {
                warn!(image_id = %image.id, error = %e, "failed to record archived image");
                archiver.discard(&archived.key).await;
            }
        }
    }

    /// Finalizes a job whose pipeline ended abnormally.
    ///
    /// Unfinished images are failed with `message` and the job settles
    /// normally. A job without images is failed directly.
    async fn abandon(&self, job_id: Uuid, message: &str) {
        let now = timestamp_now();
        if let Err(e) = generations::fail_unfinished_images(&self.db, job_id, message, &now).await {
            error!(job_id = %job_id, error = %e, "failed to fail unfinished images");
        }
        match settle_generation(&self.db, job_id).await {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => error!(job_id = %job_id, error = %e, "settlement of abandoned job failed"),
        }
        if let Err(e) = generations::fail_generation(&self.db, job_id, message, &now).await {
            error!(job_id = %job_id, error = %e, "failed to record generation failure");
        }
    }
}

fn parse_id(field: &str, value: &str) -> Result<Uuid, NerError> {
    Uuid::parse_str(value.trim())
        .map_err(|_| NerError::Validation(format!("invalid {field}: {value:?}")))
}

fn validate_image_url(url: &str) -> Result<(), NerError> {
    let lower = url.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(NerError::Validation(format!(
            "image URL must be http(s): {url:?}"
        ))),
    }
}

fn failure_message(code: Option<String>, message: Option<String>) -> String {
    match (code, message) {
        (Some(code), Some(message)) => format!("{message} (code {code})"),
        (None, Some(message)) => message,
        (Some(code), None) => format!("image generation failed with code {code}"),
        (None, None) => "image generation failed".to_string(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_must_be_uuids() {
        assert!(parse_id("user_id", "not-a-uuid").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_id("user_id", &format!(" {id} ")).unwrap(), id);
    }

    #[test]
    fn only_http_urls_are_accepted() {
        assert!(validate_image_url("https://cdn.example.com/a.png").is_ok());
        assert!(validate_image_url("HTTP://cdn.example.com/a.png").is_ok());
        assert!(validate_image_url("file:///etc/passwd").is_err());
        assert!(validate_image_url("https://").is_err());
        assert!(validate_image_url("ftp://x/y").is_err());
    }

    #[test]
    fn failure_messages_prefer_vendor_text() {
        assert_eq!(
            failure_message(Some("E42".into()), Some("nsfw content".into())),
            "nsfw content (code E42)"
        );
        assert_eq!(failure_message(None, Some("boom".into())), "boom");
        assert_eq!(
            failure_message(Some("500".into()), None),
            "image generation failed with code 500"
        );
        assert_eq!(failure_message(None, None), "image generation failed");
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic payload");
    }
}
