// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end pipeline tests over a temp database with scripted providers.

use std::sync::Arc;
use std::time::Duration;

use ner_blob::{FsBlobStore, ImageArchiver};
use ner_core::NerError;
use ner_core::types::{CallbackStatus, GenerationStatus, VisionAnalysis};
use ner_generation::{CANCELLED_MESSAGE, STALE_MESSAGE};
use ner_test_utils::{LlmStep, TestHarness, callback_payload};
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn callbacks_drive_job_to_single_settlement() {
    let h = TestHarness::new().await.unwrap();
    let details = h.run(h.request("a mountain cabin", Some(3))).await.unwrap();

    assert_eq!(details.generation.status, GenerationStatus::Processing);
    assert_eq!(details.generation.estimated_cost, 30);
    assert_eq!(details.images.len(), 3);
    assert!(details.images.iter().all(|i| i.status == GenerationStatus::Processing));
    assert_eq!(details.images[0].prompt, "A misty forest at dawn");

    let accepted = h.image.accepted().await;
    assert_eq!(
        accepted[0].params.callback_url,
        "http://localhost:8080/api/v1/callbacks/mock-image"
    );
    let tasks = h.image.task_ids().await;

    let first = h
        .callback(&tasks[0], CallbackStatus::Completed, Some("https://cdn.example/1.png"), None)
        .await
        .unwrap();
    assert!(first.is_none());
    let second = h
        .callback(&tasks[1], CallbackStatus::Failed, None, Some("content policy"))
        .await
        .unwrap();
    assert!(second.is_none());

    let job = h.service.get_generation(details.generation.id).await.unwrap();
    assert_eq!(job.generation.status, GenerationStatus::Processing);
    assert_eq!(job.generation.actual_cost, None);

    let settlement = h
        .callback(&tasks[2], CallbackStatus::Completed, Some("https://cdn.example/3.png"), None)
        .await
        .unwrap()
        .expect("third callback settles the job");
    assert_eq!(settlement.status, GenerationStatus::Completed);
    assert_eq!(settlement.actual_cost, 20);
    assert!(settlement.charged);

    // A redelivery of the last callback changes nothing.
    let again = h
        .callback(&tasks[2], CallbackStatus::Completed, Some("https://cdn.example/3.png"), None)
        .await
        .unwrap();
    assert!(again.is_none());

    let job = h.service.get_generation(details.generation.id).await.unwrap();
    assert_eq!(job.generation.status, GenerationStatus::Completed);
    assert_eq!(job.generation.actual_cost, Some(20));
    assert!(job.generation.completed_at.is_some());
    assert_eq!(job.images[1].error_message.as_deref(), Some("content policy"));
    assert_eq!(job.images[0].image_url.as_deref(), Some("https://cdn.example/1.png"));

    assert_eq!(h.balance().await.unwrap(), 980);
    assert!(h.ledger.audit(h.organization_id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn racing_final_callbacks_charge_once() {
    let h = TestHarness::new().await.unwrap();
    let details = h.run(h.request("racing", Some(3))).await.unwrap();
    let tasks = h.image.task_ids().await;
    for task in &tasks[..2] {
        h.callback(task, CallbackStatus::Completed, Some("https://cdn.example/x.png"), None)
            .await
            .unwrap();
    }

    let body = callback_payload(
        &tasks[2],
        CallbackStatus::Completed,
        Some("https://cdn.example/last.png"),
        None,
    );
    let deliveries = (0..6).map(|_| {
        let service = h.service.clone();
        let body = body.clone();
        tokio::spawn(async move { service.handle_callback("mock-image", &body).await })
    });
    let mut settled = 0;
    for delivery in deliveries.collect::<Vec<_>>() {
        if delivery.await.unwrap().unwrap().is_some() {
            settled += 1;
        }
    }
    assert_eq!(settled, 1);

    let job = h.service.get_generation(details.generation.id).await.unwrap();
    assert_eq!(job.generation.actual_cost, Some(30));
    assert_eq!(h.balance().await.unwrap(), 970);
    let history = h.ledger.history(h.organization_id, 10, 0).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn variation_counts_are_clamped_and_defaulted() {
    let h = TestHarness::builder()
        .with_credits(10_000)
        .build()
        .await
        .unwrap();

    let cases = [(Some(15), 10, 100), (Some(0), 4, 40), (None, 4, 40), (Some(7), 7, 70)];
    for (requested, expected, estimate) in cases {
        let submitted = h
            .service
            .submit_generation(h.request("clamp", requested))
            .await
            .unwrap();
        assert_eq!(submitted.status, GenerationStatus::Pending);
        let job = h.service.get_generation(submitted.job_id).await.unwrap();
        assert_eq!(job.generation.num_variations, expected);
        assert_eq!(job.generation.estimated_cost, estimate);
    }
    h.service.wait_idle().await;
}

#[tokio::test]
async fn advisory_credit_check_rejects_before_persisting() {
    let h = TestHarness::builder().with_credits(20).build().await.unwrap();
    let err = h
        .service
        .submit_generation(h.request("too expensive", Some(4)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NerError::InsufficientCredits {
            available: 20,
            required: 40
        }
    ));
    let jobs = h
        .service
        .list_generations(h.organization_id, 10, 0)
        .await
        .unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let h = TestHarness::new().await.unwrap();

    let mut bad_org = h.request("x", None);
    bad_org.organization_id = "nope".into();
    assert!(matches!(
        h.service.submit_generation(bad_org).await,
        Err(NerError::Validation(_))
    ));

    assert!(matches!(
        h.service.submit_generation(h.request("   ", None)).await,
        Err(NerError::Validation(_))
    ));

    let mut bad_url = h.request("x", None);
    bad_url.reference_images = vec!["file:///etc/passwd".into()];
    assert!(matches!(
        h.service.submit_generation(bad_url).await,
        Err(NerError::Validation(_))
    ));

    let mut unknown_provider = h.request("x", None);
    unknown_provider.provider_id = Uuid::new_v4().to_string();
    assert!(matches!(
        h.service.submit_generation(unknown_provider).await,
        Err(NerError::NotFound { .. })
    ));

    let mut unknown_org = h.request("x", None);
    unknown_org.organization_id = Uuid::new_v4().to_string();
    assert!(matches!(
        h.service.submit_generation(unknown_org).await,
        Err(NerError::NotFound {
            entity: "organization",
            ..
        })
    ));
}

#[tokio::test]
async fn vision_failure_fails_job_with_provider_error() {
    let h = TestHarness::new().await.unwrap();
    h.vision
        .push(Err(NerError::provider("mock-vision", "API returned 400: bad image")))
        .await;
    let mut request = h.request("styled", None);
    request.reference_images = vec!["https://img.example/a.png".into()];

    let details = h.run(request).await.unwrap();
    assert_eq!(details.generation.status, GenerationStatus::Failed);
    assert_eq!(
        details.generation.error_message.as_deref(),
        Some("provider mock-vision error: API returned 400: bad image")
    );
    assert!(details.images.is_empty());
    assert_eq!(h.llm.call_count().await, 0);
}

#[tokio::test]
async fn vision_analyses_reach_the_llm_in_order() {
    let h = TestHarness::new().await.unwrap();
    h.vision
        .push(Ok(VisionAnalysis {
            description: "a brick loft".into(),
            style_notes: "warm tungsten".into(),
        }))
        .await;
    let mut request = h.request("interior", None);
    request.reference_images = vec![
        "https://img.example/a.png".into(),
        "https://img.example/b.png".into(),
    ];

    h.run(request).await.unwrap();
    assert_eq!(
        h.vision.calls().await,
        vec!["https://img.example/a.png", "https://img.example/b.png"]
    );
    let calls = h.llm.calls().await;
    let system = &calls[0][0].content;
    assert!(system.contains("Image 1: a brick loft\nStyle Notes: warm tungsten\n"));
    assert!(system.contains("Image 2: analysis of https://img.example/b.png"));
    assert!(calls[0][1].content.starts_with("Base Prompt: interior"));
}

#[tokio::test]
async fn references_without_vision_provider_fail_the_job() {
    let h = TestHarness::builder().without_vision().build().await.unwrap();
    let mut request = h.request("styled", None);
    request.reference_images = vec!["https://img.example/a.png".into()];

    let details = h.run(request).await.unwrap();
    assert_eq!(details.generation.status, GenerationStatus::Failed);
    assert_eq!(
        details.generation.error_message.as_deref(),
        Some("no vision provider available")
    );
}

#[tokio::test]
async fn matching_trigger_falls_back_to_next_llm() {
    let h = TestHarness::builder()
        .with_llm_triggers(&["timeout"])
        .with_llm_steps(vec![LlmStep::Fail(NerError::provider(
            "mock-llm",
            "connection timeout",
        ))])
        .with_backup_llm(vec![LlmStep::Reply("one\n\ntwo".into())])
        .build()
        .await
        .unwrap();

    let details = h.run(h.request("fallback", None)).await.unwrap();
    assert_eq!(details.generation.status, GenerationStatus::Processing);
    let prompts: Vec<_> = details.images.iter().map(|i| i.prompt.as_str()).collect();
    assert_eq!(prompts, vec!["one", "two"]);
    assert_eq!(h.backup_llm.as_ref().unwrap().call_count().await, 1);
}

#[tokio::test]
async fn unmatched_llm_error_aborts_without_fallback() {
    let h = TestHarness::builder()
        .with_llm_triggers(&["timeout"])
        .with_llm_steps(vec![LlmStep::Fail(NerError::provider(
            "mock-llm",
            "invalid api key",
        ))])
        .with_backup_llm(vec![])
        .build()
        .await
        .unwrap();

    let details = h.run(h.request("abort", None)).await.unwrap();
    assert_eq!(details.generation.status, GenerationStatus::Failed);
    assert!(
        details
            .generation
            .error_message
            .unwrap()
            .contains("invalid api key")
    );
    assert_eq!(h.backup_llm.as_ref().unwrap().call_count().await, 0);
}

#[tokio::test]
async fn exhausted_llms_fail_the_job() {
    let h = TestHarness::builder()
        .with_llm_steps(vec![LlmStep::Fail(NerError::provider("mock-llm", "503"))])
        .with_backup_llm(vec![LlmStep::Fail(NerError::EmptyResponse {
            provider: "mock-llm-backup".into(),
        })])
        .build()
        .await
        .unwrap();

    let details = h.run(h.request("exhausted", None)).await.unwrap();
    assert_eq!(details.generation.status, GenerationStatus::Failed);
    assert!(
        details
            .generation
            .error_message
            .unwrap()
            .starts_with("all LLM providers failed")
    );
}

#[tokio::test]
async fn unusable_llm_output_fails_the_job() {
    let h = TestHarness::builder()
        .with_llm_steps(vec![LlmStep::Reply(" \n\n - \n".into())])
        .build()
        .await
        .unwrap();
    let details = h.run(h.request("empty", None)).await.unwrap();
    assert_eq!(details.generation.status, GenerationStatus::Failed);
    assert_eq!(
        details.generation.error_message.as_deref(),
        Some("no prompts generated")
    );
}

#[tokio::test]
async fn every_generated_prompt_becomes_an_image() {
    let h = TestHarness::builder()
        .with_llm_steps(vec![LlmStep::Reply("a\n\nb\n\nc\n\nd\n\ne".into())])
        .build()
        .await
        .unwrap();
    let details = h.run(h.request("few", Some(2))).await.unwrap();
    assert_eq!(details.images.len(), 5);
    assert_eq!(h.image.attempts(), 5);
    let prompts: Vec<_> = details.images.iter().map(|i| i.prompt.as_str()).collect();
    assert_eq!(prompts, vec!["a", "b", "c", "d", "e"]);

    // The charge stays within the estimate for two variations.
    let mut last = None;
    for task in h.image.task_ids().await {
        last = h
            .callback(&task, CallbackStatus::Completed, Some("https://cdn.example/v.png"), None)
            .await
            .unwrap();
    }
    let settlement = last.expect("job settles after the last callback");
    assert_eq!(settlement.actual_cost, details.generation.estimated_cost);
}

#[tokio::test]
async fn failed_submissions_are_tolerated_per_image() {
    let h = TestHarness::builder()
        .failing_prompts_containing("neon")
        .build()
        .await
        .unwrap();
    let details = h.run(h.request("mixed", Some(3))).await.unwrap();

    assert_eq!(details.generation.status, GenerationStatus::Processing);
    let statuses: Vec<_> = details.images.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![
            GenerationStatus::Processing,
            GenerationStatus::Failed,
            GenerationStatus::Processing
        ]
    );
    assert!(details.images[1].task_id.is_none());

    let mut last = None;
    for task in h.image.task_ids().await {
        last = h
            .callback(&task, CallbackStatus::Completed, Some("https://cdn.example/ok.png"), None)
            .await
            .unwrap();
    }
    let settlement = last.expect("job settles after the last callback");
    assert_eq!(settlement.status, GenerationStatus::Completed);
    assert_eq!(settlement.actual_cost, 20);
}

#[tokio::test]
async fn job_with_every_submission_failed_finalizes_immediately() {
    let h = TestHarness::builder()
        .failing_prompts_containing("")
        .build()
        .await
        .unwrap();
    let details = h.run(h.request("doomed", Some(3))).await.unwrap();

    assert_eq!(details.generation.status, GenerationStatus::Failed);
    assert_eq!(details.generation.actual_cost, Some(0));
    let message = details.generation.error_message.unwrap();
    assert!(message.starts_with("all 3 images failed"), "{message}");
    assert!(message.contains("upstream unavailable"));
    assert_eq!(h.balance().await.unwrap(), 1000);
}

#[tokio::test]
async fn parallel_submissions_submit_every_image() {
    let h = TestHarness::builder()
        .with_parallel_submissions()
        .build()
        .await
        .unwrap();
    let details = h.run(h.request("parallel", Some(3))).await.unwrap();
    assert_eq!(h.image.accepted().await.len(), 3);
    assert!(details.images.iter().all(|i| i.task_id.is_some()));
}

#[tokio::test]
async fn bad_callbacks_leave_jobs_untouched() {
    let h = TestHarness::new().await.unwrap();
    let details = h.run(h.request("callbacks", Some(3))).await.unwrap();

    let body = callback_payload("mock-image-task-1", CallbackStatus::Completed, Some("u"), None);
    assert!(matches!(
        h.service.handle_callback("no-such-provider", &body).await,
        Err(NerError::NotFound { .. })
    ));
    assert!(matches!(
        h.service.handle_callback("mock-image", b"{oops").await,
        Err(NerError::Validation(_))
    ));
    assert!(matches!(
        h.callback("unknown-task", CallbackStatus::Completed, Some("u"), None)
            .await,
        Err(NerError::NotFound {
            entity: "generation image",
            ..
        })
    ));

    let stats = h.service.generation_stats(details.generation.id).await.unwrap();
    assert_eq!(stats.processing, 3);
}

#[tokio::test]
async fn completion_without_url_fails_the_image() {
    let h = TestHarness::new().await.unwrap();
    let details = h.run(h.request("no url", Some(3))).await.unwrap();
    let tasks = h.image.task_ids().await;

    h.callback(&tasks[0], CallbackStatus::Completed, None, None)
        .await
        .unwrap();
    let job = h.service.get_generation(details.generation.id).await.unwrap();
    assert_eq!(job.images[0].status, GenerationStatus::Failed);
    assert_eq!(
        job.images[0].error_message.as_deref(),
        Some("provider reported completion without an image URL")
    );
}

#[tokio::test]
async fn pipeline_panic_is_recorded_on_the_job() {
    let h = TestHarness::builder()
        .with_llm_steps(vec![LlmStep::Panic("llm exploded")])
        .build()
        .await
        .unwrap();
    let details = h.run(h.request("panic", None)).await.unwrap();
    assert_eq!(details.generation.status, GenerationStatus::Failed);
    assert_eq!(
        details.generation.error_message.as_deref(),
        Some("pipeline panicked: llm exploded")
    );
    assert_eq!(h.service.in_flight(), 0);
}

#[tokio::test]
async fn shutdown_cancels_pipelines_after_grace() {
    let h = TestHarness::builder()
        .with_llm_steps(vec![LlmStep::Hang])
        .build()
        .await
        .unwrap();
    let submitted = h
        .service
        .submit_generation(h.request("hang", None))
        .await
        .unwrap();

    h.service.shutdown(Duration::from_millis(50)).await;

    let job = h.service.get_generation(submitted.job_id).await.unwrap();
    assert_eq!(job.generation.status, GenerationStatus::Failed);
    assert_eq!(job.generation.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(matches!(
        h.service.submit_generation(h.request("late", None)).await,
        Err(NerError::Internal(_))
    ));
}

#[tokio::test]
async fn reaper_finalizes_jobs_waiting_for_callbacks() {
    let h = TestHarness::builder()
        .with_stale_after(Duration::ZERO)
        .build()
        .await
        .unwrap();
    let details = h.run(h.request("stuck", Some(3))).await.unwrap();
    assert_eq!(details.generation.status, GenerationStatus::Processing);

    // Timestamps have millisecond resolution.
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(h.service.reap_stale_jobs().await.unwrap(), 1);

    let job = h.service.get_generation(details.generation.id).await.unwrap();
    assert_eq!(job.generation.status, GenerationStatus::Failed);
    assert!(job.generation.error_message.unwrap().contains(STALE_MESSAGE));
    assert!(job.images.iter().all(|i| i.status == GenerationStatus::Failed));
    assert_eq!(h.service.reap_stale_jobs().await.unwrap(), 0);
}

#[tokio::test]
async fn listing_is_scoped_and_clamped() {
    let h = TestHarness::new().await.unwrap();
    for prompt in ["one", "two", "three"] {
        h.run(h.request(prompt, Some(1))).await.unwrap();
    }
    let all = h
        .service
        .list_generations(h.organization_id, 0, 0)
        .await
        .unwrap();
    assert_eq!(all.len(), 1, "limit 0 is clamped to 1");

    let page = h
        .service
        .list_generations(h.organization_id, 500, 1)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    let other = h
        .service
        .list_generations(Uuid::new_v4(), 10, 0)
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn duplicate_completion_archives_a_single_copy() {
    let vendor = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![137, 80, 78, 71]),
        )
        .mount(&vendor)
        .await;

    let blobs = tempfile::tempdir().unwrap();
    let store = Arc::new(FsBlobStore::new(blobs.path(), "http://files.test"));
    let h = TestHarness::builder()
        .with_archiver(ImageArchiver::new(store, 1024).unwrap())
        .build()
        .await
        .unwrap();
    let details = h.run(h.request("archived", Some(3))).await.unwrap();
    let tasks = h.image.task_ids().await;

    let url = format!("{}/out/first.png", vendor.uri());
    let (a, b) = tokio::join!(
        h.callback(&tasks[0], CallbackStatus::Completed, Some(&url), None),
        h.callback(&tasks[0], CallbackStatus::Completed, Some(&url), None),
    );
    a.unwrap();
    b.unwrap();

    let folder = blobs
        .path()
        .join(h.organization_id.to_string())
        .join("generations");
    let copies: Vec<_> = std::fs::read_dir(&folder).unwrap().collect();
    assert_eq!(copies.len(), 1);

    let job = h.service.get_generation(details.generation.id).await.unwrap();
    let image = &job.images[0];
    assert_eq!(image.status, GenerationStatus::Completed);
    let key = image.storage_key.as_deref().expect("archived copy recorded");
    assert!(blobs.path().join(key).exists());
    assert_eq!(image.image_url.as_deref(), Some(format!("http://files.test/{key}").as_str()));
}

#[tokio::test]
async fn failed_archive_keeps_the_vendor_url() {
    let vendor = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&vendor)
        .await;

    let blobs = tempfile::tempdir().unwrap();
    let store = Arc::new(FsBlobStore::new(blobs.path(), "http://files.test"));
    let h = TestHarness::builder()
        .with_archiver(ImageArchiver::new(store, 1024).unwrap())
        .build()
        .await
        .unwrap();
    let details = h.run(h.request("unarchived", Some(3))).await.unwrap();
    let tasks = h.image.task_ids().await;

    let url = format!("{}/gone.png", vendor.uri());
    h.callback(&tasks[0], CallbackStatus::Completed, Some(&url), None)
        .await
        .unwrap();

    let job = h.service.get_generation(details.generation.id).await.unwrap();
    assert_eq!(job.images[0].status, GenerationStatus::Completed);
    assert_eq!(job.images[0].image_url.as_deref(), Some(url.as_str()));
    assert!(job.images[0].storage_key.is_none());
}
