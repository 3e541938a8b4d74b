// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ner serve`: wires storage, providers, the generation service, and the
//! HTTP gateway, then runs until a shutdown signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ner_auth::AuthService;
use ner_blob::{FsBlobStore, ImageArchiver, UploadService};
use ner_config::NerConfig;
use ner_core::NerError;
use ner_core::traits::BlobStore;
use ner_credits::CreditLedger;
use ner_gateway::AppState;
use ner_generation::{GenerationService, GenerationSettings};
use ner_storage::Database;
use tracing::{info, warn};

use crate::providers::{build_registry, sync_providers};
use crate::shutdown::install_signal_handler;

/// Largest generated image the archiver downloads.
const MAX_ARCHIVE_BYTES: usize = 50 * 1024 * 1024;

pub async fn run_serve(config: NerConfig) -> Result<(), NerError> {
    info!(
        host = %config.server.host,
        port = config.server.port,
        providers = config.providers.len(),
        "starting NER Studio"
    );

    let db = Database::open(&config.storage.database_path, config.storage.wal_mode).await?;

    let records = sync_providers(&db, &config.providers).await?;
    let registry = build_registry(&config.providers, records)?;
    if registry.image().is_empty() {
        warn!("no image-generation provider is enabled; submissions will be rejected");
    }

    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::from_config(&config.blob));
    let archiver = if config.blob.archive_generated {
        Some(ImageArchiver::new(store.clone(), MAX_ARCHIVE_BYTES)?)
    } else {
        None
    };
    let uploads = UploadService::new(store.clone(), config.blob.max_upload_bytes);

    let settings = GenerationSettings::from_config(&config);
    let generation = GenerationService::new(db.clone(), Arc::new(registry), archiver, settings);

    let shutdown = install_signal_handler();
    let reaper = generation.spawn_reaper(shutdown.clone());

    let auth = AuthService::new(db.clone(), &config.auth);
    match auth.purge_expired().await {
        Ok(0) => {}
        Ok(purged) => info!(purged, "expired API tokens removed"),
        Err(e) => warn!(error = %e, "failed to purge expired API tokens"),
    }

    let state = AppState {
        generation: generation.clone(),
        auth,
        ledger: CreditLedger::new(db.clone()),
        uploads: Some(uploads),
        files: Some(store),
        db: db.clone(),
        start_time: Instant::now(),
    };

    let served = ner_gateway::serve(
        &config.server.host,
        config.server.port,
        state,
        shutdown.clone(),
    )
    .await;
    // A bind failure returns before any signal; stop the reaper either way.
    shutdown.cancel();

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    info!(in_flight = generation.in_flight(), ?grace, "draining generation pipelines");
    generation.shutdown(grace).await;
    if let Some(reaper) = reaper
        && let Err(e) = reaper.await
    {
        warn!(error = %e, "stale job reaper ended abnormally");
    }

    if let Err(e) = db.close().await {
        warn!(error = %e, "failed to close database cleanly");
    }
    served?;
    info!("NER Studio stopped");
    Ok(())
}
