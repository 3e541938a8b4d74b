// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider wiring: syncs `[[providers]]` entries into the database and
//! builds the runtime registry from them.

use std::sync::Arc;

use ner_config::model::{AdapterKind, ProviderConfig};
use ner_core::NerError;
use ner_core::types::{ProviderCategory, ProviderRecord};
use ner_gemini::GeminiProvider;
use ner_kieai::KieAiProvider;
use ner_openai::OpenAiVisionProvider;
use ner_registry::ProviderRegistry;
use ner_storage::Database;
use ner_storage::queries::providers;
use tracing::info;
use uuid::Uuid;

/// The database record for a config entry. The id is replaced by the stored
/// one when the slug already exists.
pub fn provider_record(config: &ProviderConfig) -> ProviderRecord {
    ProviderRecord {
        id: Uuid::new_v4(),
        slug: config.slug.clone(),
        name: config.display_name().to_string(),
        category: config.category,
        model: config.model.clone(),
        priority: config.priority,
        settings: config.settings(),
        cost_per_use: config.cost_per_use,
        is_active: config.enabled,
    }
}

/// Upserts every configured provider and deactivates rows that are no
/// longer configured. Returns the stored records in config order.
pub async fn sync_providers(
    db: &Database,
    configs: &[ProviderConfig],
) -> Result<Vec<ProviderRecord>, NerError> {
    let mut stored = Vec::with_capacity(configs.len());
    for config in configs {
        stored.push(providers::upsert_provider(db, &provider_record(config)).await?);
    }

    let keep: Vec<String> = configs.iter().map(|c| c.slug.clone()).collect();
    let retired = providers::deactivate_except(db, &keep).await?;
    info!(
        configured = stored.len(),
        retired, "providers synced"
    );
    Ok(stored)
}

/// Builds adapters for the enabled providers and registers them.
///
/// `records` must be the output of [`sync_providers`] for the same `configs`.
pub fn build_registry(
    configs: &[ProviderConfig],
    records: Vec<ProviderRecord>,
) -> Result<ProviderRegistry, NerError> {
    let mut builder = ProviderRegistry::builder();

    for (config, record) in configs.iter().zip(records) {
        if !record.is_active {
            continue;
        }
        match (config.adapter, config.category) {
            (AdapterKind::Openai, ProviderCategory::Vision) => {
                builder.register_vision(record, Arc::new(OpenAiVisionProvider::from_config(config)?))?;
            }
            (AdapterKind::Gemini, ProviderCategory::Llm) => {
                builder.register_llm(record, Arc::new(GeminiProvider::from_config(config)?))?;
            }
            (AdapterKind::Kieai, ProviderCategory::Llm) => {
                builder.register_llm(record, Arc::new(KieAiProvider::from_config(config)?))?;
            }
            (AdapterKind::Kieai, ProviderCategory::ImageGeneration) => {
                builder.register_image(record, Arc::new(KieAiProvider::from_config(config)?))?;
            }
            (adapter, category) => {
                return Err(NerError::Config(format!(
                    "provider {}: adapter {adapter:?} cannot serve category {category}",
                    config.slug
                )));
            }
        }
    }

    let registry = builder.build();
    info!(
        vision = registry.vision().len(),
        llm = registry.llm().len(),
        image = registry.image().len(),
        "provider registry built"
    );
    Ok(registry)
}
