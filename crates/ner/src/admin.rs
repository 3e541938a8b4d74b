// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot maintenance commands: `migrate`, `config check`, `org grant`.

use ner_config::NerConfig;
use ner_core::NerError;
use ner_core::types::LedgerKind;
use ner_credits::CreditLedger;
use ner_storage::Database;
use ner_storage::queries::organizations;
use uuid::Uuid;

/// Opens the database, which applies pending migrations, and closes it.
pub async fn run_migrate(config: &NerConfig) -> Result<(), NerError> {
    let db = Database::open(&config.storage.database_path, config.storage.wal_mode).await?;
    db.close().await?;
    println!(
        "ner migrate: database at {} is up to date",
        config.storage.database_path
    );
    Ok(())
}

/// Prints a summary of a configuration that already passed validation.
pub fn run_config_check(config: &NerConfig) {
    println!("ner config check: configuration is valid");
    println!(
        "  server:    {}:{} (callbacks via {})",
        config.server.host, config.server.port, config.server.callback_base_url
    );
    println!("  database:  {}", config.storage.database_path);
    println!("  blobs:     {}", config.blob.root_dir);
    for provider in &config.providers {
        println!(
            "  provider:  {} [{}] adapter={:?} model={} priority={}{}",
            provider.slug,
            provider.category,
            provider.adapter,
            provider.model,
            provider.priority,
            if provider.enabled { "" } else { " (disabled)" }
        );
    }
    if config.providers.is_empty() {
        println!("  provider:  none configured");
    }
}

/// Adds credits to an organization from the command line.
pub async fn run_org_grant(
    config: &NerConfig,
    organization_id: Uuid,
    amount: i64,
    reason: Option<String>,
) -> Result<(), NerError> {
    let db = Database::open(&config.storage.database_path, config.storage.wal_mode).await?;
    let ledger = CreditLedger::new(db.clone());
    let entry = ledger
        .grant(
            organization_id,
            amount,
            LedgerKind::Adjustment,
            reason.as_deref().unwrap_or("granted via CLI"),
            None,
        )
        .await?;
    let balance = ledger.balance(organization_id).await?;
    let name = organizations::get_organization(&db, organization_id)
        .await?
        .map(|org| org.name)
        .unwrap_or_default();
    db.close().await?;

    println!(
        "ner org grant: +{} credits to {name} ({organization_id}), balance now {balance} (entry {})",
        entry.amount, entry.id
    );
    Ok(())
}
