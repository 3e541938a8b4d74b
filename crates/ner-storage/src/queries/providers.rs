// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider records.
//!
//! Providers are declared in configuration and upserted by slug at startup so
//! that jobs can reference them by a stable id.

use ner_core::NerError;
use ner_core::types::{ProviderCategory, ProviderRecord, ProviderSettings, timestamp_now};
use rusqlite::params;
use uuid::Uuid;

use crate::codec::{encode_string_list, enum_at, string_list_at, uuid_at};
use crate::database::{Database, map_tr_err};

const PROVIDER_COLUMNS: &str = "id, slug, name, category, model, priority, timeout_ms, \
     max_retries, fallback_triggers, cost_per_use, is_active";

fn provider_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderRecord> {
    Ok(ProviderRecord {
        id: uuid_at(row, 0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        category: enum_at(row, 3)?,
        model: row.get(4)?,
        priority: row.get(5)?,
        settings: ProviderSettings {
            timeout_ms: row.get(6)?,
            max_retries: row.get(7)?,
            fallback_triggers: string_list_at(row, 8)?,
        },
        cost_per_use: row.get(9)?,
        is_active: row.get(10)?,
    })
}

/// Inserts or updates a provider by slug and returns the stored record.
///
/// An existing row keeps its id; every other column takes the new values.
pub async fn upsert_provider(
    db: &Database,
    record: &ProviderRecord,
) -> Result<ProviderRecord, NerError> {
    let record = record.clone();
    let now = timestamp_now();
    db.connection()
        .call(move |conn| {
            let id: String = conn.query_row(
                "INSERT INTO providers (id, slug, name, category, model, priority, timeout_ms,
                     max_retries, fallback_triggers, cost_per_use, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                 ON CONFLICT(slug) DO UPDATE SET
                     name = excluded.name,
                     category = excluded.category,
                     model = excluded.model,
                     priority = excluded.priority,
                     timeout_ms = excluded.timeout_ms,
                     max_retries = excluded.max_retries,
                     fallback_triggers = excluded.fallback_triggers,
                     cost_per_use = excluded.cost_per_use,
                     is_active = excluded.is_active,
                     updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    record.id.to_string(),
                    record.slug,
                    record.name,
                    record.category.to_string(),
                    record.model,
                    record.priority,
                    record.settings.timeout_ms,
                    record.settings.max_retries,
                    encode_string_list(&record.settings.fallback_triggers),
                    record.cost_per_use,
                    record.is_active,
                    now,
                ],
                |row| row.get(0),
            )?;
            let mut stored = record;
            stored.id = Uuid::parse_str(&id).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok(stored)
        })
        .await
        .map_err(map_tr_err)
}

/// Marks every provider whose slug is not in `keep` as inactive.
pub async fn deactivate_except(db: &Database, keep: &[String]) -> Result<usize, NerError> {
    let keep = encode_string_list(keep);
    let now = timestamp_now();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE providers SET is_active = 0, updated_at = ?2
                 WHERE is_active = 1 AND slug NOT IN (SELECT value FROM json_each(?1))",
                params![keep, now],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Get a provider by id.
pub async fn get_provider(db: &Database, id: Uuid) -> Result<Option<ProviderRecord>, NerError> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = ?1"),
                params![id.to_string()],
                provider_from_row,
            );
            match result {
                Ok(provider) => Ok(Some(provider)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Active providers ordered by priority, optionally filtered by category.
pub async fn list_active_providers(
    db: &Database,
    category: Option<ProviderCategory>,
) -> Result<Vec<ProviderRecord>, NerError> {
    let category = category.map(|c| c.to_string());
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROVIDER_COLUMNS} FROM providers
                 WHERE is_active = 1 AND (?1 IS NULL OR category = ?1)
                 ORDER BY priority ASC, created_at ASC"
            ))?;
            let rows = stmt.query_map(params![category], provider_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
