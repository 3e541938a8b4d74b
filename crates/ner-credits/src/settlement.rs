// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job finalization and credit settlement.
//!
//! The completion check, the job's terminal transition, and the ledger debit
//! happen in one `IMMEDIATE` transaction. The transition is a conditional
//! `UPDATE ... WHERE status = 'processing'`, so however many callbacks race
//! into this function for the same job, exactly one of them finalizes it and
//! the balance is debited at most once.

use ner_core::NerError;
use ner_core::types::{GenerationStats, GenerationStatus, LedgerKind, timestamp_now};
use ner_storage::queries::generations::count_images;
use ner_storage::{Database, map_tr_err};
use rusqlite::{TransactionBehavior, params};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{BalanceChange, Posting, post_in_tx};
use crate::pricing;

/// What a successful finalization decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub generation_id: Uuid,
    pub organization_id: Uuid,
    pub status: GenerationStatus,
    pub stats: GenerationStats,
    pub actual_cost: i64,
    /// False when the balance could not cover `actual_cost` at settlement time.
    pub charged: bool,
    pub error_message: Option<String>,
}

/// Finalizes a job if every image is terminal.
///
/// Returns `None` when the job is not `processing`, already finalized, or
/// still has images in flight.
pub async fn settle_generation(
    db: &Database,
    generation_id: Uuid,
) -> Result<Option<Settlement>, NerError> {
    let settlement = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let job = tx.query_row(
                "SELECT organization_id, user_id, status, estimated_cost
                 FROM generations WHERE id = ?1",
                params![generation_id.to_string()],
                |row| {
                    Ok((
                        ner_storage::codec::uuid_at(row, 0)?,
                        ner_storage::codec::uuid_at(row, 1)?,
                        ner_storage::codec::enum_at::<GenerationStatus>(row, 2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            );
            let (organization_id, user_id, status, estimated) = match job {
                Ok(job) => job,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(e),
            };
            if status != GenerationStatus::Processing {
                return Ok(None);
            }

            let stats = count_images(&tx, generation_id)?;
            if !stats.all_terminal() {
                return Ok(None);
            }

            let (status, mut error_message) = if stats.completed > 0 {
                (GenerationStatus::Completed, None)
            } else {
                let first_error: Option<String> = tx
                    .query_row(
                        "SELECT error_message FROM generation_images
                         WHERE generation_id = ?1 AND error_message IS NOT NULL
                         ORDER BY updated_at ASC LIMIT 1",
                        params![generation_id.to_string()],
                        |row| row.get(0),
                    )
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        e => Err(e),
                    })?;
                let message = match first_error {
                    Some(err) => format!("all {} images failed (first error: {err})", stats.total),
                    None => format!("all {} images failed", stats.total),
                };
                (GenerationStatus::Failed, Some(message))
            };
            let actual_cost = pricing::actual_cost(estimated, stats.total, stats.completed);

            let mut charged = true;
            if actual_cost > 0 {
                let reason = format!(
                    "Image generation {generation_id} ({}/{} completed)",
                    stats.completed, stats.total
                );
                match post_in_tx(
                    &tx,
                    Posting {
                        organization_id,
                        amount: -actual_cost,
                        kind: LedgerKind::Generation,
                        reason: &reason,
                        user_id: Some(user_id),
                        generation_id: Some(generation_id),
                    },
                )? {
                    BalanceChange::Applied(_) => {}
                    BalanceChange::Insufficient { available } => {
                        charged = false;
                        error_message = Some(format!(
                            "credit settlement failed: insufficient credits \
                             (available {available}, required {actual_cost})"
                        ));
                    }
                    BalanceChange::MissingOrganization => {
                        charged = false;
                        error_message =
                            Some("credit settlement failed: organization not found".to_string());
                    }
                }
            }

            let now = timestamp_now();
            let changed = tx.execute(
                "UPDATE generations
                 SET status = ?2, actual_cost = ?3, error_message = COALESCE(?4, error_message),
                     updated_at = ?5, completed_at = ?5
                 WHERE id = ?1 AND status = 'processing'",
                params![
                    generation_id.to_string(),
                    status.to_string(),
                    actual_cost,
                    error_message,
                    now,
                ],
            )?;
            if changed != 1 {
                return Ok(None);
            }
            tx.commit()?;

            Ok(Some(Settlement {
                generation_id,
                organization_id,
                status,
                stats,
                actual_cost,
                charged,
                error_message,
            }))
        })
        .await
        .map_err(map_tr_err)?;

    if let Some(settlement) = &settlement {
        if settlement.charged {
            info!(
                generation_id = %generation_id,
                status = %settlement.status,
                completed = settlement.stats.completed,
                total = settlement.stats.total,
                actual_cost = settlement.actual_cost,
                "generation settled"
            );
        } else {
            warn!(
                generation_id = %generation_id,
                actual_cost = settlement.actual_cost,
                error = ?settlement.error_message,
                "generation finalized without charge"
            );
        }
    }
    Ok(settlement)
}
