// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only credit ledger.
//!
//! Every change to `organizations.credits` goes through this module and is
//! paired with exactly one `credit_ledger` row in the same transaction, so the
//! balance always equals the sum of the organization's entries.
//!
//! Debits run inside an `IMMEDIATE` transaction, which takes SQLite's write
//! lock before the balance is read. Together with the single background
//! connection this gives the read-check-decrement-append sequence the same
//! guarantees as a `SELECT ... FOR UPDATE` row lock.

use ner_core::NerError;
use ner_core::types::{CreditLedgerEntry, LedgerKind, timestamp_now};
use ner_storage::codec::{enum_at, opt_uuid_at, uuid_at};
use ner_storage::{Database, map_tr_err};
use rusqlite::{Transaction, TransactionBehavior, params};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a balance change attempted inside a transaction.
#[derive(Debug)]
pub(crate) enum BalanceChange {
    Applied(CreditLedgerEntry),
    Insufficient { available: i64 },
    MissingOrganization,
}

/// Parameters of one ledger posting.
pub(crate) struct Posting<'a> {
    pub organization_id: Uuid,
    /// Signed amount; negative for debits.
    pub amount: i64,
    pub kind: LedgerKind,
    pub reason: &'a str,
    pub user_id: Option<Uuid>,
    pub generation_id: Option<Uuid>,
}

/// Applies a posting within `tx`: checks the balance for debits, updates it,
/// and appends the ledger entry. Nothing is written when the check fails.
pub(crate) fn post_in_tx(
    tx: &Transaction<'_>,
    posting: Posting<'_>,
) -> rusqlite::Result<BalanceChange> {
    let balance = tx.query_row(
        "SELECT credits FROM organizations WHERE id = ?1",
        params![posting.organization_id.to_string()],
        |row| row.get::<_, i64>(0),
    );
    let available = match balance {
        Ok(credits) => credits,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(BalanceChange::MissingOrganization),
        Err(e) => return Err(e),
    };
    if posting.amount < 0 && available < -posting.amount {
        return Ok(BalanceChange::Insufficient { available });
    }

    let now = timestamp_now();
    tx.execute(
        "UPDATE organizations SET credits = credits + ?2, updated_at = ?3 WHERE id = ?1",
        params![posting.organization_id.to_string(), posting.amount, now],
    )?;

    let entry = CreditLedgerEntry {
        id: Uuid::new_v4(),
        organization_id: posting.organization_id,
        user_id: posting.user_id,
        amount: posting.amount,
        kind: posting.kind,
        reason: posting.reason.to_string(),
        generation_id: posting.generation_id,
        created_at: now,
    };
    tx.execute(
        "INSERT INTO credit_ledger (id, organization_id, user_id, amount, kind, reason,
             generation_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id.to_string(),
            entry.organization_id.to_string(),
            entry.user_id.map(|id| id.to_string()),
            entry.amount,
            entry.kind.to_string(),
            entry.reason,
            entry.generation_id.map(|id| id.to_string()),
            entry.created_at,
        ],
    )?;
    Ok(BalanceChange::Applied(entry))
}

/// Balance and ledger sum of one organization, for consistency checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub balance: i64,
    pub ledger_sum: i64,
    pub entries: i64,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum
    }
}

/// Credit ledger backed by the shared database connection.
#[derive(Clone)]
pub struct CreditLedger {
    db: Database,
}

impl CreditLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Atomically deducts `amount` from an organization's balance.
    ///
    /// Fails with [`NerError::InsufficientCredits`] when the balance cannot
    /// cover the amount; in that case neither the balance nor the ledger
    /// change.
    pub async fn deduct(
        &self,
        organization_id: Uuid,
        amount: i64,
        reason: &str,
        user_id: Option<Uuid>,
        generation_id: Option<Uuid>,
    ) -> Result<CreditLedgerEntry, NerError> {
        if amount <= 0 {
            return Err(NerError::Validation(format!(
                "deduction amount must be positive, got {amount}"
            )));
        }
        let entry = self
            .post(Posting {
                organization_id,
                amount: -amount,
                kind: LedgerKind::Generation,
                reason,
                user_id,
                generation_id,
            })
            .await?;
        info!(
            organization_id = %organization_id,
            amount,
            generation_id = ?generation_id,
            "credits deducted"
        );
        Ok(entry)
    }

    /// Adds credits to an organization (purchase, refund, or adjustment).
    pub async fn grant(
        &self,
        organization_id: Uuid,
        amount: i64,
        kind: LedgerKind,
        reason: &str,
        user_id: Option<Uuid>,
    ) -> Result<CreditLedgerEntry, NerError> {
        if amount <= 0 {
            return Err(NerError::Validation(format!(
                "grant amount must be positive, got {amount}"
            )));
        }
        if kind == LedgerKind::Generation {
            return Err(NerError::Validation(
                "generation entries are created by settlement only".to_string(),
            ));
        }
        let entry = self
            .post(Posting {
                organization_id,
                amount,
                kind,
                reason,
                user_id,
                generation_id: None,
            })
            .await?;
        info!(organization_id = %organization_id, amount, kind = %kind, "credits granted");
        Ok(entry)
    }

    async fn post(&self, posting: Posting<'_>) -> Result<CreditLedgerEntry, NerError> {
        let organization_id = posting.organization_id;
        let amount = posting.amount;
        let kind = posting.kind;
        let reason = posting.reason.to_string();
        let user_id = posting.user_id;
        let generation_id = posting.generation_id;

        let change = self
            .db
            .connection()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let change = post_in_tx(
                    &tx,
                    Posting {
                        organization_id,
                        amount,
                        kind,
                        reason: &reason,
                        user_id,
                        generation_id,
                    },
                )?;
                if matches!(change, BalanceChange::Applied(_)) {
                    tx.commit()?;
                }
                Ok(change)
            })
            .await
            .map_err(map_tr_err)?;

        match change {
            BalanceChange::Applied(entry) => Ok(entry),
            BalanceChange::Insufficient { available } => {
                warn!(
                    organization_id = %organization_id,
                    available,
                    required = -amount,
                    "deduction rejected: insufficient credits"
                );
                Err(NerError::InsufficientCredits {
                    available,
                    required: -amount,
                })
            }
            BalanceChange::MissingOrganization => {
                Err(NerError::not_found("organization", organization_id))
            }
        }
    }

    /// Current balance.
    pub async fn balance(&self, organization_id: Uuid) -> Result<i64, NerError> {
        let balance = self
            .db
            .connection()
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT credits FROM organizations WHERE id = ?1",
                    params![organization_id.to_string()],
                    |row| row.get::<_, i64>(0),
                );
                match result {
                    Ok(credits) => Ok(Some(credits)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(map_tr_err)?;
        balance.ok_or_else(|| NerError::not_found("organization", organization_id))
    }

    /// Ledger entries, newest first.
    pub async fn history(
        &self,
        organization_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CreditLedgerEntry>, NerError> {
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, organization_id, user_id, amount, kind, reason, generation_id,
                            created_at
                     FROM credit_ledger WHERE organization_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(
                    params![organization_id.to_string(), limit, offset],
                    |row| {
                        Ok(CreditLedgerEntry {
                            id: uuid_at(row, 0)?,
                            organization_id: uuid_at(row, 1)?,
                            user_id: opt_uuid_at(row, 2)?,
                            amount: row.get(3)?,
                            kind: enum_at(row, 4)?,
                            reason: row.get(5)?,
                            generation_id: opt_uuid_at(row, 6)?,
                            created_at: row.get(7)?,
                        })
                    },
                )?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }

    /// Compares the stored balance with the sum of ledger entries.
    pub async fn audit(&self, organization_id: Uuid) -> Result<LedgerAudit, NerError> {
        let audit = self
            .db
            .connection()
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT o.credits,
                            COALESCE((SELECT SUM(amount) FROM credit_ledger WHERE organization_id = o.id), 0),
                            (SELECT COUNT(*) FROM credit_ledger WHERE organization_id = o.id)
                     FROM organizations o WHERE o.id = ?1",
                    params![organization_id.to_string()],
                    |row| {
                        Ok(LedgerAudit {
                            balance: row.get(0)?,
                            ledger_sum: row.get(1)?,
                            entries: row.get(2)?,
                        })
                    },
                );
                match result {
                    Ok(audit) => Ok(Some(audit)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(map_tr_err)?;
        audit.ok_or_else(|| NerError::not_found("organization", organization_id))
    }
}
