// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Organization reads and creation.
//!
//! Balances are never written here; the credit ledger owns every mutation
//! of `organizations.credits`.

use ner_core::NerError;
use ner_core::types::Organization;
use rusqlite::params;
use uuid::Uuid;

use crate::codec::uuid_at;
use crate::database::{Database, map_tr_err};

pub(crate) const ORGANIZATION_COLUMNS: &str = "id, name, slug, credits, created_at, updated_at";

pub(crate) fn organization_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        credits: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub(crate) fn insert_organization(
    conn: &rusqlite::Connection,
    org: &Organization,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO organizations (id, name, slug, credits, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?5)",
        params![
            org.id.to_string(),
            org.name,
            org.slug,
            org.created_at,
            org.updated_at,
        ],
    )?;
    Ok(())
}

/// Creates an organization with a zero balance.
///
/// The `credits` field of `org` is ignored; starting balances are granted
/// through the ledger so every credit has an entry.
pub async fn create_organization(db: &Database, org: &Organization) -> Result<(), NerError> {
    let org = org.clone();
    db.connection()
        .call(move |conn| insert_organization(conn, &org))
        .await
        .map_err(map_tr_err)
}

/// Get an organization by id.
pub async fn get_organization(db: &Database, id: Uuid) -> Result<Option<Organization>, NerError> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = ?1"),
                params![id.to_string()],
                organization_from_row,
            );
            match result {
                Ok(org) => Ok(Some(org)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Whether any organization already uses `slug`.
pub async fn slug_exists(db: &Database, slug: &str) -> Result<bool, NerError> {
    let slug = slug.to_string();
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM organizations WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ner_core::types::timestamp_now;

    fn org(slug: &str) -> Organization {
        let now = timestamp_now();
        Organization {
            id: Uuid::new_v4(),
            name: "Acme Studio".into(),
            slug: slug.into(),
            credits: 999,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn created_organizations_start_at_zero_credits() {
        let db = Database::open_in_memory().await.unwrap();
        let org = org("acme-studio");
        create_organization(&db, &org).await.unwrap();

        let loaded = get_organization(&db, org.id).await.unwrap().unwrap();
        assert_eq!(loaded.slug, "acme-studio");
        assert_eq!(loaded.credits, 0);
        assert!(slug_exists(&db, "acme-studio").await.unwrap());
        assert!(!slug_exists(&db, "other").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_slug_is_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        create_organization(&db, &org("dup")).await.unwrap();
        assert!(create_organization(&db, &org("dup")).await.is_err());
    }

    #[tokio::test]
    async fn missing_organization_is_none() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(get_organization(&db, Uuid::new_v4()).await.unwrap().is_none());
    }
}
