// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Users, organization memberships, and API tokens.

use ner_core::NerError;
use ner_core::types::{MemberRole, Organization, Profile, User};
use rusqlite::params;
use uuid::Uuid;

use crate::codec::{enum_at, uuid_at};
use crate::database::{Database, map_tr_err};
use crate::queries::organizations::insert_organization;

/// Everything created by a self-service sign-up.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user: User,
    pub password_hash: String,
    pub organization: Organization,
    pub profile: Profile,
}

/// A user row together with its stored password hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// The owner of a live API token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOwner {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: MemberRole,
}

/// Inserts user, organization, and admin profile in one transaction.
pub async fn create_account(db: &Database, account: &NewAccount) -> Result<(), NerError> {
    let account = account.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    account.user.id.to_string(),
                    account.user.email,
                    account.password_hash,
                    account.user.created_at,
                ],
            )?;
            insert_organization(&tx, &account.organization)?;
            tx.execute(
                "INSERT INTO profiles (id, user_id, organization_id, full_name, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    account.profile.id.to_string(),
                    account.profile.user_id.to_string(),
                    account.profile.organization_id.to_string(),
                    account.profile.full_name,
                    account.profile.role.to_string(),
                    account.profile.created_at,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        email: row.get(1)?,
        created_at: row.get(2)?,
        last_login_at: row.get(3)?,
    })
}

/// Looks up a user by email (case-insensitive) with the password hash.
pub async fn get_credentials_by_email(
    db: &Database,
    email: &str,
) -> Result<Option<UserCredentials>, NerError> {
    let email = email.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT id, email, created_at, last_login_at, password_hash
                 FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok(UserCredentials {
                        user: user_from_row(row)?,
                        password_hash: row.get(4)?,
                    })
                },
            );
            match result {
                Ok(creds) => Ok(Some(creds)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Get a user by id.
pub async fn get_user(db: &Database, id: Uuid) -> Result<Option<User>, NerError> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT id, email, created_at, last_login_at FROM users WHERE id = ?1",
                params![id.to_string()],
                user_from_row,
            );
            match result {
                Ok(user) => Ok(Some(user)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Records a successful login.
pub async fn touch_last_login(db: &Database, id: Uuid, at: &str) -> Result<(), NerError> {
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
                params![at, id.to_string()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The user's oldest membership, which is the one used for requests.
pub async fn get_primary_profile(db: &Database, user_id: Uuid) -> Result<Option<Profile>, NerError> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT id, user_id, organization_id, full_name, role, created_at
                 FROM profiles WHERE user_id = ?1 ORDER BY created_at ASC LIMIT 1",
                params![user_id.to_string()],
                |row| {
                    Ok(Profile {
                        id: uuid_at(row, 0)?,
                        user_id: uuid_at(row, 1)?,
                        organization_id: uuid_at(row, 2)?,
                        full_name: row.get(3)?,
                        role: enum_at(row, 4)?,
                        created_at: row.get(5)?,
                    })
                },
            );
            match result {
                Ok(profile) => Ok(Some(profile)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Stores the hash of a freshly issued API token.
pub async fn insert_token(
    db: &Database,
    token_hash: &str,
    user_id: Uuid,
    organization_id: Uuid,
    expires_at: &str,
    created_at: &str,
) -> Result<(), NerError> {
    let (token_hash, expires_at, created_at) = (
        token_hash.to_string(),
        expires_at.to_string(),
        created_at.to_string(),
    );
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO api_tokens (token_hash, user_id, organization_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    token_hash,
                    user_id.to_string(),
                    organization_id.to_string(),
                    expires_at,
                    created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Resolves an unexpired token hash to its owner and membership role.
pub async fn resolve_token(
    db: &Database,
    token_hash: &str,
    now: &str,
) -> Result<Option<TokenOwner>, NerError> {
    let (token_hash, now) = (token_hash.to_string(), now.to_string());
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT t.user_id, t.organization_id, p.role
                 FROM api_tokens t
                 JOIN profiles p ON p.user_id = t.user_id AND p.organization_id = t.organization_id
                 WHERE t.token_hash = ?1 AND t.expires_at > ?2",
                params![token_hash, now],
                |row| {
                    Ok(TokenOwner {
                        user_id: uuid_at(row, 0)?,
                        organization_id: uuid_at(row, 1)?,
                        role: enum_at(row, 2)?,
                    })
                },
            );
            match result {
                Ok(owner) => Ok(Some(owner)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Deletes expired tokens, returning how many were removed.
pub async fn purge_expired_tokens(db: &Database, now: &str) -> Result<usize, NerError> {
    let now = now.to_string();
    db.connection()
        .call(move |conn| conn.execute("DELETE FROM api_tokens WHERE expires_at <= ?1", params![now]))
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ner_core::types::timestamp_now;

    fn account(email: &str, slug: &str) -> NewAccount {
        let now = timestamp_now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.into(),
            created_at: now.clone(),
            last_login_at: None,
        };
        let organization = Organization {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            slug: slug.into(),
            credits: 0,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let profile = Profile {
            id: Uuid::new_v4(),
            user_id: user.id,
            organization_id: organization.id,
            full_name: "Ada Lovelace".into(),
            role: MemberRole::Admin,
            created_at: now,
        };
        NewAccount {
            user,
            password_hash: "$argon2id$stub".into(),
            organization,
            profile,
        }
    }

    #[tokio::test]
    async fn account_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let acct = account("ada@example.com", "acme");
        create_account(&db, &acct).await.unwrap();

        let creds = get_credentials_by_email(&db, "ADA@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.user.id, acct.user.id);
        assert_eq!(creds.password_hash, "$argon2id$stub");

        let profile = get_primary_profile(&db, acct.user.id).await.unwrap().unwrap();
        assert_eq!(profile.organization_id, acct.organization.id);
        assert_eq!(profile.role, MemberRole::Admin);
    }

    #[tokio::test]
    async fn failed_account_creation_leaves_nothing_behind() {
        let db = Database::open_in_memory().await.unwrap();
        create_account(&db, &account("a@example.com", "taken")).await.unwrap();

        // Same slug: the organization insert fails after the user insert.
        let second = account("b@example.com", "taken");
        assert!(create_account(&db, &second).await.is_err());
        assert!(
            get_credentials_by_email(&db, "b@example.com")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn tokens_resolve_until_expiry() {
        let db = Database::open_in_memory().await.unwrap();
        let acct = account("t@example.com", "tok");
        create_account(&db, &acct).await.unwrap();

        insert_token(
            &db,
            "hash-1",
            acct.user.id,
            acct.organization.id,
            "2999-01-01T00:00:00.000Z",
            &timestamp_now(),
        )
        .await
        .unwrap();

        let owner = resolve_token(&db, "hash-1", &timestamp_now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.organization_id, acct.organization.id);
        assert_eq!(owner.role, MemberRole::Admin);

        assert!(
            resolve_token(&db, "hash-1", "3000-01-01T00:00:00.000Z")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            purge_expired_tokens(&db, "3000-01-01T00:00:00.000Z")
                .await
                .unwrap(),
            1
        );
    }
}
