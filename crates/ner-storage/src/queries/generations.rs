// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generation jobs and their images.
//!
//! Every state transition is a conditional UPDATE that refuses to move a row
//! out of a terminal state. Callers get back whether the row changed, which
//! makes duplicate callbacks and racing workers harmless.

use ner_core::NerError;
use ner_core::types::{GenerationImage, GenerationJob, GenerationStats};
use rusqlite::params;
use uuid::Uuid;

use crate::codec::{encode_string_list, enum_at, string_list_at, uuid_at};
use crate::database::{Database, map_tr_err};

const JOB_COLUMNS: &str = "id, organization_id, user_id, status, base_prompt, reference_images, \
     product_images, provider_id, num_variations, estimated_cost, actual_cost, error_message, \
     created_at, updated_at, completed_at";

const IMAGE_COLUMNS: &str = "id, generation_id, prompt, status, task_id, image_url, storage_key, \
     error_message, created_at, updated_at";

pub(crate) fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GenerationJob> {
    Ok(GenerationJob {
        id: uuid_at(row, 0)?,
        organization_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        status: enum_at(row, 3)?,
        base_prompt: row.get(4)?,
        reference_images: string_list_at(row, 5)?,
        product_images: string_list_at(row, 6)?,
        provider_id: uuid_at(row, 7)?,
        num_variations: row.get(8)?,
        estimated_cost: row.get(9)?,
        actual_cost: row.get(10)?,
        error_message: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        completed_at: row.get(14)?,
    })
}

fn image_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GenerationImage> {
    Ok(GenerationImage {
        id: uuid_at(row, 0)?,
        generation_id: uuid_at(row, 1)?,
        prompt: row.get(2)?,
        status: enum_at(row, 3)?,
        task_id: row.get(4)?,
        image_url: row.get(5)?,
        storage_key: row.get(6)?,
        error_message: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Persists a new job.
pub async fn create_generation(db: &Database, job: &GenerationJob) -> Result<(), NerError> {
    let job = job.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO generations ({JOB_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    job.id.to_string(),
                    job.organization_id.to_string(),
                    job.user_id.to_string(),
                    job.status.to_string(),
                    job.base_prompt,
                    encode_string_list(&job.reference_images),
                    encode_string_list(&job.product_images),
                    job.provider_id.to_string(),
                    job.num_variations,
                    job.estimated_cost,
                    job.actual_cost,
                    job.error_message,
                    job.created_at,
                    job.updated_at,
                    job.completed_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get a job by id.
pub async fn get_generation(db: &Database, id: Uuid) -> Result<Option<GenerationJob>, NerError> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM generations WHERE id = ?1"),
                params![id.to_string()],
                job_from_row,
            );
            match result {
                Ok(job) => Ok(Some(job)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// An organization's jobs, newest first.
pub async fn list_generations(
    db: &Database,
    organization_id: Uuid,
    limit: u32,
    offset: u32,
) -> Result<Vec<GenerationJob>, NerError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM generations WHERE organization_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![organization_id.to_string(), limit, offset],
                job_from_row,
            )?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// `pending -> processing`. Returns false if the job had already moved on.
pub async fn mark_processing(db: &Database, id: Uuid, at: &str) -> Result<bool, NerError> {
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE generations SET status = 'processing', updated_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string(), at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Fails a job that is not yet terminal, recording `message`.
pub async fn fail_generation(
    db: &Database,
    id: Uuid,
    message: &str,
    at: &str,
) -> Result<bool, NerError> {
    let (message, at) = (message.to_string(), at.to_string());
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE generations
                 SET status = 'failed', error_message = ?2, updated_at = ?3, completed_at = ?3
                 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![id.to_string(), message, at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Inserts all images of a job in one transaction.
pub async fn insert_images(db: &Database, images: &[GenerationImage]) -> Result<(), NerError> {
    let images = images.to_vec();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO generation_images ({IMAGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ))?;
                for image in &images {
                    stmt.execute(params![
                        image.id.to_string(),
                        image.generation_id.to_string(),
                        image.prompt,
                        image.status.to_string(),
                        image.task_id,
                        image.image_url,
                        image.storage_key,
                        image.error_message,
                        image.created_at,
                        image.updated_at,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Images of a job in creation order.
pub async fn list_images(db: &Database, generation_id: Uuid) -> Result<Vec<GenerationImage>, NerError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {IMAGE_COLUMNS} FROM generation_images
                 WHERE generation_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![generation_id.to_string()], image_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Finds the image correlated with a vendor task id.
pub async fn find_image_by_task(
    db: &Database,
    task_id: &str,
) -> Result<Option<GenerationImage>, NerError> {
    let task_id = task_id.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {IMAGE_COLUMNS} FROM generation_images WHERE task_id = ?1"),
                params![task_id],
                image_from_row,
            );
            match result {
                Ok(image) => Ok(Some(image)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// `pending -> processing` with the vendor task id attached.
pub async fn mark_image_submitted(
    db: &Database,
    image_id: Uuid,
    task_id: &str,
    at: &str,
) -> Result<bool, NerError> {
    let (task_id, at) = (task_id.to_string(), at.to_string());
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE generation_images SET status = 'processing', task_id = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![image_id.to_string(), task_id, at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Moves a non-terminal image to `completed`.
pub async fn complete_image(
    db: &Database,
    image_id: Uuid,
    image_url: &str,
    storage_key: Option<&str>,
    at: &str,
) -> Result<bool, NerError> {
    let image_url = image_url.to_string();
    let storage_key = storage_key.map(str::to_string);
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE generation_images
                 SET status = 'completed', image_url = ?2, storage_key = ?3, error_message = NULL,
                     updated_at = ?4
                 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![image_id.to_string(), image_url, storage_key, at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Points a completed image at its blob-store copy. Only the first copy
/// recorded for an image wins.
pub async fn record_archived_image(
    db: &Database,
    image_id: Uuid,
    image_url: &str,
    storage_key: &str,
    at: &str,
) -> Result<bool, NerError> {
    let (image_url, storage_key, at) = (image_url.to_string(), storage_key.to_string(), at.to_string());
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE generation_images SET image_url = ?2, storage_key = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'completed' AND storage_key IS NULL",
                params![image_id.to_string(), image_url, storage_key, at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Moves a non-terminal image to `failed`.
pub async fn fail_image(
    db: &Database,
    image_id: Uuid,
    message: &str,
    at: &str,
) -> Result<bool, NerError> {
    let (message, at) = (message.to_string(), at.to_string());
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE generation_images SET status = 'failed', error_message = ?2, updated_at = ?3
                 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![image_id.to_string(), message, at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Fails every image of a job still waiting for its outcome.
pub async fn fail_unfinished_images(
    db: &Database,
    generation_id: Uuid,
    message: &str,
    at: &str,
) -> Result<usize, NerError> {
    let (message, at) = (message.to_string(), at.to_string());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE generation_images SET status = 'failed', error_message = ?2, updated_at = ?3
                 WHERE generation_id = ?1 AND status IN ('pending', 'processing')",
                params![generation_id.to_string(), message, at],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Counts a job's images by status.
pub fn count_images(
    conn: &rusqlite::Connection,
    generation_id: Uuid,
) -> rusqlite::Result<GenerationStats> {
    conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'pending'), 0),
                COALESCE(SUM(status = 'processing'), 0),
                COALESCE(SUM(status = 'completed'), 0),
                COALESCE(SUM(status = 'failed'), 0)
         FROM generation_images WHERE generation_id = ?1",
        params![generation_id.to_string()],
        |row| {
            Ok(GenerationStats {
                total: row.get(0)?,
                pending: row.get(1)?,
                processing: row.get(2)?,
                completed: row.get(3)?,
                failed: row.get(4)?,
            })
        },
    )
}

/// Image counts of a job.
pub async fn generation_stats(db: &Database, generation_id: Uuid) -> Result<GenerationStats, NerError> {
    db.connection()
        .call(move |conn| count_images(conn, generation_id))
        .await
        .map_err(map_tr_err)
}

/// Ids of `processing` jobs with no activity since `cutoff`.
///
/// Activity is the latest `updated_at` of the job or any of its images, so
/// callbacks keep a long-running job alive.
pub async fn stale_generation_ids(db: &Database, cutoff: &str) -> Result<Vec<Uuid>, NerError> {
    let cutoff = cutoff.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id,
                        MAX(g.updated_at, COALESCE(MAX(i.updated_at), g.updated_at)) AS last_activity
                 FROM generations g
                 LEFT JOIN generation_images i ON i.generation_id = g.id
                 WHERE g.status = 'processing'
                 GROUP BY g.id
                 HAVING last_activity < ?1
                 ORDER BY last_activity ASC",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| uuid_at(row, 0))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
