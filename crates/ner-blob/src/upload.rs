// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Validated image uploads.

use std::sync::Arc;

use ner_core::NerError;
use ner_core::traits::BlobStore;
use serde::Serialize;
use strum::{Display, EnumString};
use tracing::info;
use uuid::Uuid;

use crate::key::{object_key, sanitize_filename};

/// Folders clients may upload into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum UploadFolder {
    References,
    Products,
    Generations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub url: String,
    pub key: String,
    pub filename: String,
    pub content_type: &'static str,
    pub size: usize,
}

/// Content type for an allowed image extension, `None` otherwise.
pub fn image_content_type(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn BlobStore>,
    max_bytes: usize,
}

impl UploadService {
    pub fn new(store: Arc<dyn BlobStore>, max_bytes: usize) -> Self {
        Self { store, max_bytes }
    }

    /// Largest accepted upload in bytes.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn upload_image(
        &self,
        organization_id: Uuid,
        folder: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResult, NerError> {
        let folder: UploadFolder = folder.parse().map_err(|_| {
            NerError::Validation(format!(
                "invalid upload folder {folder:?} (allowed: references, products, generations)"
            ))
        })?;
        let filename = sanitize_filename(filename);
        if filename.is_empty() || filename.starts_with('.') {
            return Err(NerError::Validation("filename is required".to_string()));
        }
        let content_type = image_content_type(&filename).ok_or_else(|| {
            NerError::Validation(format!(
                "invalid file type for {filename} (allowed: jpg, jpeg, png, webp, gif)"
            ))
        })?;
        if bytes.is_empty() {
            return Err(NerError::Validation("upload body is empty".to_string()));
        }
        if bytes.len() > self.max_bytes {
            return Err(NerError::Validation(format!(
                "upload of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_bytes
            )));
        }

        let key = object_key(organization_id, &folder.to_string(), &filename);
        let size = bytes.len();
        let url = self.store.put(&key, bytes, content_type).await?;
        info!(organization_id = %organization_id, %key, size, "image uploaded");

        Ok(UploadResult {
            url,
            key,
            filename,
            content_type,
            size,
        })
    }
}
