// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Copies vendor-hosted generated images into the blob store.

use std::sync::Arc;
use std::time::Duration;

use ner_core::NerError;
use ner_core::traits::BlobStore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::key::object_key;
use crate::upload::UploadFolder;

/// A generated image now held in the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedImage {
    pub url: String,
    pub key: String,
}

#[derive(Clone)]
pub struct ImageArchiver {
    http: reqwest::Client,
    store: Arc<dyn BlobStore>,
    max_bytes: usize,
}

impl ImageArchiver {
    pub fn new(store: Arc<dyn BlobStore>, max_bytes: usize) -> Result<Self, NerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| NerError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            store,
            max_bytes,
        })
    }

    /// Downloads `source_url` and stores it as
    /// `{org}/generations/{nanos}_{image_id}.{ext}`.
    pub async fn archive(
        &self,
        organization_id: Uuid,
        image_id: Uuid,
        source_url: &str,
    ) -> Result<ArchivedImage, NerError> {
        let response = self
            .http
            .get(source_url)
            .send()
            .await
            .map_err(|e| NerError::provider("image-download", format!("download failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NerError::provider(
                "image-download",
                format!("download of {source_url} returned {status}"),
            ));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| NerError::provider("image-download", format!("download failed: {e}")))?;
        if bytes.len() > self.max_bytes {
            return Err(NerError::Validation(format!(
                "generated image of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_bytes
            )));
        }

        let (ext, content_type) = image_kind(content_type.as_deref(), source_url);
        let key = object_key(
            organization_id,
            &UploadFolder::Generations.to_string(),
            &format!("{image_id}.{ext}"),
        );
        let url = self.store.put(&key, bytes.to_vec(), content_type).await?;
        debug!(%image_id, %key, "generated image archived");
        Ok(ArchivedImage { url, key })
    }

    /// Removes a copy that lost the race to be recorded.
    pub async fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(%key, error = %e, "failed to delete unrecorded archive copy");
        }
    }
}

/// Picks an extension from the response content type, else the URL path.
fn image_kind(content_type: Option<&str>, url: &str) -> (&'static str, &'static str) {
    match content_type {
        Some("image/png") => return ("png", "image/png"),
        Some("image/jpeg") => return ("jpg", "image/jpeg"),
        Some("image/webp") => return ("webp", "image/webp"),
        Some("image/gif") => return ("gif", "image/gif"),
        _ => {}
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match crate::upload::image_content_type(path) {
        Some("image/png") => ("png", "image/png"),
        Some("image/webp") => ("webp", "image/webp"),
        Some("image/gif") => ("gif", "image/gif"),
        _ => ("jpg", "image/jpeg"),
    }
}
