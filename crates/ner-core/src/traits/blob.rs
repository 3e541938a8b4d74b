// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Blob storage capability.

use async_trait::async_trait;

use crate::error::NerError;

/// Object storage addressed by string keys.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Stores `bytes` under `key` and returns the public URL.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
    -> Result<String, NerError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, NerError>;

    async fn delete(&self, key: &str) -> Result<(), NerError>;
}
