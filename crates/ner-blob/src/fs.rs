// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`BlobStore`] backed by a local directory.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use ner_config::model::BlobConfig;
use ner_core::NerError;
use ner_core::traits::BlobStore;
use tracing::debug;

use crate::key::validate_key;

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &BlobConfig) -> Self {
        Self::new(&config.root_dir, &config.public_base_url)
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, NerError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_err(key: &str, e: std::io::Error) -> NerError {
    if e.kind() == ErrorKind::NotFound {
        NerError::not_found("blob", key)
    } else {
        NerError::storage(e)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, NerError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(NerError::storage)?;
        }
        // Write then rename so readers never observe a partial object.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, &bytes).await.map_err(NerError::storage)?;
        tokio::fs::rename(&tmp, &path).await.map_err(NerError::storage)?;
        debug!(key, size = bytes.len(), content_type, "blob stored");
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, NerError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| io_err(key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), NerError> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path).await.map_err(|e| io_err(key, e))?;
        debug!(key, "blob deleted");
        Ok(())
    }
}
