// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider registry for the generation pipeline.
//!
//! Providers are registered once at startup through [`ProviderRegistryBuilder`]
//! and frozen into an immutable [`ProviderRegistry`] that is shared by
//! reference. Each capability set has its own strongly typed lane, so the
//! pipeline never needs a runtime cast to get from a slug to a client.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ner_core::NerError;
use ner_core::traits::{ImageGenerationProvider, TextGenerationProvider, VisionProvider};
use ner_core::types::{ProviderCategory, ProviderRecord};
use tracing::debug;
use uuid::Uuid;

/// A provider client together with its persisted record.
pub struct RegisteredProvider<P: ?Sized> {
    pub record: ProviderRecord,
    pub client: Arc<P>,
    /// Position in overall registration order; breaks priority ties.
    seq: usize,
}

impl<P: ?Sized> Clone for RegisteredProvider<P> {
    fn clone(&self) -> Self {
        Self {
            record: self.record.clone(),
            client: Arc::clone(&self.client),
            seq: self.seq,
        }
    }
}

impl<P: ?Sized> fmt::Debug for RegisteredProvider<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("slug", &self.record.slug)
            .field("category", &self.record.category)
            .field("priority", &self.record.priority)
            .finish()
    }
}

pub type VisionEntry = RegisteredProvider<dyn VisionProvider>;
pub type LlmEntry = RegisteredProvider<dyn TextGenerationProvider>;
pub type ImageEntry = RegisteredProvider<dyn ImageGenerationProvider>;

/// A provider resolved by slug, tagged with its capability set.
#[derive(Debug, Clone)]
pub enum ProviderHandle {
    Vision(VisionEntry),
    Llm(LlmEntry),
    Image(ImageEntry),
}

impl ProviderHandle {
    pub fn record(&self) -> &ProviderRecord {
        match self {
            Self::Vision(entry) => &entry.record,
            Self::Llm(entry) => &entry.record,
            Self::Image(entry) => &entry.record,
        }
    }

    pub fn category(&self) -> ProviderCategory {
        match self {
            Self::Vision(_) => ProviderCategory::Vision,
            Self::Llm(_) => ProviderCategory::Llm,
            Self::Image(_) => ProviderCategory::ImageGeneration,
        }
    }
}

/// Collects providers before the registry is frozen.
#[derive(Debug, Default)]
pub struct ProviderRegistryBuilder {
    vision: Vec<VisionEntry>,
    llm: Vec<LlmEntry>,
    image: Vec<ImageEntry>,
    slugs: HashMap<String, ProviderCategory>,
}

impl ProviderRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(
        &mut self,
        record: &ProviderRecord,
        client_slug: &str,
        category: ProviderCategory,
    ) -> Result<usize, NerError> {
        if record.category != category {
            return Err(NerError::Validation(format!(
                "provider {} is declared as {} but registered as {}",
                record.slug, record.category, category
            )));
        }
        if record.slug != client_slug {
            return Err(NerError::Validation(format!(
                "provider record slug {} does not match client slug {}",
                record.slug, client_slug
            )));
        }
        if let Some(existing) = self.slugs.get(&record.slug) {
            return Err(NerError::Validation(format!(
                "provider slug {} is already registered as {}",
                record.slug, existing
            )));
        }
        self.slugs.insert(record.slug.clone(), category);
        debug!(slug = %record.slug, category = %category, priority = record.priority, "provider registered");
        Ok(self.slugs.len() - 1)
    }

    pub fn register_vision(
        &mut self,
        record: ProviderRecord,
        client: Arc<dyn VisionProvider>,
    ) -> Result<&mut Self, NerError> {
        let seq = self.claim(&record, client.slug(), ProviderCategory::Vision)?;
        self.vision.push(RegisteredProvider {
            record,
            client,
            seq,
        });
        Ok(self)
    }

    pub fn register_llm(
        &mut self,
        record: ProviderRecord,
        client: Arc<dyn TextGenerationProvider>,
    ) -> Result<&mut Self, NerError> {
        let seq = self.claim(&record, client.slug(), ProviderCategory::Llm)?;
        self.llm.push(RegisteredProvider {
            record,
            client,
            seq,
        });
        Ok(self)
    }

    pub fn register_image(
        &mut self,
        record: ProviderRecord,
        client: Arc<dyn ImageGenerationProvider>,
    ) -> Result<&mut Self, NerError> {
        let seq = self.claim(&record, client.slug(), ProviderCategory::ImageGeneration)?;
        self.image.push(RegisteredProvider {
            record,
            client,
            seq,
        });
        Ok(self)
    }

    /// Freezes the registry. Inactive records are dropped from the lanes.
    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            vision: ordered(self.vision),
            llm: ordered(self.llm),
            image: ordered(self.image),
        }
    }
}

fn ordered<P: ?Sized>(mut entries: Vec<RegisteredProvider<P>>) -> Vec<RegisteredProvider<P>> {
    entries.retain(|e| e.record.is_active);
    entries.sort_by_key(|e| (e.record.priority, e.seq));
    entries
}

/// Immutable set of provider clients, ordered by ascending priority.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    vision: Vec<VisionEntry>,
    llm: Vec<LlmEntry>,
    image: Vec<ImageEntry>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new()
    }

    pub fn vision(&self) -> &[VisionEntry] {
        &self.vision
    }

    /// LLM providers in fallback order.
    pub fn llm(&self) -> &[LlmEntry] {
        &self.llm
    }

    pub fn image(&self) -> &[ImageEntry] {
        &self.image
    }

    /// Resolves an image-generation provider by slug, e.g. for callbacks.
    pub fn image_provider(&self, slug: &str) -> Result<&ImageEntry, NerError> {
        self.image
            .iter()
            .find(|e| e.record.slug == slug)
            .ok_or_else(|| NerError::not_found("image provider", slug))
    }

    /// Resolves an image-generation provider by its stored id.
    pub fn image_provider_by_id(&self, id: Uuid) -> Result<&ImageEntry, NerError> {
        self.image
            .iter()
            .find(|e| e.record.id == id)
            .ok_or_else(|| NerError::not_found("image provider", id))
    }

    /// Resolves any provider by slug.
    pub fn lookup(&self, slug: &str) -> Result<ProviderHandle, NerError> {
        if let Some(e) = self.vision.iter().find(|e| e.record.slug == slug) {
            return Ok(ProviderHandle::Vision(e.clone()));
        }
        if let Some(e) = self.llm.iter().find(|e| e.record.slug == slug) {
            return Ok(ProviderHandle::Llm(e.clone()));
        }
        if let Some(e) = self.image.iter().find(|e| e.record.slug == slug) {
            return Ok(ProviderHandle::Image(e.clone()));
        }
        Err(NerError::not_found("provider", slug))
    }

    /// Records of every registered provider, optionally filtered by category.
    pub fn records(&self, category: Option<ProviderCategory>) -> Vec<&ProviderRecord> {
        let vision = self.vision.iter().map(|e| &e.record);
        let llm = self.llm.iter().map(|e| &e.record);
        let image = self.image.iter().map(|e| &e.record);
        vision
            .chain(llm)
            .chain(image)
            .filter(|r| category.is_none_or(|c| r.category == c))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.vision.len() + self.llm.len() + self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
