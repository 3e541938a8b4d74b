// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability traits implemented by provider and storage adapters.
//!
//! All traits use `#[async_trait]` so they can be held as trait objects.

pub mod blob;
pub mod provider;

pub use blob::BlobStore;
pub use provider::{
    ImageGenerationProvider, ProviderAdapter, TextGenerationProvider, VisionProvider,
};
