// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Blob storage for uploads and generated images.

pub mod archive;
pub mod fs;
pub mod key;
pub mod upload;

pub use archive::{ArchivedImage, ImageArchiver};
pub use fs::FsBlobStore;
pub use key::object_key;
pub use upload::{UploadFolder, UploadResult, UploadService};
