// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP API for NER Studio.
//!
//! Exposes registration and login, generation submission and lookup, image
//! uploads, provider listing, credit balances, and the public vendor webhook
//! endpoints that drive callback reconciliation.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

pub use error::{ApiError, ErrorResponse};
pub use server::{AppState, build_router, serve};
