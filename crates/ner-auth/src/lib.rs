// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authentication and tenancy for NER Studio.
//!
//! Passwords are hashed with Argon2id. API tokens are opaque random strings
//! whose SHA-256 digest is stored with an expiry; the plaintext is shown to
//! the client once at login.

pub mod password;
pub mod service;
pub mod slug;
pub mod token;

pub use service::{AuthService, Identity, RegisterRequest, Registration, Session};
