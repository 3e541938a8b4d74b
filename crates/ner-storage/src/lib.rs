// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for NER Studio.
//!
//! WAL-mode SQLite with embedded migrations and a single-writer model via
//! `tokio-rusqlite`. Query modules cover tenancy, providers, and generation
//! jobs; the credit ledger lives in `ner-credits` on the same connection.

pub mod codec;
pub mod database;
pub mod migrations;
pub mod queries;

pub use database::{Database, map_tr_err};
