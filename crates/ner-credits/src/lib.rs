// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credit accounting for NER Studio.
//!
//! - **Ledger**: atomic deductions and grants, each paired with an
//!   append-only ledger entry
//! - **Pricing**: variation clamping, estimates, and completed-share billing
//! - **Settlement**: exactly-once job finalization with its debit

pub mod ledger;
pub mod pricing;
pub mod settlement;

pub use ledger::{CreditLedger, LedgerAudit};
pub use settlement::{Settlement, settle_generation};
