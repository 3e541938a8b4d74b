// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for NER Studio integration tests.
//!
//! Provides scripted providers and a test harness for fast, deterministic
//! tests without vendor APIs.
//!
//! # Components
//!
//! - [`MockVision`], [`MockLlm`], [`MockImageProvider`] - scripted provider adapters
//! - [`TestHarness`] - a full generation stack over a temp SQLite database

pub mod harness;
pub mod mock_provider;

pub use harness::{TestHarness, TestHarnessBuilder, provider_record};
pub use mock_provider::{
    DEFAULT_LLM_RESPONSE, LlmStep, MockImageProvider, MockLlm, MockVision, callback_payload,
};
