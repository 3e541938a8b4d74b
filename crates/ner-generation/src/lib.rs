// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generation pipeline for NER Studio.
//!
//! - **Prompts**: splitting and cleaning LLM output into image prompts
//! - **Messages**: the prompt-engineering conversation sent to the LLM
//! - **Fallback**: priority-ordered LLM attempts with trigger-based fallback
//! - **Service**: the orchestrator driving jobs from submission to settlement

pub mod fallback;
pub mod messages;
pub mod prompts;
pub mod service;
pub mod settings;

pub use fallback::{FallbackError, FallbackOutcome, generate_with_fallback, should_fallback};
pub use prompts::{clean_prompt, split_prompts};
pub use service::{CANCELLED_MESSAGE, GenerationService, STALE_MESSAGE};
pub use settings::GenerationSettings;
