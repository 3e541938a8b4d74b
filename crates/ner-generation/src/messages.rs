// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM message construction for prompt expansion.

use std::fmt::Write;

use ner_core::types::{ChatMessage, VisionAnalysis};

const SYSTEM_PROMPT: &str = "You are a creative prompt engineer for AI image generation. \
Given a base prompt and optional reference image analysis, \
generate 4-6 detailed, creative variations of prompts. \
Each prompt should be unique and optimized for image generation.\n\n\
Format: Separate each prompt with a blank line (double newline).";

/// Builds the system and user messages asking for prompt variations.
///
/// Reference image analyses, if any, are appended to the system message in
/// the order the images were supplied.
pub fn build_messages(base_prompt: &str, analyses: &[VisionAnalysis]) -> Vec<ChatMessage> {
    let mut system = String::from(SYSTEM_PROMPT);
    if !analyses.is_empty() {
        system.push_str("\n\nReference Image Analysis:\n");
        for (i, analysis) in analyses.iter().enumerate() {
            // Writing into a String cannot fail.
            let _ = write!(
                system,
                "Image {}: {}\nStyle Notes: {}\n",
                i + 1,
                analysis.description,
                analysis.style_notes
            );
        }
    }

    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!(
            "Base Prompt: {base_prompt}\n\nGenerate 4-6 creative variations:"
        )),
    ]
}
