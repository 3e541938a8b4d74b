// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splits an LLM response into individual image prompts.
//!
//! The response is split on the first separator tier that yields more than
//! one usable segment: blank lines, then single line breaks, then
//! semicolons. Otherwise the whole text is a single prompt. Every segment is
//! cleaned of list markers. All returned prompts borrow from the input.

use std::sync::LazyLock;

use regex::Regex;

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[ \t]*\r?\n").expect("blank line pattern compiles"));

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n").expect("line break pattern compiles"));

/// A leading enumerator (`1.`, `12)`) or bullet (`-`, `•`, `* `).
///
/// Enumerators must be followed by whitespace or end the segment, so
/// `3.5mm lens` is left alone. `*` needs trailing whitespace so markdown
/// emphasis survives.
static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+[.)](?:\s+|$)|[-•]\s*|\*(?:\s+|$))").expect("list marker pattern compiles")
});

/// Splits raw LLM text into ordered, cleaned prompts. Never yields empty strings.
pub fn split_prompts(text: &str) -> Vec<&str> {
    for tier in [&*BLANK_LINE, &*LINE_BREAK] {
        let segments = clean_all(tier.split(text));
        if segments.len() > 1 {
            return segments;
        }
    }
    let segments = clean_all(text.split(';'));
    if segments.len() > 1 {
        return segments;
    }

    let whole = clean_prompt(text);
    if whole.is_empty() { Vec::new() } else { vec![whole] }
}

/// Trims a segment and strips list markers until none is left.
///
/// Repeating to a fixpoint makes this idempotent: `clean_prompt(clean_prompt(x)) == clean_prompt(x)`.
pub fn clean_prompt(segment: &str) -> &str {
    let mut current = segment.trim();
    while let Some(marker) = LIST_MARKER.find(current) {
        current = current[marker.end()..].trim();
    }
    current
}

fn clean_all<'a>(segments: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    segments
        .map(clean_prompt)
        .filter(|s| !s.is_empty())
        .collect()
}
