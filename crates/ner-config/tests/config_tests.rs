// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the NER Studio configuration system.

use ner_config::diagnostic::ConfigError;
use ner_config::model::AdapterKind;
use ner_config::{load_and_validate_str, load_config_from_str};
use ner_core::types::ProviderCategory;

/// A full document with every section deserializes.
#[test]
fn full_document_deserializes() {
    let toml = r#"
[server]
host = "0.0.0.0"
port = 9000
callback_base_url = "https://api.ner.example"
log_level = "debug"

[storage]
database_path = "/tmp/ner-test.db"
wal_mode = false

[blob]
root_dir = "/tmp/ner-blobs"
public_base_url = "https://cdn.ner.example"

[generation]
parallel_submissions = true
stale_after_secs = 3600

[[providers]]
slug = "kieai-gemini3"
category = "llm"
adapter = "kieai"
model = "gemini-3-pro"
priority = 0
fallback_triggers = ["timeout", "rate limit"]

[[providers]]
slug = "kieai-seedream"
name = "Seedream"
category = "image_generation"
adapter = "kieai"
model = "seedream-v1"
cost_per_use = 10
"#;

    let config = load_and_validate_str(toml).expect("valid config");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.callback_base_url, "https://api.ner.example");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.blob.public_base_url, "https://cdn.ner.example");
    assert!(config.generation.parallel_submissions);
    assert_eq!(config.generation.stale_after_secs, Some(3600));

    assert_eq!(config.providers.len(), 2);
    let llm = &config.providers[0];
    assert_eq!(llm.category, ProviderCategory::Llm);
    assert_eq!(llm.adapter, AdapterKind::Kieai);
    assert_eq!(llm.fallback_triggers, vec!["timeout", "rate limit"]);
    assert_eq!(llm.display_name(), "kieai-gemini3");

    let image = &config.providers[1];
    assert_eq!(image.display_name(), "Seedream");
    assert_eq!(image.cost_per_use, 10);
    assert_eq!(image.settings().timeout_ms, 120_000);
}

#[test]
fn unknown_key_gets_suggestion_and_span() {
    let toml = "[server]\nprot = 9000\n";
    let errors = load_and_validate_str(toml).expect_err("unknown key must be rejected");

    let unknown = errors
        .iter()
        .find_map(|e| match e {
            ConfigError::UnknownKey {
                key,
                suggestion,
                span,
                ..
            } => Some((key.clone(), suggestion.clone(), *span)),
            _ => None,
        })
        .expect("an UnknownKey diagnostic");
    assert_eq!(unknown.0, "prot");
    assert_eq!(unknown.1.as_deref(), Some("port"));
    assert!(unknown.2.is_some());
}

#[test]
fn unknown_provider_key_is_rejected() {
    let toml = r#"
[[providers]]
slug = "x"
category = "llm"
adapter = "gemini"
model = "gemini-2.0-flash"
fallback_on = ["timeout"]
"#;
    assert!(load_config_from_str(toml).is_err());
}

#[test]
fn missing_provider_model_is_reported() {
    let toml = r#"
[[providers]]
slug = "x"
category = "llm"
adapter = "gemini"
"#;
    let errors = load_and_validate_str(toml).expect_err("model is required");
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::MissingKey { key } if key == "model"))
    );
}

#[test]
fn unknown_category_is_invalid() {
    let toml = r#"
[[providers]]
slug = "x"
category = "audio"
adapter = "gemini"
model = "m"
"#;
    assert!(load_and_validate_str(toml).is_err());
}

#[test]
fn semantic_errors_are_collected() {
    let toml = r#"
[server]
port = 0
log_level = "loud"

[generation]
temperature = 3.5
"#;
    let errors = load_and_validate_str(toml).expect_err("three problems");
    assert_eq!(errors.len(), 3);
}
