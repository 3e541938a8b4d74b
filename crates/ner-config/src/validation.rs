// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::NerConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates a deserialized configuration, collecting every problem instead
/// of stopping at the first.
pub fn validate_config(config: &NerConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let server = &config.server;
    if server.host.trim().is_empty() {
        errors.push(ConfigError::validation("server.host must not be empty"));
    }
    if server.port == 0 {
        errors.push(ConfigError::validation("server.port must not be 0"));
    }
    if !server.callback_base_url.starts_with("http://")
        && !server.callback_base_url.starts_with("https://")
    {
        errors.push(ConfigError::validation(format!(
            "server.callback_base_url `{}` must be an http(s) URL",
            server.callback_base_url
        )));
    }
    if !LOG_LEVELS.contains(&server.log_level.as_str()) {
        errors.push(ConfigError::validation(format!(
            "server.log_level `{}` must be one of {}",
            server.log_level,
            LOG_LEVELS.join(", ")
        )));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }
    if config.blob.root_dir.trim().is_empty() {
        errors.push(ConfigError::validation("blob.root_dir must not be empty"));
    }
    if config.blob.max_upload_bytes == 0 {
        errors.push(ConfigError::validation(
            "blob.max_upload_bytes must be greater than 0",
        ));
    }

    let generation = &config.generation;
    if !(1..=10).contains(&generation.max_variations) {
        errors.push(ConfigError::validation(format!(
            "generation.max_variations must be between 1 and 10, got {}",
            generation.max_variations
        )));
    }
    if generation.default_variations < 1 || generation.default_variations > generation.max_variations
    {
        errors.push(ConfigError::validation(format!(
            "generation.default_variations must be between 1 and max_variations ({}), got {}",
            generation.max_variations, generation.default_variations
        )));
    }
    if !(0.0..=2.0).contains(&generation.temperature) {
        errors.push(ConfigError::validation(format!(
            "generation.temperature must be between 0.0 and 2.0, got {}",
            generation.temperature
        )));
    }
    if generation.image_width == 0 || generation.image_height == 0 {
        errors.push(ConfigError::validation(
            "generation.image_width and image_height must be greater than 0",
        ));
    }
    if generation.stale_after_secs == Some(0) {
        errors.push(ConfigError::validation(
            "generation.stale_after_secs must be greater than 0 when set",
        ));
    }

    if config.auth.min_password_length < 8 {
        errors.push(ConfigError::validation(format!(
            "auth.min_password_length must be at least 8, got {}",
            config.auth.min_password_length
        )));
    }

    let mut seen = HashSet::new();
    for (i, provider) in config.providers.iter().enumerate() {
        if provider.slug.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "providers[{i}].slug must not be empty"
            )));
        } else if !seen.insert(provider.slug.as_str()) {
            errors.push(ConfigError::validation(format!(
                "duplicate provider slug `{}` in [[providers]] array",
                provider.slug
            )));
        }
        if provider.model.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "providers[{i}].model must not be empty"
            )));
        }
        if !provider.adapter.supports(provider.category) {
            errors.push(ConfigError::validation(format!(
                "provider `{}`: adapter {:?} cannot serve category {}",
                provider.slug, provider.adapter, provider.category
            )));
        }
        if provider.cost_per_use < 0 {
            errors.push(ConfigError::validation(format!(
                "provider `{}`: cost_per_use must be non-negative",
                provider.slug
            )));
        }
        if provider.timeout_ms == Some(0) {
            errors.push(ConfigError::validation(format!(
                "provider `{}`: timeout_ms must be greater than 0",
                provider.slug
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    fn messages(errors: &[ConfigError]) -> Vec<String> {
        errors.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&NerConfig::default()).is_ok());
    }

    #[test]
    fn zero_port_fails_validation() {
        let mut config = NerConfig::default();
        config.server.port = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(messages(&errors).iter().any(|m| m.contains("server.port")));
    }

    #[test]
    fn variation_bounds_are_checked() {
        let mut config = NerConfig::default();
        config.generation.max_variations = 12;
        config.generation.default_variations = 0;
        let errors = validate_config(&config).unwrap_err();
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("max_variations must be")));
        assert!(msgs.iter().any(|m| m.contains("default_variations")));
    }

    #[test]
    fn duplicate_and_mismatched_providers_are_reported_together() {
        let config = load_config_from_str(
            r#"
[[providers]]
slug = "kieai-seedream"
category = "image_generation"
adapter = "kieai"
model = "seedream-v1"

[[providers]]
slug = "kieai-seedream"
category = "vision"
adapter = "gemini"
model = "gemini-2.0-flash"
"#,
        )
        .unwrap();

        let errors = validate_config(&config).unwrap_err();
        let msgs = messages(&errors);
        assert_eq!(errors.len(), 2, "{msgs:?}");
        assert!(msgs.iter().any(|m| m.contains("duplicate provider slug")));
        assert!(msgs.iter().any(|m| m.contains("cannot serve category vision")));
    }
}
