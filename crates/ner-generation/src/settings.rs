// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tunables of the generation pipeline, resolved from configuration.

use std::time::Duration;

use ner_config::model::NerConfig;

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub default_variations: u32,
    pub max_variations: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub parallel_submissions: bool,
    /// Public base URL vendors call back to, without a trailing slash.
    pub callback_base_url: String,
    /// Age after which unfinished images are failed by the reaper.
    pub stale_after: Option<Duration>,
    pub reaper_interval: Duration,
}

impl GenerationSettings {
    pub fn from_config(config: &NerConfig) -> Self {
        let generation = &config.generation;
        Self {
            default_variations: generation.default_variations,
            max_variations: generation.max_variations,
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
            image_width: generation.image_width,
            image_height: generation.image_height,
            parallel_submissions: generation.parallel_submissions,
            callback_base_url: config
                .server
                .callback_base_url
                .trim_end_matches('/')
                .to_string(),
            stale_after: generation.stale_after_secs.map(Duration::from_secs),
            reaper_interval: Duration::from_secs(generation.reaper_interval_secs.max(1)),
        }
    }

    /// Webhook URL handed to the image provider with slug `slug`.
    pub fn callback_url(&self, slug: &str) -> String {
        format!("{}/api/v1/callbacks/{slug}", self.callback_base_url)
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&NerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_config_defaults() {
        let settings = GenerationSettings::default();
        assert_eq!(settings.default_variations, 4);
        assert_eq!(settings.max_variations, 10);
        assert!(!settings.parallel_submissions);
        assert!(settings.stale_after.is_none());
        assert_eq!(settings.reaper_interval, Duration::from_secs(60));
    }

    #[test]
    fn callback_url_has_single_slash() {
        let mut config = NerConfig::default();
        config.server.callback_base_url = "https://ner.example.com/".into();
        config.generation.stale_after_secs = Some(900);
        let settings = GenerationSettings::from_config(&config);
        assert_eq!(
            settings.callback_url("kieai-seedream"),
            "https://ner.example.com/api/v1/callbacks/kieai-seedream"
        );
        assert_eq!(settings.stale_after, Some(Duration::from_secs(900)));
    }
}
