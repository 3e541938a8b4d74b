// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for NER Studio.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use ner_core::types::{ProviderCategory, ProviderSettings};
use serde::{Deserialize, Serialize};

/// Top-level NER Studio configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with `NER_*`
/// environment variable overrides. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NerConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Blob storage settings for uploads and produced images.
    #[serde(default)]
    pub blob: BlobConfig,

    /// Generation pipeline tuning.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Vendor integrations, one entry per `[[providers]]` table.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL vendors use to reach `/api/v1/callbacks/{slug}`.
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds in-flight pipelines get to finish after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            callback_base_url: default_callback_base_url(),
            log_level: default_log_level(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_callback_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("ner").join("ner.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("ner.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BlobConfig {
    /// Directory objects are written below.
    #[serde(default = "default_blob_root")]
    pub root_dir: String,

    /// URL prefix objects are served from.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Largest accepted upload in bytes (default: 10 MiB).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Copy produced images into blob storage when callbacks arrive.
    #[serde(default = "default_archive_generated")]
    pub archive_generated: bool,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root_dir: default_blob_root(),
            public_base_url: default_public_base_url(),
            max_upload_bytes: default_max_upload_bytes(),
            archive_generated: default_archive_generated(),
        }
    }
}

fn default_blob_root() -> String {
    dirs::data_dir()
        .map(|p| p.join("ner").join("blobs"))
        .unwrap_or_else(|| std::path::PathBuf::from("blobs"))
        .to_string_lossy()
        .into_owned()
}

fn default_public_base_url() -> String {
    "http://localhost:8080/files".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_archive_generated() -> bool {
    true
}

/// Generation pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    /// Variations used when a request omits `num_variations` or sends < 1.
    #[serde(default = "default_variations")]
    pub default_variations: u32,

    /// Upper clamp for `num_variations`.
    #[serde(default = "default_max_variations")]
    pub max_variations: u32,

    /// LLM sampling temperature for prompt expansion.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// LLM token budget for prompt expansion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_image_size")]
    pub image_width: u32,

    #[serde(default = "default_image_size")]
    pub image_height: u32,

    /// Submit a job's image tasks concurrently instead of one after another.
    #[serde(default)]
    pub parallel_submissions: bool,

    /// Fail images still waiting for a callback after this many seconds.
    /// `None` disables the reaper.
    #[serde(default)]
    pub stale_after_secs: Option<u64>,

    /// How often the reaper sweeps for stale jobs.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_variations: default_variations(),
            max_variations: default_max_variations(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            image_width: default_image_size(),
            image_height: default_image_size(),
            parallel_submissions: false,
            stale_after_secs: None,
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

fn default_variations() -> u32 {
    4
}

fn default_max_variations() -> u32 {
    10
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_image_size() -> u32 {
    1024
}

fn default_reaper_interval_secs() -> u64 {
    60
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Lifetime of issued API tokens in hours.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,

    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_token_ttl_hours(),
            min_password_length: default_min_password_length(),
        }
    }
}

fn default_token_ttl_hours() -> u64 {
    720
}

fn default_min_password_length() -> usize {
    8
}

/// Which vendor wire protocol a provider entry speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Openai,
    Gemini,
    Kieai,
}

impl AdapterKind {
    /// Categories this adapter can serve.
    pub fn supports(self, category: ProviderCategory) -> bool {
        match self {
            Self::Openai => category == ProviderCategory::Vision,
            Self::Gemini => category == ProviderCategory::Llm,
            Self::Kieai => matches!(
                category,
                ProviderCategory::Llm | ProviderCategory::ImageGeneration
            ),
        }
    }
}

/// A single `[[providers]]` entry.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Stable routing identity, also the callback path segment.
    pub slug: String,

    /// Display name. Defaults to the slug.
    #[serde(default)]
    pub name: Option<String>,

    pub category: ProviderCategory,

    pub adapter: AdapterKind,

    /// Vendor model identifier.
    pub model: String,

    /// Vendor API key. Falls back to the adapter's environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Override of the vendor base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Lower is tried first.
    #[serde(default)]
    pub priority: i32,

    /// Credits charged per produced image.
    #[serde(default)]
    pub cost_per_use: i64,

    /// Request timeout. Defaults to 60s, or 120s for image generation.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Retries for transient vendor failures (429/5xx).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Error substrings that permit falling back to the next LLM provider.
    #[serde(default)]
    pub fallback_triggers: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("slug", &self.slug)
            .field("category", &self.category)
            .field("adapter", &self.adapter)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("priority", &self.priority)
            .field("cost_per_use", &self.cost_per_use)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("fallback_triggers", &self.fallback_triggers)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ProviderConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.slug)
    }

    /// Configured timeout, or the category default.
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(match self.category {
            ProviderCategory::ImageGeneration => 120_000,
            ProviderCategory::Vision | ProviderCategory::Llm => 60_000,
        })
    }

    /// Call policy carried into the provider record.
    pub fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            timeout_ms: self.effective_timeout_ms(),
            max_retries: self.max_retries,
            fallback_triggers: self.fallback_triggers.clone(),
        }
    }
}

fn default_max_retries() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(category: ProviderCategory, adapter: AdapterKind) -> ProviderConfig {
        toml::from_str(&format!(
            "slug = \"p\"\ncategory = \"{category}\"\nadapter = \"{}\"\nmodel = \"m\"\n",
            match adapter {
                AdapterKind::Openai => "openai",
                AdapterKind::Gemini => "gemini",
                AdapterKind::Kieai => "kieai",
            }
        ))
        .unwrap()
    }

    #[test]
    fn timeout_defaults_depend_on_category() {
        let llm = provider(ProviderCategory::Llm, AdapterKind::Gemini);
        assert_eq!(llm.effective_timeout_ms(), 60_000);

        let image = provider(ProviderCategory::ImageGeneration, AdapterKind::Kieai);
        assert_eq!(image.effective_timeout_ms(), 120_000);
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut cfg = provider(ProviderCategory::Llm, AdapterKind::Kieai);
        cfg.api_key = Some("sk-secret".into());
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn adapter_category_support() {
        assert!(AdapterKind::Openai.supports(ProviderCategory::Vision));
        assert!(!AdapterKind::Openai.supports(ProviderCategory::Llm));
        assert!(AdapterKind::Gemini.supports(ProviderCategory::Llm));
        assert!(AdapterKind::Kieai.supports(ProviderCategory::ImageGeneration));
        assert!(!AdapterKind::Kieai.supports(ProviderCategory::Vision));
    }

    #[test]
    fn generation_defaults_match_pipeline_constants() {
        let cfg = GenerationConfig::default();
        assert_eq!(cfg.default_variations, 4);
        assert_eq!(cfg.max_variations, 10);
        assert_eq!(cfg.max_tokens, 2000);
        assert!((cfg.temperature - 0.8).abs() < f32::EPSILON);
        assert_eq!((cfg.image_width, cfg.image_height), (1024, 1024));
        assert!(cfg.stale_after_secs.is_none());
    }
}
