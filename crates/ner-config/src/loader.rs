// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::NerConfig;

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/ner/ner.toml";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "ner.toml";

/// Per-user config location (`~/.config/ner/ner.toml`).
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ner").join("ner.toml"))
}

/// Loads configuration from the standard hierarchy.
///
/// Merge order (later overrides earlier): compiled defaults, the system file,
/// the user file, `./ner.toml`, then `NER_*` environment variables.
pub fn load_config() -> Result<NerConfig, figment::Error> {
    build_figment().extract()
}

/// Loads defaults, one explicit file, then environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<NerConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(NerConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Loads defaults plus an inline TOML document, ignoring files and environment.
pub fn load_config_from_str(toml_content: &str) -> Result<NerConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(NerConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// The Figment behind [`load_config`], before extraction.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(NerConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH));
    if let Some(user) = user_config_path() {
        figment = figment.merge(Toml::file(user));
    }
    figment
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// Maps `NER_SECTION_KEY` to `section.key`.
///
/// Only the section prefix is rewritten, so `NER_SERVER_CALLBACK_BASE_URL`
/// becomes `server.callback_base_url` and not `server.callback.base.url`.
/// Providers are an array and cannot be overridden from the environment.
fn env_provider() -> Env {
    const SECTIONS: [&str; 5] = ["server", "storage", "blob", "generation", "auth"];

    Env::prefixed("NER_").map(|key| {
        let key = key.as_str();
        SECTIONS
            .iter()
            .find_map(|section| {
                key.strip_prefix(section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| format!("{section}.{rest}"))
            })
            .unwrap_or_else(|| key.to_string())
            .into()
    })
}
