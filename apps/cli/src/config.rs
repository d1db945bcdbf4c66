use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use storage::DatabaseLocation;

pub const DEFAULT_CONFIG_FILE: &str = "forage.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/forage.db".into(),
            log_filter: "info".into(),
        }
    }
}

/// Loads defaults, then the config file, then environment overrides.
///
/// An explicitly requested config file must exist; the default
/// `forage.toml` is optional.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match config_path {
        Some(path) => read_settings_file(path, true)?,
        None => read_settings_file(&PathBuf::from(DEFAULT_CONFIG_FILE), false)?,
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn read_settings_file(path: &Path, required: bool) -> anyhow::Result<Settings> {
    match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<Settings>(&raw)
            .with_context(|| format!("failed to parse config file '{}'", path.display())),
        Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
            Ok(Settings::default())
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    for key in ["APP__DATABASE_URL", "FORAGE_DATABASE_URL"] {
        if let Some(v) = lookup(key) {
            settings.database_url = v;
        }
    }

    for key in ["RUST_LOG", "FORAGE_LOG"] {
        if let Some(v) = lookup(key) {
            settings.log_filter = v;
        }
    }
}

/// Canonical connection URL for `raw`; blank input falls back to the default database.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    DatabaseLocation::parse(raw_database_url)
        .map(|location| location.to_url())
        .unwrap_or_else(|| Settings::default().database_url)
}
