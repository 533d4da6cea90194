use std::{fs, io, path::Path, time::Duration};

use anyhow::Context;
use client_core::{
    config::{DEFAULT_CONTROLLER_URL, DEFAULT_SURFACE_ID},
    ClientConfig, ConfigError,
};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub controller_url: String,
    pub surface_id: String,
    pub request_timeout_ms: u64,
    pub reconnect_unit_ms: u64,
    pub log_filter: String,
    /// Connections whose string values are cast to numbers and booleans; empty means all.
    pub cast_connections: Option<Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller_url: DEFAULT_CONTROLLER_URL.into(),
            surface_id: DEFAULT_SURFACE_ID.into(),
            request_timeout_ms: 1000,
            reconnect_unit_ms: 1000,
            log_filter: "info".into(),
            cast_connections: None,
        }
    }
}

impl Settings {
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig::new(self.controller_url.clone())?
            .with_surface_id(self.surface_id.clone())
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_reconnect_unit(Duration::from_millis(self.reconnect_unit_ms)))
    }
}

/// Defaults, then the settings file if it exists, then environment overrides.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => parse_settings(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Settings::default(),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()));
        }
    };
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn parse_settings(raw: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str(raw)
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CONTROLLER_URL") {
        settings.controller_url = v;
    }
    if let Some(v) = lookup("APP__CONTROLLER_URL") {
        settings.controller_url = v;
    }

    if let Some(v) = lookup("APP__SURFACE_ID") {
        settings.surface_id = v;
    }

    if let Some(parsed) = lookup("APP__REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        settings.request_timeout_ms = parsed;
    }
    if let Some(parsed) = lookup("APP__RECONNECT_UNIT_MS").and_then(|v| v.parse().ok()) {
        settings.reconnect_unit_ms = parsed;
    }

    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
