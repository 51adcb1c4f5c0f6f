//! TOML configuration for a harvest.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::harvest::constellation::EnumerationPolicy;
use crate::model::SosService;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub harvest: HarvestSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub url: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSettings {
    #[serde(default)]
    pub policy: EnumerationPolicy,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            policy: EnumerationPolicy::default(),
            concurrency: default_concurrency(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_version() -> String {
    "2.0.0".to_string()
}

fn default_concurrency() -> usize {
    8
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_level() -> String {
    "info".to_string()
}

impl HarvestConfig {
    /// Parses and validates a configuration.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: HarvestConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Invalid {
            message: message.to_string(),
        };
        if self.service.url.trim().is_empty() {
            return Err(invalid("service.url must not be empty"));
        }
        if self.harvest.concurrency == 0 {
            return Err(invalid("harvest.concurrency must be at least 1"));
        }
        if self.harvest.timeout_ms == 0 {
            return Err(invalid("harvest.timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Service reference described by this configuration.
    pub fn sos_service(&self) -> SosService {
        let service = SosService::new(self.service.url.trim(), self.service.version.clone());
        match &self.service.title {
            Some(title) => service.with_label(title.clone()),
            None => service,
        }
    }
}
