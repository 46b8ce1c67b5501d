use std::fs;
use std::path::{Path, PathBuf};

use courier_core::policy::Policy;
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct CourierConfig {
    pub data_dir: PathBuf,
    pub identity: IdentityConfig,
    pub policy: Policy,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IdentityConfig {
    pub user_id: String,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_enabled")]
    pub read_receipts: bool,
    #[serde(default = "default_enabled")]
    pub media: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            read_receipts: true,
            media: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { port: 0 }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io")]
    Io,
    #[error("parse")]
    Parse,
}

pub fn load_config(path: &Path) -> Result<CourierConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|_| ConfigError::Io)?;
    toml::from_str(&content).map_err(|_| ConfigError::Parse)
}
