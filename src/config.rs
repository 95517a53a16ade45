//! Service configuration, read once at startup from a JSON file.
//!
//! ```json
//! { "remote": "http://origin.example/objects", "pool": "/var/pool", "fetcher": "[::]:50051" }
//! ```
//!
//! `remote`, `pool` and `fetcher` are required. An optional `transfer` array
//! overrides the transfer command template. Other keys belong to the rest of
//! merklefs and are ignored here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::service::ServiceConfig;
use crate::transfer::CommandTransfer;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/merklefs/config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config {} is missing required key {key:?}", path.display())]
    Missing { path: PathBuf, key: &'static str },
    #[error("config {} has an empty \"transfer\" command", path.display())]
    EmptyTransfer { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub remote: String,
    pub pool: String,
    pub fetcher: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct RawConfig {
    remote: Option<String>,
    pool: Option<String>,
    fetcher: Option<String>,
    #[serde(default)]
    transfer: Option<Vec<String>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Parse config text. `path` is only used for error messages.
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let required = |value: Option<String>, key: &'static str| match value {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(ConfigError::Missing {
                path: path.to_path_buf(),
                key,
            }),
        };

        let config = Config {
            remote: required(raw.remote, "remote")?,
            pool: required(raw.pool, "pool")?,
            fetcher: required(raw.fetcher, "fetcher")?,
            transfer: raw.transfer,
        };

        if let Some(template) = &config.transfer {
            if CommandTransfer::from_template(template).is_none() {
                return Err(ConfigError::EmptyTransfer {
                    path: path.to_path_buf(),
                });
            }
        }

        Ok(config)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            remote: self.remote.clone(),
            pool: self.pool.clone(),
        }
    }

    pub fn command_transfer(&self) -> CommandTransfer {
        self.transfer
            .as_deref()
            .and_then(CommandTransfer::from_template)
            .unwrap_or_default()
    }
}
