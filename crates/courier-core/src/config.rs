//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use courier_storage::StorageConfig;

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for the settings database and the per-user databases
    pub data_dir: PathBuf,
    /// Backend environment, part of every database name
    pub backend_environment: String,
    pub database_prefix: String,
    /// Model label sent when this device registers as a client
    pub device_model: String,
    /// Keep every database in memory (nothing is written to `data_dir`)
    pub in_memory: bool,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            backend_environment: "prod".to_string(),
            database_prefix: "courier".to_string(),
            device_model: default_device_model(),
            in_memory: false,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("Courier"))
            .unwrap_or_else(|| PathBuf::from(".courier"))
    }

    /// Device-wide settings database, shared by every user
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("local.db")
    }

    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        // Both end up inside '@'-separated database names
        for (field, value) in [
            ("backend_environment", &self.backend_environment),
            ("database_prefix", &self.database_prefix),
        ] {
            if value.is_empty() || value.contains('@') {
                return Err(CoreError::Config(format!(
                    "{} must be non-empty and must not contain '@': '{}'",
                    field, value
                )));
            }
        }
        Ok(())
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            data_dir: (!self.in_memory).then(|| self.data_dir.clone()),
            backend_environment: self.backend_environment.clone(),
            database_prefix: self.database_prefix.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

fn default_device_model() -> String {
    format!("Courier ({})", std::env::consts::OS)
}
