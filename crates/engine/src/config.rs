use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;
use warden_store::DEFAULT_PROMPT_TIMEOUT;

use crate::error::{Error, Result};

const DEFAULT_LOG_FILTER: &str = "info";

/// Host settings read from `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Version the host reports when checking extension compatibility.
    pub host_version: String,
    /// Root for persisted extension state, grants and installed versions.
    pub data_dir: PathBuf,
    pub prompt_timeout_secs: u64,
    /// Used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: get_default_data_dir(),
            prompt_timeout_secs: DEFAULT_PROMPT_TIMEOUT.as_secs(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl HostConfig {
    pub fn get_config_path() -> PathBuf {
        get_default_config_dir().join("config.json")
    }

    /// Read the config at `path`. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let config: HostConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Config(format!("failed to create {}: {e}", parent.display())))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)
            .await
            .map_err(|e| Error::Config(format!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.host_semver()?;
        if self.prompt_timeout_secs == 0 {
            return Err(Error::Config(
                "prompt_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn host_semver(&self) -> Result<Version> {
        Version::parse(self.host_version.trim()).map_err(|e| {
            Error::Config(format!("invalid host_version '{}': {e}", self.host_version))
        })
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "host_version" => self.host_version = value.to_string(),
            "data_dir" => self.data_dir = PathBuf::from(value),
            "prompt_timeout_secs" => {
                self.prompt_timeout_secs = value
                    .parse()
                    .map_err(|_| Error::Config(format!("Invalid number: {value}")))?;
            }
            "log_filter" => self.log_filter = value.to_string(),
            _ => return Err(Error::Config(format!("Unknown configuration key: {key}"))),
        }
        self.validate()
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let value = match key {
            "host_version" => self.host_version.clone(),
            "data_dir" => self.data_dir.display().to_string(),
            "prompt_timeout_secs" => self.prompt_timeout_secs.to_string(),
            "log_filter" => self.log_filter.clone(),
            _ => return Err(Error::Config(format!("Unknown configuration key: {key}"))),
        };
        Ok(value)
    }
}

fn get_default_config_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("org", "warden", "warden") {
        proj_dirs.config_dir().to_path_buf()
    } else {
        PathBuf::from(".warden").join("config")
    }
}

fn get_default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("org", "warden", "warden") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".warden").join("data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = HostConfig::load(dir.path().join("config.json")).await.unwrap();

        assert_eq!(config, HostConfig::default());
        assert_eq!(config.prompt_timeout(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn save_then_load_keeps_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = HostConfig::default();
        config.set_value("host_version", "2.4.0").unwrap();
        config.set_value("prompt_timeout_secs", "15").unwrap();
        config.save(&path).await.unwrap();

        let loaded = HostConfig::load(&path).await.unwrap();
        assert_eq!(loaded.host_semver().unwrap(), Version::new(2, 4, 0));
        assert_eq!(loaded.get_value("prompt_timeout_secs").unwrap(), "15");
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "host_version": "3.0.0" }"#).await.unwrap();

        let config = HostConfig::load(&path).await.unwrap();
        assert_eq!(config.host_version, "3.0.0");
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = HostConfig::default();
        assert!(config.set_value("prompt_timeout_secs", "soon").is_err());
        assert!(config.set_value("prompt_timeout_secs", "0").is_err());
        assert!(config.set_value("host_version", "latest").is_err());
        assert!(config.get_value("theme").is_err());
    }
}
