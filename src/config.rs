use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "rf4s-link";

/// How to reach the bot and how hard to retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Connect as soon as the monitor starts
    pub auto_connect: bool,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Wait after a failed connect attempt
    pub retry_backoff_ms: u64,
    /// Wait after an established connection drops
    pub reconnect_delay_ms: u64,
    pub status_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8888,
            auto_connect: true,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 1_000,
            retry_backoff_ms: 2_000,
            reconnect_delay_ms: 5_000,
            status_interval_ms: 1_000,
        }
    }
}

impl ConnectionConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
}

impl Config {
    /// Directory holding the config file and the log
    pub fn dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("unable to locate OS config directory")?
            .join(APP_DIR))
    }

    /// Load the user's config, writing defaults on first run
    pub fn load_or_create() -> Result<(Self, PathBuf)> {
        let config_dir = Self::dir()?;
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("failed creating config dir at {}", config_dir.display()))?;

        let config_path = config_dir.join("config.json");
        if !config_path.exists() {
            let default = Self::default();
            default.save(&config_path)?;
            return Ok((default, config_path));
        }

        let config = Self::load(&config_path)?;
        Ok((config, config_path))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("failed parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_string_pretty(self).context("failed serializing config")?;
        fs::write(path, payload).with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"connection":{"port":12345}}"#).expect("valid config");
        assert_eq!(config.connection.port, 12345);
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.retry_backoff(), Duration::from_secs(2));
        assert_eq!(config.connection.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.connection.address(), "localhost:12345");
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("rf4s-link-config-{}.json", std::process::id()));
        let mut config = Config::default();
        config.connection.host = "10.0.0.7".to_string();
        config.connection.auto_connect = false;

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_reports_bad_json() {
        let path = std::env::temp_dir().join(format!("rf4s-link-bad-{}.json", std::process::id()));
        fs::write(&path, "{not json").unwrap();
        let err = Config::load(&path).unwrap_err();
        let _ = fs::remove_file(&path);

        assert!(err.to_string().contains("failed parsing"));
    }
}
