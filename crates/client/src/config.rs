//! Client configuration
//!
//! Resolved from: explicit path > `LEGION_CONFIG` env > `<data dir>/config.toml`,
//! where the data dir is whatever the host resolved through [`data_dir`]. A
//! missing file means defaults. `LEGION_BASE_URL` overrides `base_url` after the file is read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    /// Derived from `base_url` when unset
    pub ws_base_url: Option<String>,
    pub heartbeat_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub close_timeout_ms: u64,
    pub history_limit: usize,
    pub sync_window: usize,
    pub sync_overlap: usize,
    pub auto_start_poll_interval_ms: u64,
    pub auto_start_max_polls: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ws_base_url: None,
            heartbeat_timeout_ms: 10_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 10,
            close_timeout_ms: 2_000,
            history_limit: 10_000,
            sync_window: 500,
            sync_overlap: 50,
            auto_start_poll_interval_ms: 500,
            auto_start_max_polls: 20,
        }
    }
}

impl ClientConfig {
    /// Load config following the documented resolution order.
    pub fn load(explicit: Option<&Path>, data_dir: &Path) -> Result<Self> {
        let path = config_path(explicit, std::env::var("LEGION_CONFIG").ok(), data_dir);

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("LEGION_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url.trim().to_string();
            }
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw).map_err(|e| match e {
            ClientError::Config(msg) => ClientError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// REST base without trailing slash
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// WebSocket base without trailing slash
    pub fn ws_base(&self) -> String {
        if let Some(explicit) = self.ws_base_url.as_deref() {
            return explicit.trim_end_matches('/').to_string();
        }
        let base = self.api_base();
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn auto_start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.auto_start_poll_interval_ms)
    }
}

fn config_path(explicit: Option<&Path>, env_config: Option<String>, data_dir: &Path) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    match env_config {
        Some(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => data_dir.join("config.toml"),
    }
}

/// Data directory: `explicit` > `LEGION_DATA_DIR` > `~/.legion` (falls back to
/// the temp dir when no home directory exists).
pub fn data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(value) = std::env::var("LEGION_DATA_DIR") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".legion")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            base_url = "https://legion.example.com/"
            heartbeat_timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.api_base(), "https://legion.example.com");
        assert_eq!(config.ws_base(), "wss://legion.example.com");
        assert_eq!(config.heartbeat_timeout(), Duration::from_millis(2500));
        assert_eq!(config.history_limit, 10_000);
        assert_eq!(config.close_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn explicit_ws_base_wins() {
        let config = ClientConfig {
            ws_base_url: Some("ws://other:9000/".to_string()),
            ..Default::default()
        };
        assert_eq!(config.ws_base(), "ws://other:9000");
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = ClientConfig::from_toml("heartbeat_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn loads_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_reconnect_attempts = 3\nsync_window = 50\n").unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.sync_window, 50);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn config_is_read_from_the_given_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "sync_window = 42\n").unwrap();

        assert_eq!(config_path(None, None, dir.path()), dir.path().join("config.toml"));
        let config = ClientConfig::load(None, dir.path()).unwrap();
        assert_eq!(config.sync_window, 42);
    }

    #[test]
    fn config_path_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.toml");
        assert_eq!(
            config_path(Some(&explicit), Some("/env.toml".to_string()), dir.path()),
            explicit
        );
        assert_eq!(
            config_path(None, Some("/env.toml".to_string()), dir.path()),
            PathBuf::from("/env.toml")
        );
        assert_eq!(
            config_path(None, Some(" ".to_string()), dir.path()),
            dir.path().join("config.toml")
        );
    }

    #[test]
    fn missing_file_in_data_dir_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent.toml");
        let config = ClientConfig::load(Some(&absent), dir.path()).unwrap();
        assert_eq!(config.sync_window, ClientConfig::default().sync_window);
    }

    #[test]
    fn explicit_data_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(data_dir(Some(dir.path())), dir.path());
    }
}
