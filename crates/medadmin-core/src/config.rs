use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    MAX_RECONNECT_ATTEMPTS, MESSAGE_PAGE_SIZE, NOTIFICATION_DURATION, STATISTICS_TTL,
};

/// Session configuration that can be loaded from a JSON file.
///
/// Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Base URL of the REST API, without trailing slash
    pub api_base_url: String,

    /// WebSocket URL of the notifications hub
    pub notification_hub_url: String,

    /// WebSocket URL of the chat hub
    pub chat_hub_url: String,

    /// Directory holding the persisted session snapshot
    pub data_dir: PathBuf,

    pub statistics_ttl_secs: u64,

    /// Auto-removal delay for non-persistent notifications
    pub notification_duration_ms: u64,

    pub message_page_size: u32,

    pub max_reconnect_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_string(),
            notification_hub_url: "ws://localhost:5000/hubs/notifications".to_string(),
            chat_hub_url: "ws://localhost:5000/hubs/chat".to_string(),
            data_dir: default_data_dir(),
            statistics_ttl_secs: STATISTICS_TTL.as_secs(),
            notification_duration_ms: NOTIFICATION_DURATION.as_millis() as u64,
            message_page_size: MESSAGE_PAGE_SIZE,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("medadmin"))
        .unwrap_or_else(|| PathBuf::from("medadmin_data"))
}

impl SyncConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: SyncConfig =
            serde_json::from_str(json).context("Failed to deserialize config")?;
        Ok(config.normalized())
    }

    pub fn statistics_ttl(&self) -> Duration {
        Duration::from_secs(self.statistics_ttl_secs)
    }

    pub fn notification_duration(&self) -> Duration {
        Duration::from_millis(self.notification_duration_ms)
    }

    fn normalized(mut self) -> Self {
        while self.api_base_url.ends_with('/') {
            self.api_base_url.pop();
        }
        if self.message_page_size == 0 {
            self.message_page_size = MESSAGE_PAGE_SIZE;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_minimal() {
        let config = SyncConfig::from_json("{}").unwrap();
        assert_eq!(config.statistics_ttl(), Duration::from_secs(300));
        assert_eq!(config.notification_duration(), Duration::from_millis(5000));
        assert_eq!(config.message_page_size, 50);
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_parse_config_with_urls() {
        let json = r#"{
            "apiBaseUrl": "https://admin.example.com/",
            "chatHubUrl": "wss://admin.example.com/hubs/chat",
            "dataDir": "/tmp/medadmin-test",
            "statisticsTtlSecs": 60,
            "messagePageSize": 0
        }"#;
        let config = SyncConfig::from_json(json).unwrap();
        assert_eq!(config.api_base_url, "https://admin.example.com");
        assert_eq!(config.chat_hub_url, "wss://admin.example.com/hubs/chat");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/medadmin-test"));
        assert_eq!(config.statistics_ttl(), Duration::from_secs(60));
        assert_eq!(config.message_page_size, 50);
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let err = SyncConfig::load(Path::new("/nonexistent/medadmin.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/medadmin.json"));
    }
}
