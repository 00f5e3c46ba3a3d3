use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::PitwallError;

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR: &str = "pitwall";

pub const TICK_INTERVAL_MS: u64 = 500;
pub const OFFLINE_RETRY_MS: u64 = 1000;
pub const SETTLE_DELAY_MS: u64 = 800;
pub const PUSH_TIMEOUT_MS: u64 = 500;
pub const HEARTBEAT_INTERVAL_MS: u64 = 2000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub tick_interval_ms: u64,
    pub offline_retry_ms: u64,
    pub settle_delay_ms: u64,
    pub push_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Session id all team members push under
    pub session_id: String,
    /// Append endpoint of the session registry, e.g. http://host:8000/telemetry
    pub remote_url: Option<String>,
    pub log_dir: PathBuf,
    pub status_file_name: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: TICK_INTERVAL_MS,
            offline_retry_ms: OFFLINE_RETRY_MS,
            settle_delay_ms: SETTLE_DELAY_MS,
            push_timeout_ms: PUSH_TIMEOUT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            session_id: "default".to_string(),
            remote_url: None,
            log_dir: default_log_dir(),
            status_file_name: "status.json".to_string(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

impl CaptureConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn offline_retry(&self) -> Duration {
        Duration::from_millis(self.offline_retry_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn status_path(&self) -> PathBuf {
        self.log_dir.join(&self.status_file_name)
    }

    fn config_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join(APP_DIR).join(CONFIG_FILE_NAME))
    }

    /// Load the saved config. A missing file is not an error.
    pub fn from_local_file() -> Result<Option<Self>, PitwallError> {
        let Some(config_path) = Self::config_path() else {
            return Ok(None);
        };
        if !config_path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(config_path)
            .map_err(|e| PitwallError::ConfigIOError { source: e })?;
        serde_json::from_reader(file)
            .map(Some)
            .map_err(|e| PitwallError::ConfigParseError { source: e })
    }

    pub fn save(&self) -> Result<(), PitwallError> {
        let config_path = Self::config_path().ok_or(PitwallError::NoConfigDir)?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PitwallError::ConfigIOError { source: e })?;
        }

        let file = std::fs::File::create(config_path)
            .map_err(|e| PitwallError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| PitwallError::ConfigSerializeError { source: e })
    }
}
