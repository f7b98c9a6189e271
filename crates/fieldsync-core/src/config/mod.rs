//! Runtime configuration for a sync node.
//!
//! Provides the `SyncConfig` struct shared by the CLI and embedding apps. Values
//! come from defaults, then an optional JSON file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transfer::CHUNK_SIZE;
use crate::util::normalize_text_option;

pub const CONFIG_FILE_NAME: &str = "fieldsync.json";
pub const DEFAULT_SERVICE_ID: &str = "fieldsync.inventory";
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:47800";

const ENV_DEVICE_NAME: &str = "FIELDSYNC_DEVICE_NAME";
const ENV_STORAGE_ROOT: &str = "FIELDSYNC_STORAGE_ROOT";
const ENV_LISTEN_ADDR: &str = "FIELDSYNC_LISTEN_ADDR";

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Stable identifier of this device, stamped on every snapshot.
    pub device_id: String,
    /// Human-readable name advertised to peers.
    pub device_name: String,
    /// Service id used for advertising and discovery.
    pub service_id: String,
    /// Private storage root; attachment paths are relative to it.
    pub storage_root: PathBuf,
    /// `SQLite` store location. `None` means `<storage_root>/fieldsync.db`.
    pub database_path: Option<PathBuf>,
    /// Chunk size in bytes for the streaming file path.
    pub chunk_size: usize,
    /// Delay between a successful connection and the first `sync_request`.
    pub settle_delay_ms: u64,
    /// Delay before retrying a failed advertise or discovery start.
    pub retry_delay_ms: u64,
    /// Evict incomplete incoming files idle for longer than this. `None` disables eviction.
    pub receive_idle_timeout_ms: Option<u64>,
    /// TCP listen address used by the LAN transport.
    pub listen_addr: String,
    /// Known peer addresses reported by LAN discovery.
    pub peers: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            device_name: "Device".to_string(),
            service_id: DEFAULT_SERVICE_ID.to_string(),
            storage_root: default_storage_root(),
            database_path: None,
            chunk_size: CHUNK_SIZE,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            receive_idle_timeout_ms: None,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            peers: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration rooted at the given storage directory.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self.device_name = device_name.into();
        self
    }

    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub const fn with_settle_delay(mut self, millis: u64) -> Self {
        self.settle_delay_ms = millis;
        self
    }

    #[must_use]
    pub const fn with_retry_delay(mut self, millis: u64) -> Self {
        self.retry_delay_ms = millis;
        self
    }

    #[must_use]
    pub const fn with_receive_idle_timeout(mut self, millis: Option<u64>) -> Self {
        self.receive_idle_timeout_ms = millis;
        self
    }

    #[must_use]
    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    /// Load from a JSON file; a missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("Failed to read config at {}: {error}", path.display()))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::Config(format!("Failed to parse config at {}: {error}", path.display()))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut normalized = self.clone();
        normalized.normalize();
        std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
        Ok(())
    }

    /// Apply `FIELDSYNC_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(name) = normalize_text_option(std::env::var(ENV_DEVICE_NAME).ok()) {
            self.device_name = name;
        }
        if let Some(root) = normalize_text_option(std::env::var(ENV_STORAGE_ROOT).ok()) {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(addr) = normalize_text_option(std::env::var(ENV_LISTEN_ADDR).ok()) {
            self.listen_addr = addr;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(Error::Config("device_id must not be empty".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.storage_root.join("fieldsync.db"))
    }

    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn receive_idle_timeout(&self) -> Option<Duration> {
        self.receive_idle_timeout_ms.map(Duration::from_millis)
    }

    fn normalize(&mut self) {
        self.device_id = self.device_id.trim().to_string();
        self.device_name = normalize_text_option(Some(self.device_name.clone()))
            .unwrap_or_else(|| "Device".to_string());
        self.peers = self
            .peers
            .iter()
            .filter_map(|peer| normalize_text_option(Some(peer.clone())))
            .collect();
    }
}

/// Default config file location under the platform config directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join(CONFIG_FILE_NAME)
}

fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
}

fn default_device_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .and_then(|value| normalize_text_option(Some(value)))
        .unwrap_or_else(|| "device".to_string());
    format!("{host}-{}", chrono::Utc::now().timestamp_millis())
}
