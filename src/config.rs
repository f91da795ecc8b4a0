//! Configuration management for the utxochat daemon.
//!
//! Configuration is a single TOML file. Every section and field has a
//! default, so a partial file (or none at all) yields a working node.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::message::{HEADER_SIZE, MAX_MESSAGE_SIZE};

/// Platform-specific data directory (`~/.utxochat`).
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("utxochat")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".utxochat")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub bitcoin: BitcoinConfig,
    pub blockchain: BlockchainConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_node_name() -> String {
    "utxochat-node".to_string()
}

fn default_data_dir() -> String {
    get_data_dir().to_string_lossy().to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Static peers dialed at startup. There is no discovery.
    #[serde(default)]
    pub known_peers: Vec<String>,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Inbound connection limit.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Largest accepted `Data` body.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_listen_address() -> String {
    "0.0.0.0:8335".to_string()
}

fn default_handshake_timeout() -> u64 {
    60
}

fn default_max_peers() -> usize {
    64
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_write_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            known_peers: Vec::new(),
            handshake_timeout_secs: default_handshake_timeout(),
            max_peers: default_max_peers(),
            max_message_size: default_max_message_size(),
            write_timeout_secs: default_write_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitcoinConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: String,
    #[serde(default)]
    pub rpc_password: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8332".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            rpc_user: String::new(),
            rpc_password: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockchainConfig {
    #[serde(default)]
    pub notifications_enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_reorg_depth")]
    pub max_reorg_depth: u64,
    /// When false only block heights are followed and stored outpoints are
    /// re-checked against the UTXO set.
    #[serde(default = "default_true")]
    pub scan_full_blocks: bool,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_max_reorg_depth() -> u64 {
    6
}

fn default_true() -> bool {
    true
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            notifications_enabled: false,
            poll_interval_secs: default_poll_interval(),
            max_reorg_depth: default_max_reorg_depth(),
            scan_full_blocks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory" or "sled"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Relative paths are resolved against `node.data_dir`.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_backend() -> String {
    "sled".to_string()
}

fn default_storage_path() -> String {
    "outpoints".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| AppError::Config(format!("invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or writes the defaults there first if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load_from_file(path);
        }

        let config = Config::default();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        config.save_to_file(path)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("cannot serialize config: {}", e)))?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.blockchain.poll_interval_secs == 0 {
            return Err(AppError::Config(
                "blockchain.poll_interval_secs must be positive".to_string(),
            ));
        }
        if !(HEADER_SIZE..=MAX_MESSAGE_SIZE).contains(&self.network.max_message_size) {
            return Err(AppError::Config(format!(
                "network.max_message_size must be within {}..={}, got {}",
                HEADER_SIZE, MAX_MESSAGE_SIZE, self.network.max_message_size
            )));
        }
        if !matches!(self.storage.backend.as_str(), "memory" | "sled") {
            return Err(AppError::Config(format!(
                "unknown storage backend '{}'",
                self.storage.backend
            )));
        }
        if !matches!(self.logging.format.as_str(), "compact" | "json") {
            return Err(AppError::Config(format!(
                "unknown log format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Storage path with `node.data_dir` applied.
    pub fn storage_path(&self) -> PathBuf {
        let path = Path::new(&self.storage.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.node.data_dir).join(path)
        }
    }
}
