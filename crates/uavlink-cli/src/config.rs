//! Bridge configuration – reads/writes `~/.uavlink/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uavlink_middleware::DecodePolicy;
use uavlink_middleware::bridge::{
    BridgeConfig, DEFAULT_BUFFER_SIZE, DEFAULT_PATH, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY,
};
use uavlink_types::LinkError;

/// Persisted configuration stored in `~/.uavlink/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port of the WebSocket endpoint.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request path accepted for upgrades.
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,

    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,

    /// Capacity of each per-client queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// `lenient` (default) or `strict` handling of malformed client frames.
    #[serde(default)]
    pub decode_policy: DecodePolicy,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_path() -> String {
    DEFAULT_PATH.to_string()
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            path: default_path(),
            read_buffer_size: default_buffer_size(),
            write_buffer_size: default_buffer_size(),
            queue_capacity: default_queue_capacity(),
            decode_policy: DecodePolicy::default(),
        }
    }
}

impl Config {
    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<(), LinkError> {
        if !self.path.starts_with('/') {
            return Err(LinkError::Config(format!(
                "path `{}` must start with '/'",
                self.path
            )));
        }
        if self.queue_capacity == 0 {
            return Err(LinkError::Config("queue_capacity must be at least 1".to_string()));
        }
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(LinkError::Config("buffer sizes must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            port: self.port,
            path: self.path.clone(),
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            queue_capacity: self.queue_capacity,
            decode_policy: self.decode_policy,
        }
    }
}

/// Return the config path: `$UAVLINK_CONFIG`, else `~/.uavlink/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("UAVLINK_CONFIG") {
        return PathBuf::from(explicit);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".uavlink").join("config.toml")
}

/// Load the effective configuration: file (or defaults) plus env overrides.
pub fn load() -> Result<Config, LinkError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Load the config from a specific path. Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, LinkError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        LinkError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| LinkError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
    Ok(Some(cfg))
}

/// Apply `UAVLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `UAVLINK_PORT` | `port` |
/// | `UAVLINK_PATH` | `path` |
/// | `UAVLINK_DECODE_POLICY` | `decode_policy` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("UAVLINK_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Ok(v) = std::env::var("UAVLINK_PATH") {
        cfg.path = v;
    }
    if let Ok(v) = std::env::var("UAVLINK_DECODE_POLICY")
        && let Ok(policy) = v.parse::<DecodePolicy>()
    {
        cfg.decode_policy = policy;
    }
}

/// Save the config, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), LinkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            LinkError::Config(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| LinkError::Config(format!("failed to serialize config: {}", e)))?;
    fs::write(path, raw)
        .map_err(|e| LinkError::Config(format!("failed to write {}: {}", path.display(), e)))
}
