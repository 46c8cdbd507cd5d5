use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;

/// Default size of the per-connection IPC read buffer, in bytes.
pub const DEFAULT_IPC_BUFFER_SIZE: usize = 512;

/// Default tracing filter directive.
pub const DEFAULT_LOG_FILTER: &str = "tether=info";

/// Runtime configuration.
///
/// Built from an optional TOML [`FileConfig`] with environment variables
/// layered on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // IPC transport
    pub ipc_enabled: bool,
    pub ipc_path: String,
    pub ipc_buffer_size: usize,

    // Logging
    pub log_filter: String,
}

/// TOML-backed configuration loaded from disk. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub ipc: IpcFileConfig,
    #[serde(default)]
    pub logging: LoggingFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpcFileConfig {
    pub enabled: Option<bool>,
    pub path: Option<String>,
    pub buffer_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingFileConfig {
    pub filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ipc_enabled: true,
            ipc_path: default_ipc_path(),
            ipc_buffer_size: DEFAULT_IPC_BUFFER_SIZE,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::layered(FileConfig::default(), |key| env::var(key).ok())
    }

    /// Load a TOML file, then let environment variables override it.
    pub fn from_file_and_env(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let file = load_config(path)?;
        Self::layered(file, |key| env::var(key).ok())
    }

    /// Resolve a config from file values and a variable lookup.
    pub fn layered(file: FileConfig, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let ipc_enabled = match var("TETHER_IPC_ENABLED") {
            Some(raw) => parse_bool(&raw)
                .with_context(|| format!("TETHER_IPC_ENABLED must be a boolean, got {raw:?}"))?,
            None => file.ipc.enabled.unwrap_or(defaults.ipc_enabled),
        };

        let ipc_buffer_size = match var("TETHER_IPC_BUFFER_SIZE") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("TETHER_IPC_BUFFER_SIZE must be a number, got {raw:?}"))?,
            None => file.ipc.buffer_size.unwrap_or(defaults.ipc_buffer_size),
        };
        if ipc_buffer_size < 2 {
            anyhow::bail!("IPC buffer size must be at least 2 bytes, got {ipc_buffer_size}");
        }

        Ok(Self {
            ipc_enabled,
            ipc_path: var("TETHER_IPC_PATH")
                .or(file.ipc.path)
                .unwrap_or(defaults.ipc_path),
            ipc_buffer_size,
            log_filter: var("TETHER_LOG")
                .or(file.logging.filter)
                .unwrap_or(defaults.log_filter),
        })
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  TETHER_IPC_ENABLED: {}", self.ipc_enabled);
        tracing::info!("  TETHER_IPC_PATH: {}", self.ipc_path);
        tracing::info!("  TETHER_IPC_BUFFER_SIZE: {}", self.ipc_buffer_size);
        tracing::info!("  TETHER_LOG: {}", self.log_filter);
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

#[cfg(windows)]
fn default_ipc_path() -> String {
    r"\\.\pipe\TetherIPCPipe".to_string()
}

#[cfg(not(windows))]
fn default_ipc_path() -> String {
    let path = env::temp_dir().join("tether-ipc.sock");
    path.to_string_lossy().into_owned()
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {other}"),
    }
}
