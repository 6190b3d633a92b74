//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.postern/config.json`) and
//! environment. Socket and allowlist paths resolve env first, then config,
//! then defaults next to the config file, so `init` and `gateway` agree on
//! file locations for any `--config` path.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway socket, allowlist, and execution settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Gateway settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Unix socket path (default: `gateway.sock` next to the config file).
    /// Overridden by POSTERN_SOCKET env when set.
    pub socket: Option<PathBuf>,

    /// Allowlist file path (default: `allowlist` next to the config file).
    /// Overridden by POSTERN_ALLOWLIST env when set.
    pub allowlist: Option<PathBuf>,

    /// Kill a command that runs longer than this many seconds. Absent = no
    /// limit, a hung child blocks its connection until killed externally.
    pub exec_timeout_secs: Option<u64>,
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("POSTERN_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".postern").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Directory the gateway's default files live in: the config file's parent.
fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the gateway socket path: POSTERN_SOCKET env overrides config,
/// config overrides the default `gateway.sock` next to the config file.
pub fn resolve_socket_path(config: &Config, config_path: &Path) -> PathBuf {
    std::env::var("POSTERN_SOCKET")
        .ok()
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| config.gateway.socket.clone())
        .unwrap_or_else(|| config_dir(config_path).join("gateway.sock"))
}

/// Resolve the allowlist path: POSTERN_ALLOWLIST env overrides config,
/// config overrides the default `allowlist` next to the config file (the
/// file `init` seeds).
pub fn resolve_allowlist_path(config: &Config, config_path: &Path) -> PathBuf {
    std::env::var("POSTERN_ALLOWLIST")
        .ok()
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| config.gateway.allowlist.clone())
        .unwrap_or_else(|| config_dir(config_path).join("allowlist"))
}

/// Load config from the default path (or POSTERN_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
