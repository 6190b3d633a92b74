//! Initialize the configuration directory: create ~/.postern, a default
//! config, and an example allowlist.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

static DEFAULT_ALLOWLIST: &str = include_str!("../config/allowlist.example");

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of the config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Seeds `allowlist` from the bundled example if missing.
/// Existing files are never overwritten.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = b"{}";
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let allowlist_path = config_dir.join("allowlist");
    if !allowlist_path.exists() {
        std::fs::write(&allowlist_path, DEFAULT_ALLOWLIST).with_context(|| {
            format!("writing example allowlist to {}", allowlist_path.display())
        })?;
        log::info!("wrote example allowlist to {}", allowlist_path.display());
    } else {
        log::debug!(
            "allowlist already exists at {}, skipping",
            allowlist_path.display()
        );
    }

    Ok(config_dir.to_path_buf())
}
