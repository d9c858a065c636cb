//! Path utilities for serve-warden.
//!
//! # Configuration
//! - [`get_config_dir`] - `<config dir>/serve-warden/`
//! - [`get_config_path`] - `<config dir>/serve-warden/config.toml`
//!
//! The platform config directory comes from [`dirs::config_dir`]
//! (`~/.config` on Linux, `~/Library/Application Support` on macOS,
//! `%APPDATA%` on Windows).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV_VAR: &str = "SERVE_WARDEN_CONFIG";

/// Get the serve-warden configuration directory.
pub fn get_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Failed to get config directory")?;
    Ok(base.join("serve-warden"))
}

/// Get the configuration file path.
///
/// Resolution order:
/// 1. `explicit` (the `--config` flag)
/// 2. `SERVE_WARDEN_CONFIG` environment variable (if set and non-empty)
/// 3. `<config dir>/serve-warden/config.toml` (default)
pub fn get_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    Ok(get_config_dir()?.join("config.toml"))
}
