//! CLI command implementations for serve-warden.
//!
//! - [`run`] - Start and supervise the server until Ctrl+C
//! - [`status`] - Probe the health endpoint
//! - [`url`] - Print the UI URL

pub mod run;
pub mod status;
pub mod url;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::warn;

use serve_warden::{Settings, paths};

/// Flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub config: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub executable: Option<String>,
}

/// Initialize logging.
///
/// The filter comes from `RUST_LOG` (default `info`).
pub fn init_logging(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Resolve settings: config file, then command-line overrides, then the
/// current directory as the project directory when none is configured.
///
/// Validation warnings are logged; validation errors are returned.
pub fn load_settings(opts: &GlobalOpts) -> Result<Settings> {
    let path = paths::get_config_path(opts.config.as_deref())?;
    let mut settings = Settings::load_or_default(&path)?;

    if let Some(project) = &opts.project {
        settings.project_directory = Some(project.clone());
    }
    if let Some(port) = opts.port {
        settings.port = port;
    }
    if let Some(hostname) = &opts.hostname {
        settings.hostname.clone_from(hostname);
    }
    if let Some(executable) = &opts.executable {
        settings.executable.clone_from(executable);
    }
    if settings.project_directory().is_none() {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        settings.project_directory = Some(cwd);
    }

    let validation = settings.validate()?;
    if validation.has_warnings() {
        for warning in &validation.warnings {
            warn!("{warning}");
        }
    }

    Ok(settings)
}
