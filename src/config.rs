//! Configuration for the supervised server.
//!
//! [`Settings`] is the configuration snapshot handed to the supervisor. It
//! is loaded from a TOML file:
//!
//! ```toml
//! executable = "~/.opencode/bin/opencode"
//! port = 14096
//! hostname = "127.0.0.1"
//! project_directory = "/home/me/notes"
//! startup_timeout_ms = 15000
//! ```
//!
//! Every field is optional and falls back to the defaults in
//! [`crate::constants`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::supervisor::executable::expand_tilde;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Configuration snapshot used by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Executable to launch: a command name, an absolute path or `~/...`.
    #[serde(alias = "opencode_path")]
    pub executable: String,
    /// Port the server listens on.
    pub port: u16,
    /// Hostname the server binds to.
    pub hostname: String,
    /// Working directory of the server.
    pub project_directory: Option<PathBuf>,
    /// Time allowed for the server to become healthy, in milliseconds.
    pub startup_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            executable: constants::DEFAULT_EXECUTABLE.to_string(),
            port: constants::DEFAULT_PORT,
            hostname: constants::DEFAULT_HOSTNAME.to_string(),
            project_directory: None,
            startup_timeout_ms: constants::DEFAULT_STARTUP_TIMEOUT_MS,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load settings from `path`, or defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Startup timeout as a [`Duration`].
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// API base URL: `http://{hostname}:{port}`.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }

    /// Configured project directory, treating an empty path as unset.
    pub fn project_directory(&self) -> Option<&Path> {
        self.project_directory
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
    }

    /// Validate settings with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails with one or more errors:
    /// - Port 0
    /// - Empty hostname
    /// - Zero startup timeout
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Network settings
        if self.port == 0 {
            errors.push("port cannot be 0. Use a valid port number (1-65535)".to_string());
        } else if self.port < 1024 {
            warnings.push(format!(
                "port {} is a system/privileged port (< 1024)\n  \
                 Recommendation: Use ports >= 1024 to avoid permission issues",
                self.port
            ));
        }

        if self.hostname.trim().is_empty() {
            errors.push("hostname cannot be empty".to_string());
        }

        if self.startup_timeout_ms == 0 {
            errors.push(format!(
                "startup_timeout_ms cannot be 0 (default: {})",
                constants::DEFAULT_STARTUP_TIMEOUT_MS
            ));
        }

        // 2. Executable (a bare command name is resolved through PATH at launch)
        if let Some(problem) = check_executable(&self.executable) {
            warnings.push(problem);
        }

        // 3. Project directory
        match self.project_directory() {
            None => warnings.push("project_directory is not set".to_string()),
            Some(dir) if !dir.is_dir() => warnings.push(format!(
                "project_directory does not exist or is not a directory: {}",
                dir.display()
            )),
            Some(_) => {},
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }
}

/// Describe what is wrong with an executable path, if anything.
///
/// Empty values and bare command names are accepted as-is.
pub fn check_executable(configured: &str) -> Option<String> {
    let trimmed = configured.trim();
    if trimmed.is_empty() || !(trimmed.contains('/') || trimmed.contains('\\')) {
        return None;
    }

    let path = expand_tilde(trimmed);
    let Ok(meta) = fs::metadata(&path) else {
        return Some(format!("executable not found: {}", path.display()));
    };
    if !meta.is_file() {
        return Some(format!("executable is not a file: {}", path.display()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Some(format!("executable is not executable: {}", path.display()));
        }
    }

    None
}
