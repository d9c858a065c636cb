//! Supervisor error types.
//!
//! Every failure of a `start` attempt maps onto one of these variants.
//! The `Display` text is what callers see through
//! [`Supervisor::last_error`](super::Supervisor::last_error); there is no
//! other detail channel.

use std::io;
use std::path::PathBuf;

#[cfg(target_os = "linux")]
use crate::constants::DEFAULT_EXECUTABLE;

/// Known npm global install location suggested when the bare command is not found.
#[cfg(target_os = "linux")]
const LINUX_NPM_HINT: &str =
    "/usr/lib/node_modules/opencode-ai/node_modules/opencode-linux-x64/bin/opencode";

/// Attempt-scoped supervisor failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// No project directory to run the server in.
    #[error("Project directory not configured")]
    MissingProjectDirectory,

    /// The executable does not exist.
    #[error("Executable not found at '{}'{}", path.display(), hint.as_deref().unwrap_or(""))]
    ExecutableNotFound {
        path: PathBuf,
        hint: Option<String>,
    },

    /// Any other OS-level spawn failure (permission denied, bad format, ...).
    #[error("Failed to start: {source}")]
    LaunchFailed {
        #[source]
        source: io::Error,
    },

    /// The process exited with a non-zero code while starting.
    #[error("Process exited unexpectedly (exit code {code})")]
    UnexpectedExit { code: i32 },

    /// The process went away before the health check succeeded.
    #[error("Process exited before server became ready")]
    ExitedBeforeReady,

    /// The process stayed alive but never became healthy.
    #[error("Server failed to start within timeout")]
    HealthTimeout,
}

impl SupervisorError {
    /// Classify a spawn error.
    ///
    /// `configured` is the path as the user wrote it, before resolution; the
    /// platform hint is only added when it is the bare default command.
    pub fn from_spawn(source: io::Error, resolved: impl Into<PathBuf>, configured: &str) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return Self::ExecutableNotFound {
                path: resolved.into(),
                hint: not_found_hint(configured),
            };
        }
        Self::LaunchFailed { source }
    }

    /// True for errors raised before or while launching the process.
    pub fn is_launch_error(&self) -> bool {
        matches!(
            self,
            Self::MissingProjectDirectory
                | Self::ExecutableNotFound { .. }
                | Self::LaunchFailed { .. }
        )
    }
}

#[cfg(target_os = "linux")]
fn not_found_hint(configured: &str) -> Option<String> {
    (configured == DEFAULT_EXECUTABLE)
        .then(|| format!(". On Linux, try setting the path to: {LINUX_NPM_HINT}"))
}

#[cfg(not(target_os = "linux"))]
fn not_found_hint(_configured: &str) -> Option<String> {
    None
}
