//! Shared constants for the supervisor and CLI.
//!
//! Timing values mirror what the supervised server tolerates in practice;
//! the startup timeout is the only one exposed through [`Settings`].
//!
//! [`Settings`]: crate::config::Settings

use std::time::Duration;

// =============================================================================
// Server launch
// =============================================================================

/// Bare command name used when no executable path is configured.
pub const DEFAULT_EXECUTABLE: &str = "opencode";

/// Default port for `opencode serve`.
pub const DEFAULT_PORT: u16 = 14096;

/// Default hostname the server binds to.
pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";

/// Default time allowed for the server to become healthy.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 15_000;

/// Origin allowed to call the server (passed as `--cors`).
pub const CORS_ORIGIN: &str = "app://obsidian.md";

/// Environment overrides applied to the spawned server.
pub const SERVER_ENV: &[(&str, &str)] = &[("NODE_USE_SYSTEM_CA", "1")];

// =============================================================================
// Health checks
// =============================================================================

/// Path probed to decide whether the server is healthy.
pub const HEALTH_PATH: &str = "/global/health";

/// Timeout for a single health probe.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between health probes while waiting for startup.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

// =============================================================================
// Shutdown
// =============================================================================

/// How long to wait after the terminate signal before escalating.
pub const GRACEFUL_SHUTDOWN_WINDOW: Duration = Duration::from_millis(2000);

/// How long to wait after the kill signal before giving up.
pub const FORCEFUL_SHUTDOWN_WINDOW: Duration = Duration::from_millis(3000);
