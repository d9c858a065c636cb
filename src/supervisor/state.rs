//! Lifecycle state and the transition table driven by process events.
//!
//! OS-level callbacks never touch the state directly. They are turned into
//! a [`SupervisorEvent`] and fed through [`apply`], so the table below is
//! the single place where process events change the lifecycle.

use std::fmt;
use std::io;

/// Lifecycle of the supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// Nothing running (initial state, and the end of every stop).
    #[default]
    Stopped,
    /// Spawned or probing, not yet healthy.
    Starting,
    /// Health check succeeded (or an existing server was adopted).
    Running,
    /// Last start attempt failed; requires an explicit start to leave.
    Error,
}

impl LifecycleState {
    /// Lowercase name used in logs and CLI output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Error => "error",
        }
    }

    /// True while a start is in flight or has succeeded.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, absent when the process was killed by a signal.
    pub code: Option<i32>,
    /// Signal number that terminated the process (Unix only).
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub const fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub const fn with_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Non-zero exit code, if any.
    pub fn failure_code(&self) -> Option<i32> {
        self.code.filter(|code| *code != 0)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Events raised by the process layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The process terminated.
    Exited(ExitInfo),
    /// The OS refused to launch the process.
    LaunchFailed { kind: io::ErrorKind },
}

/// Outcome of feeding one event through the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: LifecycleState,
    /// Set when the event should be remembered as an early exit.
    pub early_exit_code: Option<i32>,
}

impl Transition {
    const fn stay(state: LifecycleState) -> Self {
        Self {
            next: state,
            early_exit_code: None,
        }
    }

    /// True when the lifecycle state changes.
    pub fn changes(&self, from: LifecycleState) -> bool {
        self.next != from
    }
}

/// Transition table for process events.
///
/// | state      | event                     | next      | notes                 |
/// |------------|---------------------------|-----------|-----------------------|
/// | `Starting` | `Exited` non-zero code    | `Starting`| remember early exit   |
/// | `Running`  | `Exited`                  | `Stopped` | crash is not an error |
/// | `Starting` | `LaunchFailed`            | `Error`   |                       |
/// | any other  | any                       | unchanged |                       |
///
/// Starting-phase exits leave the state alone: the startup race notices the
/// missing process and classifies the failure itself.
pub fn apply(state: LifecycleState, event: &SupervisorEvent) -> Transition {
    match (state, event) {
        (LifecycleState::Starting, SupervisorEvent::Exited(info)) => Transition {
            next: LifecycleState::Starting,
            early_exit_code: info.failure_code(),
        },
        (LifecycleState::Running, SupervisorEvent::Exited(_)) => {
            Transition::stay(LifecycleState::Stopped)
        },
        (LifecycleState::Starting, SupervisorEvent::LaunchFailed { .. }) => {
            Transition::stay(LifecycleState::Error)
        },
        (state, _) => Transition::stay(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_stopped() {
        assert_eq!(LifecycleState::default(), LifecycleState::Stopped);
        assert_eq!(LifecycleState::Running.to_string(), "running");
    }

    #[test]
    fn test_early_exit_recorded_while_starting() {
        let t = apply(
            LifecycleState::Starting,
            &SupervisorEvent::Exited(ExitInfo::with_code(7)),
        );
        assert_eq!(t.next, LifecycleState::Starting);
        assert_eq!(t.early_exit_code, Some(7));
    }

    #[test]
    fn test_clean_exit_while_starting_is_not_early_exit() {
        let t = apply(
            LifecycleState::Starting,
            &SupervisorEvent::Exited(ExitInfo::with_code(0)),
        );
        assert_eq!(t.early_exit_code, None);

        let t = apply(
            LifecycleState::Starting,
            &SupervisorEvent::Exited(ExitInfo::with_signal(15)),
        );
        assert_eq!(t.early_exit_code, None);
        assert!(!t.changes(LifecycleState::Starting));
    }

    #[test]
    fn test_running_exit_stops_silently() {
        let t = apply(
            LifecycleState::Running,
            &SupervisorEvent::Exited(ExitInfo::with_code(1)),
        );
        assert_eq!(t.next, LifecycleState::Stopped);
        assert_eq!(t.early_exit_code, None);
    }

    #[test]
    fn test_launch_failure_while_starting_is_error() {
        let t = apply(
            LifecycleState::Starting,
            &SupervisorEvent::LaunchFailed {
                kind: io::ErrorKind::NotFound,
            },
        );
        assert_eq!(t.next, LifecycleState::Error);
    }

    #[test]
    fn test_events_after_stop_are_ignored() {
        for event in [
            SupervisorEvent::Exited(ExitInfo::with_code(3)),
            SupervisorEvent::LaunchFailed {
                kind: io::ErrorKind::Other,
            },
        ] {
            let t = apply(LifecycleState::Stopped, &event);
            assert_eq!(t, Transition::stay(LifecycleState::Stopped));
            let t = apply(LifecycleState::Error, &event);
            assert_eq!(t.next, LifecycleState::Error);
        }
    }

    #[test]
    fn test_exit_info_display() {
        assert_eq!(ExitInfo::with_code(2).to_string(), "code 2");
        assert_eq!(ExitInfo::with_signal(9).to_string(), "signal 9");
        assert_eq!(ExitInfo::default().to_string(), "unknown status");
    }
}
