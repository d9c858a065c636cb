//! Process tree termination.
//!
//! The server is spawned as the leader of its own process group, so the
//! whole tree can be signalled at once:
//!
//! - Unix: `killpg(pid, SIGTERM | SIGKILL)`
//! - Windows: `taskkill /T /F /PID <pid>` (there is no graceful variant)

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

/// Signal kinds delivered to a process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeSignal {
    /// Ask the tree to shut down (SIGTERM).
    Terminate,
    /// Force the tree down (SIGKILL).
    Kill,
}

impl TreeSignal {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

/// Delivers a signal to a process and all of its descendants.
#[async_trait]
pub trait ProcessTreeKiller: Send + Sync {
    /// Signal the tree rooted at `pid`.
    ///
    /// A tree that no longer exists is not an error.
    async fn signal_tree(&self, pid: u32, signal: TreeSignal) -> io::Result<()>;
}

/// Signals the process group led by `pid` (Unix).
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroupKiller;

#[cfg(unix)]
#[async_trait]
impl ProcessTreeKiller for ProcessGroupKiller {
    async fn signal_tree(&self, pid: u32, signal: TreeSignal) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        let sig = match signal {
            TreeSignal::Terminate => Signal::SIGTERM,
            TreeSignal::Kill => Signal::SIGKILL,
        };

        match killpg(Pid::from_raw(raw), sig) {
            Ok(()) => {
                tracing::debug!(pid, signal = signal.as_str(), "Signalled process group");
                Ok(())
            },
            Err(Errno::ESRCH) => {
                tracing::debug!(pid, "Process group already gone");
                Ok(())
            },
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

/// Kills the task tree rooted at `pid` with `taskkill` (Windows).
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskkillKiller;

#[cfg(windows)]
#[async_trait]
impl ProcessTreeKiller for TaskkillKiller {
    async fn signal_tree(&self, pid: u32, signal: TreeSignal) -> io::Result<()> {
        use std::process::Stdio;

        let status = tokio::process::Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        // taskkill exits non-zero when the process is already gone.
        tracing::debug!(pid, signal = signal.as_str(), status = %status, "taskkill finished");
        Ok(())
    }
}

/// The killer for the platform this binary was built for.
pub fn platform_killer() -> Arc<dyn ProcessTreeKiller> {
    #[cfg(unix)]
    {
        Arc::new(ProcessGroupKiller)
    }
    #[cfg(windows)]
    {
        Arc::new(TaskkillKiller)
    }
}
