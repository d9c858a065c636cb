//! Process spawning.
//!
//! [`CommandSpawner`] launches the server with `tokio::process`, forwards
//! its output to `tracing`, and publishes the exit status on a watch
//! channel so any number of waiters can observe it (including waiters that
//! arrive after the process is gone).

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::state::ExitInfo;
use crate::config::Settings;
use crate::constants::{CORS_ORIGIN, SERVER_ENV};

/// Log target for lines the server writes.
pub const SERVER_LOG_TARGET: &str = "serve_warden::server";

/// Everything needed to launch the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Resolved executable.
    pub program: PathBuf,
    /// Command arguments.
    pub args: Vec<OsString>,
    /// Working directory of the server.
    pub working_dir: PathBuf,
    /// Environment variables added to the inherited environment.
    pub env: Vec<(String, String)>,
}

impl SpawnRequest {
    /// `<program> serve --port P --hostname H --cors <origin>` in `working_dir`.
    pub fn serve(program: PathBuf, settings: &Settings, working_dir: PathBuf) -> Self {
        let port = settings.port.to_string();
        let args = [
            "serve",
            "--port",
            port.as_str(),
            "--hostname",
            settings.hostname.as_str(),
            "--cors",
            CORS_ORIGIN,
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        Self {
            program,
            args,
            working_dir,
            env: SERVER_ENV
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }
}

/// A launched process as seen by the supervisor.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// OS process id (absent if the platform did not report one).
    pub pid: Option<u32>,
    /// Becomes `Some` once the process has exited.
    pub exit: watch::Receiver<Option<ExitInfo>>,
}

/// Launches processes. Implemented by [`CommandSpawner`] and by test doubles.
pub trait Spawner: Send + Sync {
    /// Launch the process; launch-time OS failures are returned as errors.
    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedProcess>;
}

/// Spawns real OS processes in their own process group.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandSpawner;

impl Spawner for CommandSpawner {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedProcess> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.working_dir)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        info!(pid = ?pid, program = %request.program.display(), "Process spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr));
        }

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let info = match child.wait().await {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    warn!(pid = ?pid, error = %e, "Failed to wait for process");
                    ExitInfo::default()
                },
            };
            info!(pid = ?pid, code = ?info.code, signal = ?info.signal, "Process exited");
            // Receivers may all be gone already; the exit is still logged.
            let _ = tx.send(Some(info));
        });

        Ok(SpawnedProcess { pid, exit: rx })
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

async fn forward_lines<R>(reader: R, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match stream {
                    OutputStream::Stdout => info!(target: SERVER_LOG_TARGET, "{line}"),
                    OutputStream::Stderr => warn!(target: SERVER_LOG_TARGET, "{line}"),
                }
            },
            Ok(None) => break,
            Err(e) => {
                debug!(stream = ?stream, error = %e, "Stopped reading server output");
                break;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_request_arguments() {
        let settings = Settings {
            port: 4096,
            hostname: "localhost".to_string(),
            ..Settings::default()
        };
        let request = SpawnRequest::serve(
            PathBuf::from("/usr/bin/opencode"),
            &settings,
            PathBuf::from("/work"),
        );

        let args: Vec<_> = request
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "serve",
                "--port",
                "4096",
                "--hostname",
                "localhost",
                "--cors",
                "app://obsidian.md"
            ]
        );
        assert_eq!(request.working_dir, PathBuf::from("/work"));
        assert!(
            request
                .env
                .contains(&("NODE_USE_SYSTEM_CA".to_string(), "1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_executable_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let request = SpawnRequest::serve(
            dir.path().join("does-not-exist"),
            &Settings::default(),
            dir.path().to_path_buf(),
        );

        let err = CommandSpawner.spawn(&request).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_published() {
        let dir = tempfile::TempDir::new().unwrap();
        let request = SpawnRequest {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "echo hello; exit 3".into()],
            working_dir: dir.path().to_path_buf(),
            env: Vec::new(),
        };

        let mut spawned = CommandSpawner.spawn(&request).unwrap();
        assert!(spawned.pid.is_some());

        let info = *spawned
            .exit
            .wait_for(Option::is_some)
            .await
            .unwrap();
        assert_eq!(info, Some(ExitInfo::with_code(3)));
    }
}
