//! Start the server and supervise it until Ctrl+C.
//!
//! On Unix, SIGHUP reloads the configuration. When anything that affects
//! the launched process changed (executable, port, hostname, project
//! directory) and the server is running, it is restarted with the new
//! settings.
//!
//! If the server goes away on its own, `run` stops waiting and exits with
//! an error.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use serve_warden::{LifecycleState, Settings, Supervisor};

use super::{GlobalOpts, load_settings};

/// Run the supervisor in the foreground.
pub async fn execute(opts: &GlobalOpts) -> Result<()> {
    let settings = load_settings(opts)?;
    let supervisor = Supervisor::new(settings);

    let (state_tx, mut states) = watch::channel(supervisor.state());
    supervisor.subscribe(move |state| {
        match state {
            LifecycleState::Error => warn!(state = %state, "Server state"),
            _ => info!(state = %state, "Server state"),
        }
        state_tx.send_replace(state);
    });

    if !supervisor.start().await {
        let reason = supervisor
            .last_error()
            .unwrap_or_else(|| "Server failed to start".to_string());
        anyhow::bail!(reason);
    }

    println!("Server running at {}", supervisor.url());
    println!("Press Ctrl+C to stop\n");

    let result = wait_for_shutdown(&supervisor, opts, &mut states).await;

    println!("\nStopping server...");
    supervisor.stop().await;
    println!("Server stopped.");

    result
}

#[cfg(unix)]
async fn wait_for_shutdown(
    supervisor: &Supervisor,
    opts: &GlobalOpts,
    states: &mut watch::Receiver<LifecycleState>,
) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return result.map_err(Into::into),
            state = until_not_running(states) => {
                anyhow::bail!("Server is no longer running ({state})")
            },
            _ = hangup.recv() => reload(supervisor, opts).await,
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    _supervisor: &Supervisor,
    _opts: &GlobalOpts,
    states: &mut watch::Receiver<LifecycleState>,
) -> Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map_err(Into::into),
        state = until_not_running(states) => {
            anyhow::bail!("Server is no longer running ({state})")
        },
    }
}

/// Resolves with the new state once the server leaves `Running`.
///
/// A restart passes through `Stopped` and `Starting` while the reload arm
/// is being awaited, so only the state after it settles is seen here.
async fn until_not_running(states: &mut watch::Receiver<LifecycleState>) -> LifecycleState {
    let settled = states
        .wait_for(|state| *state != LifecycleState::Running)
        .await
        .map(|state| *state);
    match settled {
        Ok(state) => state,
        // The sender lives in the observer for as long as the supervisor.
        Err(_) => std::future::pending().await,
    }
}

/// Re-read the configuration and restart the server if it needs to.
#[cfg_attr(not(unix), allow(dead_code))]
async fn reload(supervisor: &Supervisor, opts: &GlobalOpts) {
    let settings = match load_settings(opts) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "Keeping previous configuration");
            return;
        },
    };

    let restart = needs_restart(&supervisor.settings(), &settings)
        && supervisor.state() == LifecycleState::Running;
    supervisor.update_settings(settings);
    info!(restart, "Configuration reloaded");

    if restart {
        if supervisor.restart().await {
            println!("Server restarted at {}", supervisor.url());
        } else {
            warn!(
                error = %supervisor.last_error().unwrap_or_default(),
                "Restart failed"
            );
        }
    }
}

/// True when the change affects the launched process.
#[cfg_attr(not(unix), allow(dead_code))]
fn needs_restart(current: &Settings, next: &Settings) -> bool {
    current.executable != next.executable
        || current.port != next.port
        || current.hostname != next.hostname
        || current.project_directory != next.project_directory
}
