//! Shared helpers for supervisor integration tests.
//!
//! - [`HealthServer`]: a local axum server answering `/global/health`
//! - [`FakeOs`]: a scripted spawner and killer pair that records every call
//!
//! Include from a test file with:
//! ```ignore
//! #[path = "common.rs"]
//! mod common;
//! ```

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use serve_warden::supervisor::{
    ExitInfo, HealthCheck, HealthCheckConfig, ProcessTreeKiller, SpawnRequest, SpawnedProcess,
    Spawner, TreeSignal,
};
use serve_warden::{LifecycleState, Settings, Supervisor};

// =============================================================================
// Health server
// =============================================================================

/// Switchable health state shared with the axum handler.
#[derive(Debug, Default)]
pub struct HealthState {
    healthy: AtomicBool,
    fail_first: AtomicUsize,
    hits: AtomicUsize,
}

impl HealthState {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn health(State(state): State<Arc<HealthState>>) -> StatusCode {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hit <= state.fail_first.load(Ordering::SeqCst) || !state.healthy.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// Local stand-in for the supervised server's health endpoint.
pub struct HealthServer {
    pub port: u16,
    state: Arc<HealthState>,
    task: JoinHandle<()>,
}

impl HealthServer {
    /// Serve on an ephemeral port.
    pub async fn start(healthy: bool) -> Self {
        Self::start_with(healthy, 0).await
    }

    /// Serve on an ephemeral port, answering 503 to the first `fail_first` requests.
    pub async fn start_with(healthy: bool, fail_first: usize) -> Self {
        let state = Arc::new(HealthState::default());
        state.set_healthy(healthy);
        state.fail_first.store(fail_first, Ordering::SeqCst);

        let app = Router::new()
            .route("/global/health", get(health))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind health server");
        let port = listener.local_addr().expect("No local address").port();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { port, state, task }
    }

    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.set_healthy(healthy);
    }
}

impl Drop for HealthServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A port nobody listens on.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().expect("No local address").port()
}

// =============================================================================
// Fake OS
// =============================================================================

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Scripted process table behind a fake [`Spawner`] and [`ProcessTreeKiller`].
#[derive(Default)]
pub struct FakeOs {
    requests: Mutex<Vec<SpawnRequest>>,
    exits: Mutex<Vec<(u32, watch::Sender<Option<ExitInfo>>)>>,
    signals: Mutex<Vec<(u32, TreeSignal, Instant)>>,
    launch_error: Mutex<Option<io::ErrorKind>>,
    exit_on_spawn: Mutex<Option<ExitInfo>>,
    exits_on: Mutex<Vec<TreeSignal>>,
    on_spawn: Mutex<Option<Hook>>,
    next_pid: AtomicU32,
}

impl FakeOs {
    pub fn new() -> Arc<Self> {
        let os = Self::default();
        os.next_pid.store(1000, Ordering::SeqCst);
        Arc::new(os)
    }

    /// Make every launch fail with `kind`.
    pub fn fail_launch(&self, kind: io::ErrorKind) {
        *self.launch_error.lock() = Some(kind);
    }

    /// Processes exit with `info` as soon as they are launched.
    pub fn exit_on_spawn(&self, info: ExitInfo) {
        *self.exit_on_spawn.lock() = Some(info);
    }

    /// Processes die when their tree receives `signal`.
    pub fn exit_on(&self, signal: TreeSignal) {
        self.exits_on.lock().push(signal);
    }

    /// Run `hook` after every successful launch.
    pub fn on_spawn(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_spawn.lock() = Some(Arc::new(hook));
    }

    /// Report that process `pid` exited.
    pub fn exit(&self, pid: u32, info: ExitInfo) {
        if let Some((_, tx)) = self.exits.lock().iter().find(|(p, _)| *p == pid) {
            let _ = tx.send(Some(info));
        }
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().clone()
    }

    pub fn signals(&self) -> Vec<(u32, TreeSignal)> {
        self.signals
            .lock()
            .iter()
            .map(|(pid, signal, _)| (*pid, *signal))
            .collect()
    }

    pub fn signal_times(&self) -> Vec<Instant> {
        self.signals.lock().iter().map(|(_, _, at)| *at).collect()
    }

    pub fn spawner(self: &Arc<Self>) -> Arc<dyn Spawner> {
        Arc::new(FakeSpawner(Arc::clone(self)))
    }

    pub fn killer(self: &Arc<Self>) -> Arc<dyn ProcessTreeKiller> {
        Arc::new(FakeKiller(Arc::clone(self)))
    }
}

struct FakeSpawner(Arc<FakeOs>);

impl Spawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedProcess> {
        let os = &self.0;
        os.requests.lock().push(request.clone());

        if let Some(kind) = *os.launch_error.lock() {
            return Err(io::Error::new(kind, "scripted launch failure"));
        }

        let pid = os.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(None);
        if let Some(info) = *os.exit_on_spawn.lock() {
            let _ = tx.send(Some(info));
        }
        os.exits.lock().push((pid, tx));

        let hook = os.on_spawn.lock().clone();
        if let Some(hook) = hook {
            hook();
        }

        Ok(SpawnedProcess {
            pid: Some(pid),
            exit: rx,
        })
    }
}

struct FakeKiller(Arc<FakeOs>);

#[async_trait]
impl ProcessTreeKiller for FakeKiller {
    async fn signal_tree(&self, pid: u32, signal: TreeSignal) -> io::Result<()> {
        let os = &self.0;
        os.signals.lock().push((pid, signal, Instant::now()));

        if os.exits_on.lock().contains(&signal) {
            let number = match signal {
                TreeSignal::Terminate => 15,
                TreeSignal::Kill => 9,
            };
            os.exit(pid, ExitInfo::with_signal(number));
        }
        Ok(())
    }
}

// =============================================================================
// Supervisor helpers
// =============================================================================

pub fn settings(port: u16, project: Option<&Path>, startup_timeout_ms: u64) -> Settings {
    Settings {
        hostname: "127.0.0.1".to_string(),
        port,
        project_directory: project.map(Path::to_path_buf),
        startup_timeout_ms,
        ..Settings::default()
    }
}

/// Supervisor wired to `os` with a short probe timeout.
pub fn supervisor(settings: Settings, os: &Arc<FakeOs>) -> Supervisor {
    Supervisor::builder(settings)
        .health_check(HealthCheck::new(HealthCheckConfig {
            timeout: Duration::from_millis(500),
            ..HealthCheckConfig::default()
        }))
        .spawner(os.spawner())
        .killer(os.killer())
        .build()
}

/// Record every state an observer sees.
pub fn record_states(supervisor: &Supervisor) -> Arc<Mutex<Vec<LifecycleState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&states);
    supervisor.subscribe(move |state| log.lock().push(state));
    states
}

/// Poll `condition` every 10ms for up to 5s.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            std::time::Instant::now() < deadline,
            "Condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
