//! Supervision of a single locally spawned server process.
//!
//! [`Supervisor`] launches the server, races its exit against health-check
//! polling, and tears the whole process tree down in two phases
//! (terminate, then kill). State changes are pushed synchronously to
//! registered observers.
//!
//! ## Module Structure
//!
//! - [`state`]: Lifecycle state and the process-event transition table
//! - [`error`]: Attempt-scoped failures and their messages
//! - [`health`]: HTTP health probe
//! - [`spawn`]: Process launching and output forwarding
//! - [`kill`]: Process tree termination per platform
//! - [`executable`]: Executable path resolution
//!
//! ## Concurrency
//!
//! All mutable state sits behind one mutex that is never held across an
//! `.await`. A second, reentrant lock is held from each state write through
//! its notifications, so observers see transitions in the order they were
//! applied even on a multi-threaded runtime. Continuations re-check state
//! after every suspension point, and
//! exit events carry the spawn generation so a previous process can never
//! alter a newer start/stop cycle. `stop()` clears the handle before any
//! signal is sent, which is also how an in-flight `start()` is cancelled.

pub mod error;
pub mod executable;
pub mod health;
pub mod kill;
pub mod spawn;
pub mod state;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::constants::{FORCEFUL_SHUTDOWN_WINDOW, GRACEFUL_SHUTDOWN_WINDOW, HEALTH_POLL_INTERVAL};

pub use error::SupervisorError;
pub use health::{HealthCheck, HealthCheckConfig};
pub use kill::{ProcessTreeKiller, TreeSignal, platform_killer};
pub use spawn::{CommandSpawner, SpawnRequest, SpawnedProcess, Spawner};
pub use state::{ExitInfo, LifecycleState, SupervisorEvent};

/// Callback invoked on every state transition.
type Observer = Arc<dyn Fn(LifecycleState) + Send + Sync>;

/// Registration handle returned by [`Supervisor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// The live process owned by the supervisor.
struct ProcessHandle {
    pid: Option<u32>,
    generation: u64,
    exit: watch::Receiver<Option<ExitInfo>>,
}

struct Inner {
    state: LifecycleState,
    last_error: Option<String>,
    early_exit_code: Option<i32>,
    process: Option<ProcessHandle>,
    settings: Settings,
    next_generation: u64,
}

impl Inner {
    fn owns(&self, generation: u64) -> bool {
        self.process
            .as_ref()
            .is_some_and(|p| p.generation == generation)
    }
}

struct Shared {
    inner: Mutex<Inner>,
    /// Held from a state write until its observers have run. Reentrant so
    /// observers may drive the supervisor themselves.
    transition: ReentrantMutex<()>,
    observers: Mutex<Vec<(Subscription, Observer)>>,
    next_subscription: AtomicU64,
}

impl Shared {
    /// Call every observer, in registration order, with no lock held.
    fn notify(&self, state: LifecycleState) {
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(state);
        }
    }

    /// Move `Starting -> next`; returns false if something else moved first.
    fn advance_from_starting(&self, next: LifecycleState) -> bool {
        let _transition = self.transition.lock();
        {
            let mut inner = self.inner.lock();
            if inner.state != LifecycleState::Starting {
                debug!(state = %inner.state, target_state = %next, "Start superseded");
                return false;
            }
            inner.state = next;
        }
        self.notify(next);
        true
    }

    /// Record the failure and enter `Error`. Always returns false.
    fn fail(&self, err: &SupervisorError) -> bool {
        let message = err.to_string();
        error!(error = %message, launch = err.is_launch_error(), "Server start failed");
        let _transition = self.transition.lock();
        {
            let mut inner = self.inner.lock();
            inner.last_error = Some(message);
            inner.state = LifecycleState::Error;
        }
        self.notify(LifecycleState::Error);
        false
    }

    /// Feed a process event for spawn `generation` through the transition table.
    fn handle_event(&self, generation: u64, event: &SupervisorEvent) {
        let _transition = self.transition.lock();
        let (from, transition) = {
            let mut inner = self.inner.lock();
            if !inner.owns(generation) {
                debug!(generation, event = ?event, "Ignoring event from a previous process");
                return;
            }
            if matches!(event, SupervisorEvent::Exited(_)) {
                inner.process = None;
            }

            let from = inner.state;
            let transition = state::apply(from, event);
            if let Some(code) = transition.early_exit_code {
                inner.early_exit_code = Some(code);
            }
            inner.state = transition.next;
            (from, transition)
        };

        if transition.changes(from) {
            info!(from = %from, to = %transition.next, "Server state changed");
            self.notify(transition.next);
        }
    }
}

/// Supervises one server process.
///
/// Cloning is cheap and every clone drives the same server.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
    health: HealthCheck,
    spawner: Arc<dyn Spawner>,
    killer: Arc<dyn ProcessTreeKiller>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Supervisor")
            .field("state", &inner.state)
            .field("pid", &inner.process.as_ref().and_then(|p| p.pid))
            .field("last_error", &inner.last_error)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Supervisor`].
pub struct SupervisorBuilder {
    settings: Settings,
    health: Option<HealthCheck>,
    spawner: Option<Arc<dyn Spawner>>,
    killer: Option<Arc<dyn ProcessTreeKiller>>,
}

impl SupervisorBuilder {
    /// Replace the health probe.
    #[must_use]
    pub fn health_check(mut self, health: HealthCheck) -> Self {
        self.health = Some(health);
        self
    }

    /// Replace the process launcher.
    #[must_use]
    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Replace the process tree killer.
    #[must_use]
    pub fn killer(mut self, killer: Arc<dyn ProcessTreeKiller>) -> Self {
        self.killer = Some(killer);
        self
    }

    pub fn build(self) -> Supervisor {
        Supervisor {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: LifecycleState::Stopped,
                    last_error: None,
                    early_exit_code: None,
                    process: None,
                    settings: self.settings,
                    next_generation: 0,
                }),
                transition: ReentrantMutex::new(()),
                observers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
            }),
            health: self.health.unwrap_or_default(),
            spawner: self.spawner.unwrap_or_else(|| Arc::new(CommandSpawner)),
            killer: self.killer.unwrap_or_else(platform_killer),
        }
    }
}

impl Supervisor {
    /// Supervisor with the OS spawner, the platform killer and the default probe.
    pub fn new(settings: Settings) -> Self {
        Self::builder(settings).build()
    }

    pub fn builder(settings: Settings) -> SupervisorBuilder {
        SupervisorBuilder {
            settings,
            health: None,
            spawner: None,
            killer: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> LifecycleState {
        self.shared.inner.lock().state
    }

    /// Message of the most recent failed start, cleared when a start begins.
    pub fn last_error(&self) -> Option<String> {
        self.shared.inner.lock().last_error.clone()
    }

    /// Pid of the supervised process, if one is alive.
    pub fn pid(&self) -> Option<u32> {
        self.shared
            .inner
            .lock()
            .process
            .as_ref()
            .and_then(|p| p.pid)
    }

    /// Current configuration snapshot.
    pub fn settings(&self) -> Settings {
        self.shared.inner.lock().settings.clone()
    }

    /// Replace the configuration; takes effect at the next operation.
    pub fn update_settings(&self, settings: Settings) {
        self.shared.inner.lock().settings = settings;
    }

    /// Replace the project directory; takes effect at the next operation.
    pub fn update_project_directory(&self, directory: impl Into<PathBuf>) {
        self.shared.inner.lock().settings.project_directory = Some(directory.into());
    }

    /// API base URL: `http://{hostname}:{port}`.
    pub fn api_base_url(&self) -> String {
        self.shared.inner.lock().settings.base_url()
    }

    /// UI URL: the base URL followed by the base64-encoded project directory.
    pub fn url(&self) -> String {
        let settings = self.settings();
        ui_url(&settings)
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Register a callback invoked synchronously on every state transition.
    ///
    /// Notifications are not de-duplicated: `stop()` on a stopped server
    /// notifies `Stopped` again. They arrive in the order the transitions
    /// were applied, and a transition on another thread waits until every
    /// observer has returned.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(LifecycleState) + Send + Sync + 'static,
    {
        let id = Subscription(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.observers.lock().push((id, Arc::new(observer)));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut observers = self.shared.observers.lock();
        let before = observers.len();
        observers.retain(|(id, _)| *id != subscription);
        observers.len() != before
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the server, or adopt one already answering on the configured port.
    ///
    /// Returns true once the server is `Running`. Calling `start` while a
    /// start is in flight or the server is running returns true at once.
    /// On failure the state is `Error` and [`last_error`](Self::last_error)
    /// explains why.
    pub async fn start(&self) -> bool {
        let settings = {
            let _transition = self.shared.transition.lock();
            let settings = {
                let mut inner = self.shared.inner.lock();
                if inner.state.is_active() {
                    debug!(state = %inner.state, "Start requested while already active");
                    return true;
                }
                inner.state = LifecycleState::Starting;
                inner.last_error = None;
                inner.early_exit_code = None;
                inner.settings.clone()
            };
            self.shared.notify(LifecycleState::Starting);
            settings
        };

        let Some(project_dir) = settings.project_directory().map(Path::to_path_buf) else {
            return self.shared.fail(&SupervisorError::MissingProjectDirectory);
        };

        let base_url = settings.base_url();
        if self.health.check(&base_url).await {
            // Any healthy server on this port is adopted, whoever started it.
            info!(port = settings.port, "Server already running");
            return self.shared.advance_from_starting(LifecycleState::Running);
        }
        if self.state() != LifecycleState::Starting {
            debug!("Start superseded while probing for an existing server");
            return false;
        }

        let program = executable::resolve_executable(&settings.executable);
        info!(
            executable = %program.display(),
            port = settings.port,
            hostname = %settings.hostname,
            cwd = %project_dir.display(),
            "Starting server"
        );

        let request = SpawnRequest::serve(program.clone(), &settings, project_dir);
        let generation = match self.spawner.spawn(&request) {
            Ok(spawned) => match self.attach(spawned) {
                Ok(generation) => generation,
                Err(orphan) => {
                    if let Some(pid) = orphan.pid {
                        warn!(pid, "Start superseded during spawn, killing new process");
                        self.signal_tree(pid, TreeSignal::Kill).await;
                    }
                    return false;
                },
            },
            Err(e) => return self.launch_failed(e, &program, &settings.executable),
        };

        let had_process = match self
            .wait_for_server_or_exit(generation, &base_url, settings.startup_timeout())
            .await
        {
            Readiness::Ready => {
                if self.shared.advance_from_starting(LifecycleState::Running) {
                    info!(url = %base_url, "Server is ready");
                    return true;
                }
                return false;
            },
            Readiness::Exited => false,
            Readiness::TimedOut => true,
        };

        if self.state() == LifecycleState::Error {
            return false;
        }

        self.stop().await;

        let early_exit_code = self.shared.inner.lock().early_exit_code;
        let err = match early_exit_code {
            Some(code) => SupervisorError::UnexpectedExit { code },
            None if !had_process => SupervisorError::ExitedBeforeReady,
            None => SupervisorError::HealthTimeout,
        };
        self.shared.fail(&err)
    }

    /// Stop the server and its whole process tree.
    ///
    /// The state flips to `Stopped` and the handle is released before any
    /// signal is sent. Teardown then runs to completion: terminate, wait
    /// up to 2 s, kill, wait up to 3 s. A tree that survives is logged,
    /// never reported to the caller.
    pub async fn stop(&self) {
        let handle = {
            let _transition = self.shared.transition.lock();
            let handle = {
                let mut inner = self.shared.inner.lock();
                inner.state = LifecycleState::Stopped;
                inner.process.take()
            };
            self.shared.notify(LifecycleState::Stopped);
            handle
        };

        let Some(handle) = handle else {
            return;
        };
        let Some(pid) = handle.pid else {
            info!("No PID available, cleaning up state");
            return;
        };

        info!(pid, "Stopping server process tree");
        self.signal_tree(pid, TreeSignal::Terminate).await;

        if wait_for_exit(handle.exit.clone(), GRACEFUL_SHUTDOWN_WINDOW).await {
            info!(pid, "Server stopped gracefully");
            return;
        }

        warn!(pid, "Process didn't exit gracefully, sending SIGKILL");
        self.signal_tree(pid, TreeSignal::Kill).await;

        if wait_for_exit(handle.exit, FORCEFUL_SHUTDOWN_WINDOW).await {
            info!(pid, "Server stopped with SIGKILL");
        } else {
            error!(pid, "Failed to stop server within timeout");
        }
    }

    /// Stop, then start with the current settings.
    pub async fn restart(&self) -> bool {
        self.stop().await;
        self.start().await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Take ownership of a freshly spawned process and watch for its exit.
    ///
    /// Hands the process back if the start was superseded in the meantime.
    fn attach(&self, spawned: SpawnedProcess) -> Result<u64, SpawnedProcess> {
        let generation = {
            let mut inner = self.shared.inner.lock();
            if inner.state != LifecycleState::Starting {
                return Err(spawned);
            }
            let generation = inner.next_generation;
            inner.next_generation += 1;
            inner.process = Some(ProcessHandle {
                pid: spawned.pid,
                generation,
                exit: spawned.exit.clone(),
            });
            generation
        };

        let shared = Arc::clone(&self.shared);
        let mut exit = spawned.exit;
        tokio::spawn(async move {
            // A closed channel without a status still means the process is gone.
            let info = exit
                .wait_for(Option::is_some)
                .await
                .map(|status| (*status).unwrap_or_default())
                .unwrap_or_default();
            shared.handle_event(generation, &SupervisorEvent::Exited(info));
        });

        Ok(generation)
    }

    fn launch_failed(&self, source: std::io::Error, program: &Path, configured: &str) -> bool {
        let kind = source.kind();
        let err = SupervisorError::from_spawn(source, program, configured);
        let from = self.state();
        let next = state::apply(from, &SupervisorEvent::LaunchFailed { kind }).next;
        if next != LifecycleState::Error {
            debug!(state = %from, "Launch failure after start was superseded");
            return false;
        }
        self.shared.fail(&err)
    }

    async fn wait_for_server_or_exit(
        &self,
        generation: u64,
        base_url: &str,
        startup_timeout: Duration,
    ) -> Readiness {
        let deadline = Instant::now() + startup_timeout;

        while Instant::now() < deadline {
            if !self.shared.inner.lock().owns(generation) {
                info!("Process exited before server became ready");
                return Readiness::Exited;
            }
            if self.health.check(base_url).await {
                return Readiness::Ready;
            }
            sleep(HEALTH_POLL_INTERVAL).await;
        }

        if self.shared.inner.lock().owns(generation) {
            Readiness::TimedOut
        } else {
            Readiness::Exited
        }
    }

    async fn signal_tree(&self, pid: u32, signal: TreeSignal) {
        if let Err(e) = self.killer.signal_tree(pid, signal).await {
            warn!(pid, signal = signal.as_str(), error = %e, "Failed to signal process tree");
        }
    }
}

/// Outcome of the startup race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    Exited,
    TimedOut,
}

/// `http://{hostname}:{port}/{base64(project directory)}/`
pub fn ui_url(settings: &Settings) -> String {
    let encoded = settings
        .project_directory()
        .map(|dir| BASE64.encode(dir.to_string_lossy().as_bytes()))
        .unwrap_or_default();
    if encoded.is_empty() {
        return format!("{}/", settings.base_url());
    }
    format!("{}/{encoded}/", settings.base_url())
}

/// Wait up to `window` for the exit status; an already-exited process returns at once.
async fn wait_for_exit(mut exit: watch::Receiver<Option<ExitInfo>>, window: Duration) -> bool {
    if exit.borrow().is_some() {
        return true;
    }
    // Err(_) from wait_for means the sender is gone: nothing can still report an exit.
    timeout(window, exit.wait_for(Option::is_some)).await.is_ok()
}
