//! # serve-warden
//!
//! Supervises a locally spawned `opencode serve` process: starts it (or
//! adopts one already answering on the configured port), waits for its
//! health endpoint, and stops the whole process tree with a
//! terminate-then-kill escalation.
//!
//! ```rust,no_run
//! use serve_warden::{Settings, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let settings = Settings {
//!     project_directory: Some("/home/me/notes".into()),
//!     ..Settings::default()
//! };
//! let supervisor = Supervisor::new(settings);
//! supervisor.subscribe(|state| println!("server is {state}"));
//!
//! if supervisor.start().await {
//!     println!("open {}", supervisor.url());
//! } else {
//!     eprintln!("{}", supervisor.last_error().unwrap_or_default());
//! }
//! supervisor.stop().await;
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod paths;
pub mod supervisor;

pub use config::{Settings, ValidationResult};
pub use supervisor::{LifecycleState, Subscription, Supervisor, SupervisorError};
