//! serve-warden - keeps a local `opencode serve` process alive for a project.
//!
//! # Usage
//!
//! ```bash
//! # Start the server for the current directory and supervise it until Ctrl+C
//! serve-warden run
//!
//! # Use another project and port
//! serve-warden --project ~/notes --port 4096 run
//!
//! # Is something answering on the configured port?
//! serve-warden status
//!
//! # Print the UI URL for the project
//! serve-warden url
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::GlobalOpts;

#[derive(Parser)]
#[command(name = "serve-warden")]
#[command(about = "Start, health-check and stop a local opencode server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Project directory the server runs in (default: current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Port override
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Hostname override
    #[arg(long, global = true)]
    hostname: Option<String>,

    /// Executable override
    #[arg(long, global = true)]
    executable: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server and supervise it until Ctrl+C
    Run,
    /// Check whether a server answers on the configured port
    Status,
    /// Print the UI URL for the project directory
    Url,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    commands::init_logging(cli.json);

    let opts = GlobalOpts {
        config: cli.config,
        project: cli.project,
        port: cli.port,
        hostname: cli.hostname,
        executable: cli.executable,
    };

    match cli.command {
        Commands::Run => commands::run::execute(&opts).await,
        Commands::Status => commands::status::execute(&opts).await,
        Commands::Url => commands::url::execute(&opts),
    }
}
