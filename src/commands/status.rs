//! Probe the health endpoint of the configured server.

use anyhow::Result;

use serve_warden::supervisor::{HealthCheck, ui_url};

use super::{GlobalOpts, load_settings};

/// Print whether a server answers on the configured host and port.
///
/// Exits with an error when nothing healthy is listening, so the command
/// can be used in scripts.
pub async fn execute(opts: &GlobalOpts) -> Result<()> {
    let settings = load_settings(opts)?;
    let health = HealthCheck::default();
    let base_url = settings.base_url();

    if health.check(&base_url).await {
        println!("running   {}", ui_url(&settings));
        return Ok(());
    }

    println!("stopped   {}", health.url(&base_url));
    anyhow::bail!("No healthy server at {base_url}")
}
