//! Print the UI URL for the project directory.

use anyhow::Result;

use serve_warden::supervisor::ui_url;

use super::{GlobalOpts, load_settings};

pub fn execute(opts: &GlobalOpts) -> Result<()> {
    let settings = load_settings(opts)?;
    println!("{}", ui_url(&settings));
    Ok(())
}
