//! Executable path resolution.
//!
//! The configured path may be a bare command name resolved through `PATH`,
//! an absolute path, or a home-relative path (`~/bin/opencode`). On Linux
//! the bare default command is additionally looked up in the npm global
//! install locations, which are often missing from the `PATH` of GUI
//! applications.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::constants::DEFAULT_EXECUTABLE;

/// Expands a leading `~` or `~/` to the home directory.
///
/// `~user` forms are left untouched, as are all paths when the home
/// directory cannot be determined.
pub fn expand_tilde(path: &str) -> PathBuf {
    expand_tilde_with(path, dirs::home_dir().as_deref())
}

fn expand_tilde_with(path: &str, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(path);
    };

    if path == "~" {
        return home.to_path_buf();
    }
    match path
        .strip_prefix("~/")
        .or_else(|| path.strip_prefix("~\\"))
    {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Well-known npm global install locations of the Linux binary.
pub fn linux_install_candidates(home: Option<&Path>) -> Vec<PathBuf> {
    const PACKAGE_BIN: &str = "opencode-ai/node_modules/opencode-linux-x64/bin/opencode";

    let mut candidates = vec![
        Path::new("/usr/lib/node_modules").join(PACKAGE_BIN),
        Path::new("/usr/local/lib/node_modules").join(PACKAGE_BIN),
    ];
    if let Some(home) = home {
        candidates.push(home.join(".npm-global/lib/node_modules").join(PACKAGE_BIN));
        candidates.push(home.join(".local/lib/node_modules").join(PACKAGE_BIN));
    }
    candidates
}

/// Resolves the configured executable path to the path that will be spawned.
///
/// An empty path means the default command.
pub fn resolve_executable(configured: &str) -> PathBuf {
    let configured = configured.trim();
    let configured = if configured.is_empty() {
        DEFAULT_EXECUTABLE
    } else {
        configured
    };

    let expanded = expand_tilde(configured);

    if cfg!(target_os = "linux") && expanded.as_os_str() == DEFAULT_EXECUTABLE {
        let home = dirs::home_dir();
        if let Some(found) = first_existing(&linux_install_candidates(home.as_deref())) {
            info!(path = %found.display(), "Found executable at well-known location");
            return found;
        }
    }

    expanded
}

fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|path| path.exists()).cloned()
}
