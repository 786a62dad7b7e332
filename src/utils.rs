//! Utility functions for directory management
//!
//! This module provides helper functions following the XDG Base Directory specification
//! for portable configuration and data storage across Linux distributions.
//!
//! # Directory Structure
//!
//! - Config: `~/.config/firelet/` - Application settings (`config.json`)
//! - Data: `~/.local/share/firelet/` - Default configuration repository, demo fleet
//! - State: `~/.local/state/firelet/` - Log file and audit log
//!
//! # Example
//!
//! ```no_run
//! use firelet::utils::{ensure_dirs, get_config_dir};
//!
//! // Ensure directories exist before use
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(config_path) = get_config_dir() {
//!     // Load settings from config_path
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "firelet", "firelet")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_data_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

/// Default location of the configuration repository
pub fn default_repodir() -> PathBuf {
    get_data_dir().map_or_else(|| PathBuf::from("firewall"), |d| d.join("firewall"))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    let dirs = [get_config_dir(), get_data_dir(), get_state_dir()];

    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700); // User read/write/execute only
        builder.recursive(true);

        for dir in dirs.into_iter().flatten() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        for dir in dirs.into_iter().flatten() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}
