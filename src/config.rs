//! Application settings
//!
//! Settings that belong to the operator's machine rather than to the
//! configuration repository: where the repository lives, how to reach the
//! firewalls and how strict checks are.

use crate::core::compiler::{CompileOptions, DEFAULT_ALWAYS_ACCEPT};
use crate::core::error::{Error, Result};
use crate::core::fireset::StoreOptions;
use crate::core::vcs::GitAuthor;
use crate::utils::{default_repodir, get_config_dir};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration repository directory
    pub repodir: PathBuf,
    /// User for SSH sessions to the firewalls
    pub ssh_username: String,
    /// Fail checks and deployments when a firewall has undeclared interfaces
    pub stop_on_extra_interfaces: bool,
    /// Hosts accepting all traffic from any source, e.g. a management station
    pub always_accept_hosts: Vec<String>,
    /// Simulated fleet file. When set, the CLI talks to it instead of SSH.
    pub demo_state: Option<PathBuf>,
    /// Identity used for checkpoints. `None` uses the user's git settings.
    pub git_author: Option<GitAuthor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            repodir: default_repodir(),
            ssh_username: "firelet".to_string(),
            stop_on_extra_interfaces: false,
            always_accept_hosts: DEFAULT_ALWAYS_ACCEPT.iter().map(ToString::to_string).collect(),
            demo_state: None,
            git_author: None,
        }
    }
}

impl AppConfig {
    /// Store settings derived from this configuration
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            compile: CompileOptions {
                always_accept: self.always_accept_hosts.iter().cloned().collect(),
            },
            ssh_username: self.ssh_username.clone(),
        }
    }
}

/// Default location of `config.json`
pub fn config_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("config.json"))
}

/// Saves the config to `path` using an atomic write pattern.
/// 1. Writes to a temporary file in the same directory.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
///
/// # Security
///
/// On Unix systems, files are created with mode 0o600 (user read/write only).
/// On Windows, files inherit directory permissions.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?; // Ensure data is flushed to physical media

    temp.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            ))
        } else {
            Error::Io(e.error)
        }
    })?;
    debug!("Settings saved to {}", path.display());
    Ok(())
}

/// Saves the config to the default location.
pub fn save_config(config: &AppConfig) -> Result<()> {
    let path = config_path()
        .ok_or_else(|| Error::Internal("Configuration directory not found".to_string()))?;
    save_config_to(config, &path)
}

/// Loads the config from `path`. A missing file yields the defaults.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read and `Error::Serialization`
/// if it is not valid JSON.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    match std::fs::read_to_string(path) {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// Loads the config from the default location, or returns the defaults if
/// it is missing or unreadable.
pub fn load_config() -> AppConfig {
    let Some(path) = config_path() else {
        return AppConfig::default();
    };
    load_config_from(&path).unwrap_or_else(|e| {
        warn!("Ignoring {}: {}", path.display(), e);
        AppConfig::default()
    })
}
