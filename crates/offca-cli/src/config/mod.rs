//! CLI defaults.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming an alternative defaults file.
pub const CONFIG_ENV: &str = "OFFCA_CONFIG";

/// Defaults applied when the matching flag and environment variable are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Authority configuration (`ca.json`).
    pub ca_config: Option<PathBuf>,

    /// File holding the password for provisioner and intermediate keys.
    pub password_file: Option<PathBuf>,

    /// Program run as `<program> oauth --oidc ...` for OIDC provisioners.
    pub oauth_program: Option<PathBuf>,

    /// Timeout for cloud metadata requests, in seconds.
    pub identity_timeout_secs: Option<u64>,
}

impl Config {
    /// Get the defaults file path.
    pub fn path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let dirs = ProjectDirs::from("dev", "offca", "offca")
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load defaults; a missing file means none.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("error reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("error parsing {}", path.display()))
    }
}
