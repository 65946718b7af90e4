//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::StoredToken;

const DEFAULT_API_BASE: &str = "https://api.findernate.com";
const DEFAULT_PUSH_LISTEN: &str = "127.0.0.1:47321";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the FinderNate REST API
    pub api_base_url: String,
    /// Base URL of the socket.io endpoint (usually the API host)
    pub socket_url: String,
    /// Local address the notification helper connects to
    pub push_listen_addr: String,
    /// Logged-in user id
    pub user_id: Option<String>,
    /// Bearer token for the REST API and socket auth
    pub access_token: Option<StoredToken>,
    /// Delay between clearing the call surface and restoring the route
    pub restore_delay_ms: u64,
    /// Upper bound on waiting for the backend to confirm an ended call
    pub end_call_timeout_secs: u64,
    /// Delay between synthesizing an offer and accepting it (notification accept)
    pub relay_settle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            socket_url: DEFAULT_API_BASE.to_string(),
            push_listen_addr: DEFAULT_PUSH_LISTEN.to_string(),
            user_id: None,
            access_token: None,
            restore_delay_ms: 100,
            end_call_timeout_secs: 10,
            relay_settle_ms: 100,
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "findernate", "findernate-calls")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_toml(&content)
    }

    fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn clear_credentials(&mut self) {
        self.user_id = None;
        self.access_token = None;
    }

    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }

    pub fn end_call_timeout(&self) -> Duration {
        Duration::from_secs(self.end_call_timeout_secs)
    }

    pub fn relay_settle(&self) -> Duration {
        Duration::from_millis(self.relay_settle_ms)
    }
}
