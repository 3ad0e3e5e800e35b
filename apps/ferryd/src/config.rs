//! Daemon configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/fileferry/ferryd.toml`
//! - Windows: `%APPDATA%/fileferry/ferryd.toml`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP port to listen on (0 = OS-assigned).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding one blob file per stored file id.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Maximum concurrent upload calls.
    #[serde(default = "default_max_uploads")]
    pub max_uploads: usize,

    /// Maximum concurrent download calls.
    #[serde(default = "default_max_downloads")]
    pub max_downloads: usize,

    /// Maximum concurrent list calls.
    #[serde(default = "default_max_lists")]
    pub max_lists: usize,
}

fn default_port() -> u16 {
    9000
}

fn default_storage_dir() -> String {
    "./storage".into()
}

fn default_max_uploads() -> usize {
    10
}

fn default_max_downloads() -> usize {
    10
}

fn default_max_lists() -> usize {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            storage_dir: default_storage_dir(),
            max_uploads: default_max_uploads(),
            max_downloads: default_max_downloads(),
            max_lists: default_max_lists(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Saves the current configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("fileferry")
            .join("ferryd.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("fileferry").join("ferryd.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/fileferry/ferryd.toml"))
    }
}
