//! Configuration types for the workspace, git synchronization, locking, and
//! storage behavior.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete cairn configuration.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct CairnConfig {
    /// Workspace layout configuration
    pub workspace: WorkspaceSettings,
    /// Git synchronization configuration
    pub git: GitSettings,
    /// Lock acquisition configuration
    pub locking: LockSettings,
    /// State-file parsing configuration
    pub storage: StorageSettings,
}

/// Workspace layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    /// Backend used when the caller does not name one
    pub default_backend: String,
    /// Subtree inside the checkout that holds task data
    pub data_dir: String,
    /// Override for where the managed checkout lives; defaults to
    /// `~/.cairn/workspace`
    pub state_dir: Option<PathBuf>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            default_backend: "json".to_owned(),
            data_dir: "tasks".to_owned(),
            state_dir: None,
        }
    }
}

/// Git synchronization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// URL of the remote holding the task branch
    pub remote_url: Option<String>,
    /// Branch the workspace tracks
    pub branch: String,
    /// Timeout in seconds for a single git subprocess
    pub command_timeout_secs: u64,
    /// Extra push attempts after a non-fast-forward rejection
    pub push_retries: u32,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            remote_url: None,
            branch: "main".to_owned(),
            command_timeout_secs: 60,
            push_retries: 2,
        }
    }
}

/// Lock acquisition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// Bounded wait in seconds for the in-process operation lock
    pub operation_timeout_secs: u64,
    /// Age in seconds past which a cross-process lock file counts as abandoned
    pub advisory_ttl_secs: u64,
    /// Poll interval in milliseconds while waiting on the cross-process lock
    pub advisory_poll_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            operation_timeout_secs: 30,
            advisory_ttl_secs: 300,
            advisory_poll_ms: 100,
        }
    }
}

/// State-file parsing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageSettings {
    /// Surface a parse failure as an error instead of warning and treating
    /// the file as empty
    pub strict_parse: bool,
}

impl CairnConfig {
    /// Get the default config directory path (`~/.cairn`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Other("Could not determine home directory".to_owned()))?;
        Ok(home.join(".cairn"))
    }

    /// Get the default config file path (`~/.cairn/config.toml`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Directory holding the managed synced checkout.
    ///
    /// # Errors
    /// Returns an error if no override is configured and the home directory
    /// cannot be determined
    pub fn state_root(&self) -> Result<PathBuf> {
        match &self.workspace.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::config_dir()?.join("workspace")),
        }
    }

    /// Load config from the default location (`~/.cairn/config.toml`)
    /// If the config doesn't exist, creates it with default values
    ///
    /// # Errors
    /// Returns an error if the config cannot be read or created
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|error| Error::Other(format!("Failed to read config: {error}")))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|error| Error::Other(format!("Failed to parse config: {error}")))?;

        tracing::debug!(
            "Loaded config from {:?}: remote_url={}",
            path,
            if config.git.remote_url.is_some() {
                "present"
            } else {
                "missing"
            }
        );

        Ok(config)
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                Error::Other(format!("Failed to create config directory: {error}"))
            })?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|error| Error::Other(format!("Failed to serialize config: {error}")))?;

        let header = "# Cairn Configuration File\n\
                      # This file is automatically generated on first run\n\
                      # Edit this file to customize your settings\n\n";

        fs::write(path, format!("{header}{contents}"))
            .map_err(|error| Error::Other(format!("Failed to write config: {error}")))?;

        Ok(())
    }
}
