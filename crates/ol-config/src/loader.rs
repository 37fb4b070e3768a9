use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use ol_auth::AuthError;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::config::AppConfig;

pub const CONFIG_FILE_NAME: &str = "config.toml";

impl AppConfig {
    /// Load `config.toml` from the platform config directory.
    ///
    /// A missing file yields the defaults.
    #[instrument(level = "info")]
    pub async fn load() -> Result<Self, ConfigError> {
        let path = default_config_path()?;
        if tokio::fs::metadata(&path).await.is_err() {
            info!(
                "No config file at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        Self::load_from(&path).await
    }

    #[instrument(level = "debug")]
    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            error!("Failed to read config file {}: {}", path.display(), e);
            ConfigError::FileReadFailed {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            error!("Failed to parse config file {}: {}", path.display(), e);
            ConfigError::ParsingFailed {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                error!("Failed to create config directory {}: {}", dir.display(), e);
                ConfigError::DirectoryCreationFailed {
                    path: dir.to_path_buf(),
                    source: e,
                }
            })?;
        }

        let toml = toml::to_string_pretty(self).map_err(|e| {
            error!("Failed to serialize config: {}", e);
            ConfigError::SerializationFailed { source: e }
        })?;

        tokio::fs::write(path, toml).await.map_err(|e| {
            error!("Failed to write config file {}: {}", path.display(), e);
            ConfigError::FileWriteFailed {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        info!("Saved config at {}", path.display());
        Ok(())
    }
}

/// Project directories for overlook
pub fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("com", "overlook", "overlook").ok_or_else(|| {
        error!("Failed to determine project directories - this usually indicates an unsupported OS or missing home directory");
        ConfigError::ProjectDirectoriesUnavailable
    })
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Project directories are unavailable - this usually indicates an unsupported OS or missing home directory"
    )]
    ProjectDirectoriesUnavailable,

    #[error("Config file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read config file '{path}': {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParsingFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {source}")]
    SerializationFailed {
        #[source]
        source: toml::ser::Error,
    },

    #[error("Missing required setting '{field}'")]
    MissingField { field: &'static str },

    #[error("Invalid URL for '{field}': '{value}': {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid auth configuration: {0}")]
    InvalidAuth(#[from] AuthError),
}
