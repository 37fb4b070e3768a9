pub mod config;
mod loader;

pub use config::{AppConfig, AuthSection, LogSection, StorageBackend, StorageSection};
pub use loader::{CONFIG_FILE_NAME, ConfigError, default_config_path, project_dirs};
