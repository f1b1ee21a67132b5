//! Configuration schema and loader for vkv clients.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Writer identifier stamped into version markers on accepted puts.
    pub writer_id: String,

    /// Store selection and backend settings.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Which collaborator the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local map, lost on exit.
    Memory,
    /// WAL-backed engine under `data_dir`.
    Durable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Logical store name. Each store gets its own subdirectory.
    #[serde(default = "default_store_name")]
    pub name: String,

    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Root directory for durable stores.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fsync policy: "always", "batch", "none" (any case).
    #[serde(default = "default_fsync")]
    pub fsync: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: default_store_name(),
            backend: default_backend(),
            data_dir: default_data_dir(),
            fsync: default_fsync(),
        }
    }
}

impl StoreConfig {
    /// Directory holding this store's WAL.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join(&self.name)
    }
}

// --- Defaults ---

fn default_store_name() -> String {
    "test".to_string()
}
fn default_backend() -> BackendKind {
    BackendKind::Memory
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_fsync() -> String {
    "batch".to_string()
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ClientConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.writer_id.trim().is_empty() {
            return Err(ConfigError::Invalid("writer_id must not be empty".into()));
        }
        if self.store.name.trim().is_empty() {
            return Err(ConfigError::Invalid("store.name must not be empty".into()));
        }
        if self.store.name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "store.name ({}) must not contain path separators",
                self.store.name
            )));
        }
        if !matches!(
            self.store.fsync.to_lowercase().as_str(),
            "always" | "batch" | "none"
        ) {
            return Err(ConfigError::Invalid(format!(
                "store.fsync ({}) must be one of always, batch, none",
                self.store.fsync
            )));
        }
        if self.store.backend == BackendKind::Durable
            && self.store.data_dir.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid(
                "store.data_dir is required for the durable backend".into(),
            ));
        }
        Ok(())
    }
}

/// Load a `ClientConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `ClientConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
