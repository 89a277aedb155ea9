use std::fs::{File, read_to_string};
use std::io::Error as IoError;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use fluvio_kv_storage::PoolConfig;

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CLAIM_CONCURRENCY: usize = 16;
const DEFAULT_LIST_CONCURRENCY: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IoError: {0}")]
    Io(#[from] IoError),
    #[error("TomlError: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TomlSerError: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Checkpoint store tuning
///
/// ```toml
/// max_connections = 8
/// acquire_timeout = "5s"
/// operation_timeout = "10s"
/// claim_concurrency = 16
/// list_concurrency = 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(build_fn(private, name = "build_impl"))]
#[serde(default)]
pub struct CheckpointStoreConfig {
    /// upper bound of pooled store connections
    #[builder(default = "PoolConfig::default().max_connections")]
    pub max_connections: usize,
    /// wait for a pooled connection
    #[builder(default = "PoolConfig::default().acquire_timeout")]
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// bound for a single claim, checkpoint update or record read
    #[builder(default = "DEFAULT_OPERATION_TIMEOUT")]
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    /// partitions claimed in parallel by one `claim_ownership` call
    #[builder(default = "DEFAULT_CLAIM_CONCURRENCY")]
    pub claim_concurrency: usize,
    /// records read in parallel while listing
    #[builder(default = "DEFAULT_LIST_CONCURRENCY")]
    pub list_concurrency: usize,
}

impl Default for CheckpointStoreConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            max_connections: pool.max_connections,
            acquire_timeout: pool.acquire_timeout,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            claim_concurrency: DEFAULT_CLAIM_CONCURRENCY,
            list_concurrency: DEFAULT_LIST_CONCURRENCY,
        }
    }
}

impl CheckpointStoreConfigBuilder {
    pub fn build(&self) -> Result<CheckpointStoreConfig, ConfigError> {
        let config = self
            .build_impl()
            .map_err(|e| ConfigError::Invalid(format!("missing config option: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

impl CheckpointStoreConfig {
    pub fn builder() -> CheckpointStoreConfigBuilder {
        CheckpointStoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_owned(),
            ));
        }
        if self.claim_concurrency == 0 || self.list_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.max_connections,
            acquire_timeout: self.acquire_timeout,
        }
    }

    pub fn load_from<T: AsRef<Path>>(path: T) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(?path_ref, "loading from");

        let file_str = read_to_string(path_ref)?;
        Self::load_str(&file_str)
    }

    pub fn load_str(config: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    pub fn save_to<T: AsRef<Path>>(&self, path: T) -> Result<(), ConfigError> {
        let path_ref = path.as_ref();
        debug!("saving config: {:#?} to: {:#?}", self, path_ref);
        let toml = self.to_toml()?;

        let mut file = File::create(path_ref)?;
        file.write_all(toml.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}
