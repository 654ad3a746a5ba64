use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ReplicaError;
use crate::ingest::IngestSettings;

pub const DEFAULT_CONFIG_FILE: &str = "np-replica.json";
pub const DEFAULT_ENDPOINT_BASE: &str = "http://rdf4j:8080/rdf4j-server/";
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.knowledgepixels.com/";

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint_base: Option<String>,
    #[serde(default)]
    pub endpoint_type: Option<String>,
    #[serde(default)]
    pub registry_url: Option<String>,
    #[serde(default)]
    pub init_wait_seconds: Option<u64>,
    #[serde(default)]
    pub load_dir: Option<String>,
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    #[serde(default)]
    pub log_every: Option<u64>,
    #[serde(default)]
    pub metadata_retries: Option<u32>,
    #[serde(default)]
    pub metadata_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub batch_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub batch_retry_max_delay_ms: Option<u64>,
    #[serde(default)]
    pub update_interval_seconds: Option<u64>,
    #[serde(default)]
    pub fanout_attempts: Option<u32>,
}

impl Config {
    /// Values set in `overrides` win.
    pub fn merge(self, overrides: Config) -> Config {
        Config {
            endpoint_base: overrides.endpoint_base.or(self.endpoint_base),
            endpoint_type: overrides.endpoint_type.or(self.endpoint_type),
            registry_url: overrides.registry_url.or(self.registry_url),
            init_wait_seconds: overrides.init_wait_seconds.or(self.init_wait_seconds),
            load_dir: overrides.load_dir.or(self.load_dir),
            cache_capacity: overrides.cache_capacity.or(self.cache_capacity),
            log_every: overrides.log_every.or(self.log_every),
            metadata_retries: overrides.metadata_retries.or(self.metadata_retries),
            metadata_retry_delay_ms: overrides
                .metadata_retry_delay_ms
                .or(self.metadata_retry_delay_ms),
            batch_retry_delay_ms: overrides.batch_retry_delay_ms.or(self.batch_retry_delay_ms),
            batch_retry_max_delay_ms: overrides
                .batch_retry_max_delay_ms
                .or(self.batch_retry_max_delay_ms),
            update_interval_seconds: overrides
                .update_interval_seconds
                .or(self.update_interval_seconds),
            fanout_attempts: overrides.fanout_attempts.or(self.fanout_attempts),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    Rdf4j,
    Memory,
}

impl FromStr for EndpointType {
    type Err = ReplicaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rdf4j" => Ok(EndpointType::Rdf4j),
            "memory" => Ok(EndpointType::Memory),
            _ => Err(ReplicaError::UnknownEndpointType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint_base: String,
    pub endpoint_type: EndpointType,
    pub registry_url: String,
    pub init_wait: Duration,
    pub load_dir: Utf8PathBuf,
    pub cache_capacity: usize,
    pub update_interval: Duration,
    pub fanout_attempts: u32,
    pub ingest: IngestSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the JSON config file, if any, and applies `overrides` on top.
    /// An explicitly named file must exist; the default file is optional.
    pub fn resolve(path: Option<&str>, overrides: Config) -> Result<ResolvedConfig, ReplicaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let file_config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| ReplicaError::ConfigRead(config_path.clone()))?;
            serde_json::from_str::<Config>(&content)
                .map_err(|err| ReplicaError::ConfigParse(err.to_string()))?
        } else if path.is_some() {
            return Err(ReplicaError::MissingConfig(config_path));
        } else {
            Config::default()
        };

        Self::resolve_config(file_config.merge(overrides))
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ReplicaError> {
        let endpoint_type = match config.endpoint_type.as_deref() {
            Some(value) => value.parse()?,
            None => EndpointType::Rdf4j,
        };
        let defaults = IngestSettings::default();
        let ingest = IngestSettings {
            log_every: config.log_every.unwrap_or(defaults.log_every),
            metadata_retries: config
                .metadata_retries
                .unwrap_or(defaults.metadata_retries),
            metadata_retry_delay: config
                .metadata_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.metadata_retry_delay),
            batch_retry_delay: config
                .batch_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_retry_delay),
            batch_retry_max_delay: config
                .batch_retry_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_retry_max_delay),
        };

        Ok(ResolvedConfig {
            endpoint_base: with_trailing_slash(
                config.endpoint_base.as_deref().unwrap_or(DEFAULT_ENDPOINT_BASE),
            ),
            endpoint_type,
            registry_url: with_trailing_slash(
                config.registry_url.as_deref().unwrap_or(DEFAULT_REGISTRY_URL),
            ),
            init_wait: Duration::from_secs(config.init_wait_seconds.unwrap_or(0)),
            load_dir: Utf8PathBuf::from(config.load_dir.unwrap_or_else(|| "load".to_string())),
            cache_capacity: config
                .cache_capacity
                .unwrap_or(crate::repository::DEFAULT_CAPACITY)
                .max(1),
            update_interval: Duration::from_secs(config.update_interval_seconds.unwrap_or(2).max(1)),
            fanout_attempts: config.fanout_attempts.unwrap_or(5).max(1),
            ingest,
        })
    }
}

fn with_trailing_slash(value: &str) -> String {
    let mut value = value.trim().to_string();
    if !value.ends_with('/') {
        value.push('/');
    }
    value
}
