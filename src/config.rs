use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NklError;

pub const DEFAULT_CONFIG_FILE: &str = "pareto-nkl.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub object_store: ObjectStoreSettings,
    #[serde(default)]
    pub upstream: Option<UpstreamSettings>,
    pub admin_secret: String,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub credentials: CredentialSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectStoreSettings {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_max_list_pages")]
    pub max_list_pages: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamSettings {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    #[serde(default = "default_master_ttl")]
    pub master_ttl_secs: u64,
    #[serde(default = "default_credentials_ttl")]
    pub credentials_ttl_secs: u64,
    #[serde(default = "default_results_ttl")]
    pub results_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            master_ttl_secs: default_master_ttl(),
            credentials_ttl_secs: default_credentials_ttl(),
            results_ttl_secs: default_results_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialSettings {
    #[serde(default = "default_lookup_attempts")]
    pub lookup_attempts: u32,
    #[serde(default = "default_lookup_backoff_ms")]
    pub lookup_backoff_ms: u64,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            lookup_attempts: default_lookup_attempts(),
            lookup_backoff_ms: default_lookup_backoff_ms(),
        }
    }
}

impl CredentialSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.lookup_backoff_ms)
    }
}

fn default_root() -> String {
    "pareto_nkl".to_string()
}

fn default_max_list_pages() -> usize {
    20
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_master_ttl() -> u64 {
    2
}

fn default_credentials_ttl() -> u64 {
    60
}

fn default_results_ttl() -> u64 {
    2
}

fn default_lookup_attempts() -> u32 {
    3
}

fn default_lookup_backoff_ms() -> u64 {
    1000
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Config, NklError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(NklError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| NklError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| NklError::ConfigParse(err.to_string()))?;

        Self::validate(config)
    }

    pub fn validate(mut config: Config) -> Result<Config, NklError> {
        let store = &mut config.object_store;
        if store.cloud_name.trim().is_empty() {
            return Err(NklError::ConfigInvalid(
                "object_store.cloud_name is empty".to_string(),
            ));
        }
        store.root = store.root.trim().trim_matches('/').to_string();
        if store.root.is_empty() {
            return Err(NklError::ConfigInvalid("object_store.root is empty".to_string()));
        }
        if store.max_list_pages == 0 {
            return Err(NklError::ConfigInvalid(
                "object_store.max_list_pages must be at least 1".to_string(),
            ));
        }
        if config.admin_secret.is_empty() {
            return Err(NklError::ConfigInvalid("admin_secret is empty".to_string()));
        }
        if config.credentials.lookup_attempts == 0 {
            return Err(NklError::ConfigInvalid(
                "credentials.lookup_attempts must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}
