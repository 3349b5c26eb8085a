//! Process-wide configuration.
//!
//! Loaded once at start-up from a TOML file and passed by reference to the
//! pieces that need it (database connections, the audit builder, the worker
//! pool). Every field has a default so an empty file is a valid config.

use crate::core::error::CerebrumError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_INITIAL_ACCOUNT: &str = "bootstrap_account";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CerebrumConfig {
    pub database: DatabaseConfig,
    /// Account used as operator when a change only names a program.
    pub initial_account_name: String,
    /// entity_type code_str -> value_domain code_str used to name entities
    /// of that type in audit metadata.
    pub entity_type_namespace: BTreeMap<String, String>,
    pub audit: AuditConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    pub entity_type_cache_size: usize,
    pub entity_name_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub queue_max_tries: u32,
    pub queue_retry_ms: u64,
    /// Seconds between progress reports; 0 disables the reporter.
    pub stats_interval_secs: f64,
}

impl Default for CerebrumConfig {
    fn default() -> Self {
        let mut entity_type_namespace = BTreeMap::new();
        entity_type_namespace.insert("account".to_string(), "account_names".to_string());
        entity_type_namespace.insert("group".to_string(), "group_names".to_string());
        Self {
            database: DatabaseConfig::default(),
            initial_account_name: DEFAULT_INITIAL_ACCOUNT.to_string(),
            entity_type_namespace,
            audit: AuditConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cerebrum.db"),
            busy_timeout_secs: 5,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            entity_type_cache_size: 10_000,
            entity_name_cache_size: 10_000,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 10_000,
            queue_max_tries: 60,
            queue_retry_ms: 10_000,
            stats_interval_secs: 10.0,
        }
    }
}

impl CerebrumConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, CerebrumError> {
        let config: CerebrumConfig =
            toml::from_str(content).map_err(|e| CerebrumError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CerebrumError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(CerebrumError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn namespace_for(&self, entity_type: &str) -> Option<&str> {
        self.entity_type_namespace
            .get(entity_type)
            .map(|s| s.as_str())
    }

    fn validate(&self) -> Result<(), CerebrumError> {
        if self.initial_account_name.trim().is_empty() {
            return Err(CerebrumError::ConfigError(
                "initial_account_name must not be empty".to_string(),
            ));
        }
        if self.pool.workers == 0 {
            return Err(CerebrumError::ConfigError(
                "pool.workers must be at least 1".to_string(),
            ));
        }
        if self.pool.queue_size == 0 {
            return Err(CerebrumError::ConfigError(
                "pool.queue_size must be at least 1".to_string(),
            ));
        }
        if !self.pool.stats_interval_secs.is_finite() || self.pool.stats_interval_secs < 0.0 {
            return Err(CerebrumError::ConfigError(format!(
                "pool.stats_interval_secs must be a finite, non-negative number, not {}",
                self.pool.stats_interval_secs
            )));
        }
        if self.audit.entity_type_cache_size == 0 || self.audit.entity_name_cache_size == 0 {
            return Err(CerebrumError::ConfigError(
                "audit cache sizes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
