//! cache, listener and supervision settings
//!
//! Every field has a default so a partial JSON document (or none at all) is
//! enough to configure a cache.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_QUERY_RESULTS: usize = 100_000;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BUFFER_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_BUFFER_MAX_SIZE: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// workers per multi-threaded listener
    pub pool_size: usize,
    /// bounded queue size per multi-threaded listener
    pub queue_capacity: usize,
    pub buffer_interval_ms: u64,
    pub buffer_max_size: usize,
    /// how long `close` waits for in-flight work before force stopping
    pub shutdown_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            pool_size: 4,
            queue_capacity: 10_000,
            buffer_interval_ms: DEFAULT_BUFFER_INTERVAL_MS,
            buffer_max_size: DEFAULT_BUFFER_MAX_SIZE,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ListenerConfig {
    pub fn buffer_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisionConfig {
    pub alive_check_interval_ms: u64,
    /// alive signals older than `factor * alive_interval` on arrival are dropped
    pub alive_delay_factor: i64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        SupervisionConfig {
            alive_check_interval_ms: 1_000,
            alive_delay_factor: 2,
        }
    }
}

impl SupervisionConfig {
    pub fn alive_check_interval(&self) -> Duration {
        Duration::from_millis(self.alive_check_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_query_results: usize,
    pub lock_timeout_ms: u64,
    pub listener: ListenerConfig,
    pub supervision: SupervisionConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_query_results: DEFAULT_MAX_QUERY_RESULTS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            listener: ListenerConfig::default(),
            supervision: SupervisionConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn from_json(js: &str) -> Result<CacheConfig> {
        let config: CacheConfig = serde_json::from_str(js).context("parsing cache config")?;
        config.validate()?;
        Ok(config)
    }

    /// read the config from a json file
    pub fn read_config(path: &Path) -> Result<CacheConfig> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading cache config {}", path.display()))?;
        CacheConfig::from_json(&text)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.listener.pool_size == 0 {
            anyhow::bail!("listener.pool_size must be at least 1");
        }
        if self.listener.queue_capacity == 0 || self.listener.buffer_max_size == 0 {
            anyhow::bail!("listener queue and buffer sizes must be at least 1");
        }
        if self.supervision.alive_delay_factor < 1 {
            anyhow::bail!("supervision.alive_delay_factor must be at least 1");
        }
        Ok(())
    }
}
