//! Engine configuration.
//!
//! Values come from defaults, optionally overridden by a JSON file or by
//! `SCOPESCAN_*` environment variables (see [`EngineConfig::from_env`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ModuleKind;
use crate::pipeline::WorkerPoolConfig;
use crate::{Error, Result};

/// Environment variable prefix.
const ENV_PREFIX: &str = "SCOPESCAN_";

/// How long a link waits on its plugin invocations before reading the next item.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WaitGranularity {
    /// Wait for each invocation before submitting the next one.
    /// Serializes a module to one in-flight plugin per link.
    Invocation,
    /// Submit every plugin for an item, then wait for that batch.
    #[default]
    Item,
    /// Never wait inside the loop; only drain once the input closes.
    Link,
}

/// Configuration for the pipeline engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the queue between two chain links.
    pub link_queue_capacity: usize,
    /// Capacity of each link's plugin result queue.
    pub result_queue_capacity: usize,
    pub wait_granularity: WaitGranularity,
    /// Pool settings for modules without an explicit entry.
    pub default_pool: WorkerPoolConfig,
    pub module_pools: HashMap<ModuleKind, WorkerPoolConfig>,
    /// Interval between pool occupancy samples.
    pub monitor_interval_ms: u64,
    /// Capacity of the pipeline event broadcast channel.
    pub event_capacity: usize,
    pub database_url: String,
    pub log_dir: PathBuf,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            link_queue_capacity: 100,
            result_queue_capacity: 100,
            wait_granularity: WaitGranularity::default(),
            default_pool: WorkerPoolConfig::default(),
            module_pools: HashMap::new(),
            monitor_interval_ms: 5000,
            event_capacity: 256,
            database_url: "sqlite:scopescan.db?mode=rwc".to_string(),
            log_dir: PathBuf::from("logs"),
            log_filter: crate::logging::DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl EngineConfig {
    /// Pool settings for a module.
    pub fn pool_for(&self, module: ModuleKind) -> &WorkerPoolConfig {
        self.module_pools.get(&module).unwrap_or(&self.default_pool)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment on top of defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    ///
    /// Recognized keys (all prefixed with `SCOPESCAN_`): `LINK_QUEUE_CAPACITY`,
    /// `RESULT_QUEUE_CAPACITY`, `WAIT_GRANULARITY`, `MAX_WORKERS`,
    /// `POOL_QUEUE_CAPACITY`, `MONITOR_INTERVAL_MS`, `EVENT_CAPACITY`,
    /// `DATABASE_URL`, `LOG_DIR`, `LOG_FILTER`, and `POOL_<MODULE>` for a
    /// per-module worker count (module name upper-cased, e.g. `POOL_PORTSCAN`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(v) = parse_var(&get, "LINK_QUEUE_CAPACITY")? {
            config.link_queue_capacity = v;
        }
        if let Some(v) = parse_var(&get, "RESULT_QUEUE_CAPACITY")? {
            config.result_queue_capacity = v;
        }
        if let Some(v) = parse_var(&get, "WAIT_GRANULARITY")? {
            config.wait_granularity = v;
        }
        if let Some(v) = parse_var(&get, "MAX_WORKERS")? {
            config.default_pool.max_workers = v;
        }
        if let Some(v) = parse_var(&get, "POOL_QUEUE_CAPACITY")? {
            config.default_pool.queue_capacity = v;
        }
        if let Some(v) = parse_var(&get, "MONITOR_INTERVAL_MS")? {
            config.monitor_interval_ms = v;
        }
        if let Some(v) = parse_var(&get, "EVENT_CAPACITY")? {
            config.event_capacity = v;
        }
        if let Some(v) = get("DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = get("LOG_DIR") {
            config.log_dir = PathBuf::from(v);
        }
        if let Some(v) = get("LOG_FILTER") {
            config.log_filter = v;
        }

        for module in ModuleKind::chain_order() {
            let key = format!("POOL_{}", module.as_ref().to_ascii_uppercase());
            if let Some(max_workers) = parse_var::<usize, _>(&get, &key)? {
                config.module_pools.insert(
                    module,
                    WorkerPoolConfig {
                        max_workers,
                        ..config.default_pool.clone()
                    },
                );
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.link_queue_capacity == 0 {
            return Err(Error::config("link_queue_capacity must be greater than 0"));
        }
        if self.result_queue_capacity == 0 {
            return Err(Error::config("result_queue_capacity must be greater than 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::config("event_capacity must be greater than 0"));
        }
        if self.default_pool.max_workers == 0 {
            return Err(Error::config("default_pool.max_workers must be greater than 0"));
        }
        if let Some((module, _)) = self
            .module_pools
            .iter()
            .find(|(_, pool)| pool.max_workers == 0)
        {
            return Err(Error::config(format!(
                "pool for {module} must allow at least one worker"
            )));
        }
        Ok(())
    }
}

fn parse_var<T, G>(get: &G, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("{ENV_PREFIX}{name}={raw:?}: {e}"))),
    }
}
