//! Scheduler configuration structures.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::resource_scheduler::DEFAULT_DATA_TRANSFER_DELAY_MS;
use crate::core::resources::{ResourceDescription, ResourceKind};

/// Capacity declaration of one worker resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Capacity per resource kind; every entry must be non-zero.
    pub capacity: BTreeMap<ResourceKind, u64>,
}

impl ResourceConfig {
    /// Converts the declaration into a capacity vector.
    pub fn to_description(&self) -> ResourceDescription {
        self.capacity.iter().map(|(&k, &v)| (k, v)).collect()
    }

    /// Validate capacity values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity.is_empty() {
            return Err("capacity must declare at least one kind".into());
        }
        if self.capacity.values().any(|&v| v == 0) {
            return Err("capacity entries must be greater than 0".into());
        }
        Ok(())
    }
}

/// Background optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Pause between optimization rounds, in milliseconds.
    pub interval_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of worker name to capacity declaration.
    pub resources: HashMap<String, ResourceConfig>,
    /// Background optimizer settings.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Per-predecessor remote data transfer penalty, in milliseconds.
    #[serde(default = "default_transfer_delay")]
    pub data_transfer_delay_ms: i64,
}

fn default_transfer_delay() -> i64 {
    DEFAULT_DATA_TRANSFER_DELAY_MS
}

impl SchedulerConfig {
    /// Single-worker configuration sized to the local machine.
    pub fn local_default() -> Self {
        let mut capacity = BTreeMap::new();
        capacity.insert(ResourceKind::Cpu, num_cpus::get() as u64);
        let mut resources = HashMap::new();
        resources.insert("local".to_string(), ResourceConfig { capacity });
        Self {
            resources,
            optimizer: OptimizerConfig::default(),
            data_transfer_delay_ms: DEFAULT_DATA_TRANSFER_DELAY_MS,
        }
    }

    /// Validate all resources and top-level settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.resources.is_empty() {
            return Err("at least one resource must be defined".into());
        }
        for (name, resource) in &self.resources {
            resource
                .validate()
                .map_err(|e| format!("resource `{name}` invalid: {e}"))?;
        }
        if self.optimizer.interval_ms == 0 {
            return Err("optimizer interval_ms must be greater than 0".into());
        }
        if self.data_transfer_delay_ms < 0 {
            return Err("data_transfer_delay_ms must not be negative".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: SchedulerConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `GAPLINE_*` environment overrides (loading `.env` if present).
    pub fn apply_env_overrides(&mut self) {
        let _ = dotenvy::dotenv();
        if let Some(interval) = env_number("GAPLINE_OPTIMIZER_INTERVAL_MS") {
            self.optimizer.interval_ms = interval;
        }
        if let Some(delay) = env_number::<i64>("GAPLINE_DATA_TRANSFER_DELAY_MS") {
            self.data_transfer_delay_ms = delay;
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
