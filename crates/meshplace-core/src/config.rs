//! meshplace.toml configuration parser.
//!
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MeshplaceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Number of reconcile workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Binding attempts per run before giving up on an SLA failure.
    #[serde(default = "default_max_binding_attempts")]
    pub max_binding_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_binding_attempts: default_max_binding_attempts(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_max_binding_attempts() -> u32 {
    3
}

/// Ordered plugin names per extension point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginsConfig {
    #[serde(default)]
    pub pre_filter: Vec<String>,
    #[serde(default = "default_filters")]
    pub filter: Vec<String>,
    #[serde(default)]
    pub post_filter: Vec<String>,
    #[serde(default = "default_pre_score")]
    pub pre_score: Vec<String>,
    #[serde(default = "default_score")]
    pub score: Vec<WeightedPlugin>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeightedPlugin {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl WeightedPlugin {
    pub fn new(name: &str, weight: u32) -> Self {
        Self {
            name: name.to_string(),
            weight,
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            pre_filter: Vec::new(),
            filter: default_filters(),
            post_filter: Vec::new(),
            pre_score: default_pre_score(),
            score: default_score(),
        }
    }
}

fn default_filters() -> Vec<String> {
    [
        "TaintToleration",
        "SpecificResource",
        "AffinityDaemon",
        "NetEnvironment",
        "Geolocation",
        "SupplierName",
        "RuntimeType",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_pre_score() -> Vec<String> {
    vec!["CorePriority".to_string()]
}

fn default_score() -> Vec<WeightedPlugin> {
    vec![
        WeightedPlugin::new("CorePriority", 3),
        WeightedPlugin::new("VirtualNode", 3),
    ]
}

fn default_weight() -> u32 {
    1
}

/// Backoff applied when persisting a binding hits a version conflict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_retry_steps")]
    pub steps: u32,
    #[serde(default = "default_retry_duration_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub factor: f64,
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
    /// Upper bound on a single sleep. `None` means uncapped.
    #[serde(default)]
    pub cap_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            steps: default_retry_steps(),
            duration_ms: default_retry_duration_ms(),
            factor: default_retry_factor(),
            jitter: default_retry_jitter(),
            cap_ms: None,
        }
    }
}

fn default_retry_steps() -> u32 {
    5
}

fn default_retry_duration_ms() -> u64 {
    10
}

fn default_retry_factor() -> f64 {
    1.0
}

fn default_retry_jitter() -> f64 {
    0.1
}

/// Requeue rate limiting for failed keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_qps")]
    pub qps: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    5
}

fn default_max_delay_ms() -> u64 {
    1_000_000
}

fn default_qps() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    100
}

impl MeshplaceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: MeshplaceConfig = toml::from_str(content)?;
        if config.scheduler.workers == 0 {
            anyhow::bail!("scheduler.workers must be at least 1");
        }
        if config.scheduler.max_binding_attempts == 0 {
            anyhow::bail!("scheduler.max_binding_attempts must be at least 1");
        }
        if !(config.queue.qps.is_finite() && config.queue.qps > 0.0) {
            anyhow::bail!("queue.qps must be a positive number");
        }
        if !(config.retry.factor.is_finite() && config.retry.jitter.is_finite()) {
            anyhow::bail!("retry.factor and retry.jitter must be finite");
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
