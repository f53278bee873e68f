pub mod config;
pub mod labels;
pub mod types;

pub use config::{
    MeshplaceConfig, PluginsConfig, QueueConfig, RetryConfig, SchedulerConfig, WeightedPlugin,
};
pub use types::*;
