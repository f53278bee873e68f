//! Plugin name → constructor table.
//!
//! The registry is an ordinary value. Pipelines are built from it once at
//! startup; nothing looks plugins up by name afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::filters::{
    AffinityDaemon, Geolocation, NetEnvironment, RuntimeType, SpecificResource, SupplierName,
    TaintToleration,
};
use crate::framework::Plugin;
use crate::scorers::{CorePriority, VirtualNode};

pub type PluginFactory = fn() -> Arc<dyn Plugin>;

#[derive(Clone)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Every built-in plugin, plus the historical `NetEnviroment` spelling.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("TaintToleration", || Arc::new(TaintToleration));
        registry.register("SpecificResource", || Arc::new(SpecificResource));
        registry.register("AffinityDaemon", || Arc::new(AffinityDaemon));
        registry.register("NetEnvironment", || Arc::new(NetEnvironment));
        registry.register("NetEnviroment", || Arc::new(NetEnvironment));
        registry.register("Geolocation", || Arc::new(Geolocation));
        registry.register("SupplierName", || Arc::new(SupplierName));
        registry.register("RuntimeType", || Arc::new(RuntimeType));
        registry.register("CorePriority", || Arc::new(CorePriority));
        registry.register("VirtualNode", || Arc::new(VirtualNode));
        registry
    }

    /// Add or replace a plugin constructor.
    pub fn register(&mut self, name: &str, factory: PluginFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn Plugin>, ConfigError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ConfigError::UnknownPlugin(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
