//! Plugin registry.
//!
//! Plugins are registered once at startup, installed and checked, and then
//! looked up by (module, name) for every invocation.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::instance::PluginInstance;
use super::traits::Plugin;
use crate::domain::ModuleKind;

/// Collects plugins before the registry is frozen.
#[derive(Default)]
pub struct PluginRegistryBuilder {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn register_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Run install then check on every plugin, concurrently.
    ///
    /// Check is skipped for plugins that failed to install.
    ///
    /// Plugins whose install or check fails are left out of the registry and
    /// never run.
    pub async fn initialize(self) -> (PluginRegistry, PluginHealthReport) {
        let probes = self.plugins.into_iter().map(|plugin| async move {
            let installed = plugin.install().await;
            let healthy = installed && plugin.check().await;
            (plugin, installed, healthy)
        });

        let mut report = PluginHealthReport::default();
        let mut registry = PluginRegistry::default();
        for (plugin, installed, healthy) in join_all(probes).await {
            report.entries.push(PluginHealth {
                module: plugin.module(),
                name: plugin.name().to_string(),
                plugin_id: plugin.plugin_id().to_string(),
                installed,
                healthy,
            });

            if !installed {
                warn!(plugin = %plugin.name(), module = %plugin.module(), "Plugin install failed, not registering");
                continue;
            }
            if !healthy {
                warn!(plugin = %plugin.name(), module = %plugin.module(), "Plugin check failed, not registering");
                continue;
            }
            registry.insert(plugin);
        }

        info!(
            registered = registry.len(),
            unhealthy = report.unhealthy().count(),
            "Plugin registry initialized"
        );
        (registry, report)
    }

    /// Freeze without running install or check.
    pub fn build(self) -> PluginRegistry {
        let mut registry = PluginRegistry::default();
        for plugin in self.plugins {
            registry.insert(plugin);
        }
        registry
    }
}

/// Read-only plugin catalogue, safe to share across tasks.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<(ModuleKind, String), Arc<dyn Plugin>>,
    /// Plugin id to name, per module.
    aliases: HashMap<(ModuleKind, String), String>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::new()
    }

    fn insert(&mut self, plugin: Arc<dyn Plugin>) {
        let module = plugin.module();
        let name = plugin.name().to_string();
        if plugin.plugin_id() != name {
            self.aliases
                .insert((module, plugin.plugin_id().to_string()), name.clone());
        }
        if self.plugins.insert((module, name.clone()), plugin).is_some() {
            warn!(plugin = %name, module = %module, "Plugin registered twice, keeping the last one");
        }
    }

    /// Fresh instance of a plugin, by name or id.
    pub fn get(&self, module: ModuleKind, name: &str) -> Option<PluginInstance> {
        let plugin = self.plugins.get(&(module, name.to_string())).or_else(|| {
            let alias = self.aliases.get(&(module, name.to_string()))?;
            self.plugins.get(&(module, alias.clone()))
        })?;
        Some(PluginInstance::new(Arc::clone(plugin)))
    }

    pub fn contains(&self, module: ModuleKind, name: &str) -> bool {
        self.get(module, name).is_some()
    }

    /// Registered plugin names of a module, sorted.
    pub fn names(&self, module: ModuleKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .plugins
            .keys()
            .filter(|(m, _)| *m == module)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Install and check outcome of one plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginHealth {
    pub module: ModuleKind,
    pub name: String,
    pub plugin_id: String,
    pub installed: bool,
    pub healthy: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginHealthReport {
    pub entries: Vec<PluginHealth>,
}

impl PluginHealthReport {
    pub fn unhealthy(&self) -> impl Iterator<Item = &PluginHealth> {
        self.entries.iter().filter(|e| !e.healthy)
    }

    pub fn all_healthy(&self) -> bool {
        self.entries.iter().all(|e| e.healthy)
    }
}
