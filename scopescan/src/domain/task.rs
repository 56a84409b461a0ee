//! Scan task model.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::module::ModuleKind;
use crate::{Error, Result};

/// Option flags attached to a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// Drop subdomains already recorded by any earlier task.
    pub ignore_old_subdomains: bool,
}

/// A scan task as accepted from the controller.
///
/// Immutable for the lifetime of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub targets: Vec<String>,
    /// Ordered plugin names per module.
    #[serde(default)]
    pub modules: BTreeMap<ModuleKind, Vec<String>>,
    /// Free-form parameters keyed by module, then by plugin name or id.
    #[serde(default)]
    pub parameters: HashMap<ModuleKind, HashMap<String, String>>,
    #[serde(default)]
    pub options: TaskOptions,
}

impl Task {
    pub fn new(id: impl Into<String>, targets: Vec<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            targets,
            modules: BTreeMap::new(),
            parameters: HashMap::new(),
            options: TaskOptions::default(),
        }
    }

    /// Append plugins to a module's plugin list.
    pub fn with_plugins<I, S>(mut self, module: ModuleKind, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules
            .entry(module)
            .or_default()
            .extend(plugins.into_iter().map(Into::into));
        self
    }

    pub fn with_parameter(
        mut self,
        module: ModuleKind,
        plugin: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.parameters
            .entry(module)
            .or_default()
            .insert(plugin.into(), value.into());
        self
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// Plugin names configured for a module, in execution order.
    pub fn plugins_for(&self, module: ModuleKind) -> &[String] {
        self.modules.get(&module).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Modules with at least one configured plugin, in chain order.
    pub fn configured_modules(&self) -> Vec<ModuleKind> {
        ModuleKind::chain_order()
            .filter(|module| !self.plugins_for(*module).is_empty())
            .collect()
    }

    /// Parameter string for a plugin, looked up by plugin id first and then by name.
    pub fn parameter_for(&self, module: ModuleKind, plugin_id: &str, plugin_name: &str) -> Option<&str> {
        let params = self.parameters.get(&module)?;
        params
            .get(plugin_id)
            .or_else(|| params.get(plugin_name))
            .map(String::as_str)
    }

    /// Human-readable target set used in progress records.
    pub fn target_label(&self) -> String {
        self.targets.join(",")
    }

    pub fn unit_count(&self) -> usize {
        self.targets.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("task id must not be empty"));
        }
        if let Some((module, _)) = self
            .modules
            .iter()
            .find(|(_, plugins)| plugins.iter().any(|p| p.trim().is_empty()))
        {
            return Err(Error::validation(format!(
                "module {module} lists an empty plugin name"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_deserialize() {
        let json = r#"{
            "id": "t-1",
            "targets": ["a.com", "b.com"],
            "modules": {
                "PortScan": ["naabu"],
                "SubdomainScan": ["subfinder", "ksubdomain"]
            },
            "parameters": {
                "SubdomainScan": { "subfinder": "-t 10" }
            },
            "options": { "ignore_old_subdomains": true }
        }"#;

        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.unit_count(), 2);
        assert_eq!(
            task.configured_modules(),
            vec![ModuleKind::SubdomainScan, ModuleKind::PortScan]
        );
        assert_eq!(
            task.plugins_for(ModuleKind::SubdomainScan),
            &["subfinder".to_string(), "ksubdomain".to_string()]
        );
        assert_eq!(
            task.parameter_for(ModuleKind::SubdomainScan, "id-1", "subfinder"),
            Some("-t 10")
        );
        assert_eq!(task.parameter_for(ModuleKind::PortScan, "x", "naabu"), None);
        assert!(task.options.ignore_old_subdomains);
    }

    #[test]
    fn test_parameter_prefers_plugin_id() {
        let task = Task::new("t", vec![])
            .with_parameter(ModuleKind::PortScan, "naabu", "by-name")
            .with_parameter(ModuleKind::PortScan, "p-42", "by-id");
        assert_eq!(
            task.parameter_for(ModuleKind::PortScan, "p-42", "naabu"),
            Some("by-id")
        );
    }

    #[test]
    fn test_validate() {
        assert!(Task::new("", vec![]).validate().is_err());
        let bad = Task::new("t", vec![]).with_plugins(ModuleKind::PortScan, [" "]);
        assert!(bad.validate().is_err());
        let ok = Task::new("t", vec!["a.com".into()]).with_plugins(ModuleKind::PortScan, ["naabu"]);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.target_label(), "a.com");
    }
}
