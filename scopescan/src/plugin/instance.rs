use std::fmt;
use std::sync::Arc;

use super::traits::{Plugin, PluginContext, PluginExtension, ResultSender};
use crate::domain::{ModuleKind, PipelineItem};
use crate::{Error, Result};

/// A plugin bound to one invocation.
///
/// Obtained from the registry. The wrapped plugin is shared; the task id,
/// parameter and result sender belong to this instance only.
pub struct PluginInstance {
    plugin: Arc<dyn Plugin>,
    task_id: String,
    parameter: String,
    extension: PluginExtension,
    results: Option<ResultSender>,
}

impl PluginInstance {
    pub(crate) fn new(plugin: Arc<dyn Plugin>) -> Self {
        let extension = plugin.extension();
        Self {
            plugin,
            task_id: String::new(),
            parameter: String::new(),
            extension,
            results: None,
        }
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn plugin_id(&self) -> &str {
        self.plugin.plugin_id()
    }

    pub fn module(&self) -> ModuleKind {
        self.plugin.module()
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn set_task_id(&mut self, task_id: impl Into<String>) {
        self.task_id = task_id.into();
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn set_parameter(&mut self, parameter: impl Into<String>) {
        self.parameter = parameter.into();
    }

    pub fn extension(&self) -> &PluginExtension {
        &self.extension
    }

    pub fn set_extension(&mut self, extension: PluginExtension) {
        self.extension = extension;
    }

    pub fn set_results(&mut self, results: ResultSender) {
        self.results = Some(results);
    }

    pub fn has_results(&self) -> bool {
        self.results.is_some()
    }

    pub async fn install(&self) -> bool {
        self.plugin.install().await
    }

    pub async fn check(&self) -> bool {
        self.plugin.check().await
    }

    fn context(&self) -> PluginContext {
        PluginContext {
            task_id: self.task_id.clone(),
            module: self.module(),
            plugin_name: self.name().to_string(),
            plugin_id: self.plugin_id().to_string(),
            parameter: self.parameter.clone(),
            extension: self.extension.clone(),
            results: self.results.clone(),
        }
    }

    /// Run the plugin against one item and publish whatever it returns.
    ///
    /// Returns the number of items published after `execute` returned.
    pub async fn execute(self, input: PipelineItem) -> Result<usize> {
        let Some(results) = self.results.clone() else {
            return Err(Error::plugin_execution(
                self.name(),
                "result sender not bound",
            ));
        };

        let ctx = self.context();
        let output = self.plugin.execute(&ctx, input).await?;

        let published = output.items.len();
        for item in output.items {
            results.send(item).await?;
        }
        Ok(published)
    }
}

/// Cloning yields a fresh instance of the same plugin.
///
/// Identity and extension state are kept. The task id, parameter and result
/// sender start out empty, so state never leaks between invocations.
impl Clone for PluginInstance {
    fn clone(&self) -> Self {
        Self {
            plugin: Arc::clone(&self.plugin),
            task_id: String::new(),
            parameter: String::new(),
            extension: self.extension.clone(),
            results: None,
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name())
            .field("plugin_id", &self.plugin_id())
            .field("module", &self.module())
            .field("task_id", &self.task_id)
            .field("parameter", &self.parameter)
            .field("bound", &self.results.is_some())
            .finish()
    }
}
