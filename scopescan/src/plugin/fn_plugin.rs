//! Closure-backed plugins.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::traits::{Plugin, PluginContext, PluginExtension, PluginOutput};
use crate::Result;
use crate::domain::{ModuleKind, PipelineItem};

type ExecuteFn =
    Arc<dyn Fn(PluginContext, PipelineItem) -> BoxFuture<'static, Result<PluginOutput>> + Send + Sync>;
type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// A plugin assembled from closures.
///
/// Install and check default to always succeeding.
pub struct FnPlugin {
    name: String,
    plugin_id: String,
    module: ModuleKind,
    extension: PluginExtension,
    install: Option<ProbeFn>,
    check: Option<ProbeFn>,
    execute: ExecuteFn,
}

impl FnPlugin {
    pub fn new<F, Fut>(name: impl Into<String>, module: ModuleKind, execute: F) -> Self
    where
        F: Fn(PluginContext, PipelineItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PluginOutput>> + Send + 'static,
    {
        let name = name.into();
        Self {
            plugin_id: name.clone(),
            name,
            module,
            extension: PluginExtension::None,
            install: None,
            check: None,
            execute: Arc::new(move |ctx, input| Box::pin(execute(ctx, input))),
        }
    }

    pub fn with_id(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = plugin_id.into();
        self
    }

    pub fn with_extension(mut self, extension: PluginExtension) -> Self {
        self.extension = extension;
        self
    }

    pub fn with_install<F, Fut>(mut self, install: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.install = Some(Arc::new(move || Box::pin(install())));
        self
    }

    pub fn with_check<F, Fut>(mut self, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.check = Some(Arc::new(move || Box::pin(check())));
        self
    }
}

#[async_trait]
impl Plugin for FnPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> ModuleKind {
        self.module
    }

    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    async fn install(&self) -> bool {
        match &self.install {
            Some(install) => install().await,
            None => true,
        }
    }

    async fn check(&self) -> bool {
        match &self.check {
            Some(check) => check().await,
            None => true,
        }
    }

    fn extension(&self) -> PluginExtension {
        self.extension.clone()
    }

    async fn execute(&self, ctx: &PluginContext, input: PipelineItem) -> Result<PluginOutput> {
        (self.execute)(ctx.clone(), input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_plugin_defaults() {
        let plugin = FnPlugin::new("noop", ModuleKind::DirScan, |_, _| async {
            Ok(PluginOutput::empty())
        });
        assert_eq!(plugin.name(), "noop");
        assert_eq!(plugin.plugin_id(), "noop");
        assert_eq!(plugin.module(), ModuleKind::DirScan);
        assert!(plugin.install().await);
        assert!(plugin.check().await);
        assert_eq!(plugin.extension(), PluginExtension::None);
    }

    #[tokio::test]
    async fn test_fn_plugin_install_and_check() {
        let plugin = FnPlugin::new("broken", ModuleKind::DirScan, |_, _| async {
            Ok(PluginOutput::empty())
        })
        .with_id("b-1")
        .with_install(|| async { true })
        .with_check(|| async { false });
        assert_eq!(plugin.plugin_id(), "b-1");
        assert!(plugin.install().await);
        assert!(!plugin.check().await);
    }
}
