//! Plugin trait and related types.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::Level;

use crate::domain::{ModuleKind, PipelineItem};
use crate::{Error, Result};

/// Typed per-plugin-kind state carried alongside a plugin.
///
/// Shared data is reference counted so cloning an instance stays cheap.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PluginExtension {
    #[default]
    None,
    /// A dictionary, e.g. for brute forcing.
    Wordlist(Arc<Vec<String>>),
    /// Resolver addresses, e.g. `udp:1.1.1.1:53`.
    Resolvers(Arc<Vec<String>>),
    /// Anything else, as structured JSON.
    Json(serde_json::Value),
}

/// Handle through which a plugin publishes results to its link.
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::Sender<PipelineItem>,
}

impl ResultSender {
    pub fn new(tx: mpsc::Sender<PipelineItem>) -> Self {
        Self { tx }
    }

    /// Publish one result. Waits while the link's result queue is full.
    pub async fn send(&self, item: impl Into<PipelineItem>) -> Result<()> {
        self.tx
            .send(item.into())
            .await
            .map_err(|_| Error::ChannelClosed("plugin results"))
    }
}

/// Per-invocation context handed to [`Plugin::execute`].
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub task_id: String,
    pub module: ModuleKind,
    pub plugin_name: String,
    pub plugin_id: String,
    /// Parameter string configured for this plugin in the task; empty if none.
    pub parameter: String,
    pub extension: PluginExtension,
    pub(crate) results: Option<ResultSender>,
}

impl PluginContext {
    /// Publish a result while still running.
    pub async fn emit(&self, item: impl Into<PipelineItem>) -> Result<()> {
        match &self.results {
            Some(results) => results.send(item).await,
            None => Err(Error::ChannelClosed("plugin results not bound")),
        }
    }

    /// Whitespace-separated parameter arguments.
    pub fn args(&self) -> Vec<&str> {
        self.parameter.split_whitespace().collect()
    }

    /// Value of a `key=value` argument in the parameter string.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.parameter.split_whitespace().find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    /// Log a message tagged with this plugin's identity.
    pub fn log(&self, level: Level, message: &str) {
        macro_rules! plugin_event {
            ($lvl:expr) => {
                tracing::event!(
                    $lvl,
                    plugin = %self.plugin_name,
                    plugin_id = %self.plugin_id,
                    module = %self.module,
                    task_id = %self.task_id,
                    "{}",
                    message
                )
            };
        }

        match level {
            Level::ERROR => plugin_event!(Level::ERROR),
            Level::WARN => plugin_event!(Level::WARN),
            Level::INFO => plugin_event!(Level::INFO),
            Level::DEBUG => plugin_event!(Level::DEBUG),
            Level::TRACE => plugin_event!(Level::TRACE),
        }
    }
}

/// Output of one plugin invocation.
///
/// Items returned here are published after `execute` returns, in addition
/// to anything the plugin emitted through [`PluginContext::emit`].
#[derive(Debug, Clone, Default)]
pub struct PluginOutput {
    pub items: Vec<PipelineItem>,
}

impl PluginOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<PipelineItem>) -> Self {
        Self { items }
    }
}

/// A scan technique within a module.
///
/// One canonical instance is registered per (module, name). Invocations only
/// see `&self`, so the same plugin runs concurrently for many items; all
/// per-invocation state lives in the [`PluginContext`].
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn module(&self) -> ModuleKind;

    /// Stable identifier, used for parameter lookup. Defaults to the name.
    fn plugin_id(&self) -> &str {
        self.name()
    }

    /// Idempotent setup, e.g. verifying an external binary exists.
    async fn install(&self) -> bool {
        true
    }

    /// Lightweight health probe.
    async fn check(&self) -> bool {
        true
    }

    /// Extension state handed to each invocation.
    fn extension(&self) -> PluginExtension {
        PluginExtension::None
    }

    /// Run the plugin against one item.
    ///
    /// Long-running plugins are expected to apply their own timeouts.
    async fn execute(&self, ctx: &PluginContext, input: PipelineItem) -> Result<PluginOutput>;
}
