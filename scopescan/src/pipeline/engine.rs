//! Pipeline engine.
//!
//! Builds a task's chain back to front, feeds the task's targets into the
//! head link and waits for the whole chain to drain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use super::dedup::DeduplicationCache;
use super::events::PipelineEvent;
use super::progress::{LogProgressTracker, ProgressTracker};
use super::runner::{ChainContext, ChainLink, LinkStats, ModuleRunner, TerminalLink};
use super::sink::{MemoryResultStore, ResultSink};
use super::worker_pool::PoolManager;
use crate::config::EngineConfig;
use crate::domain::{ModuleKind, PipelineItem, Task};
use crate::metrics::MetricsCollector;
use crate::plugin::PluginRegistry;
use crate::{Error, Result};

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub task_id: String,
    /// Per-module counters, in chain order.
    pub links: Vec<LinkStats>,
    /// Items that came out of the last module.
    pub delivered: usize,
    /// Dedup keys held for the task when it finished.
    pub released_keys: usize,
    pub duration: Duration,
}

impl RunSummary {
    /// Results accepted across all modules.
    pub fn accepted(&self) -> usize {
        self.links.iter().map(|l| l.accepted).sum()
    }

    pub fn link(&self, module: ModuleKind) -> Option<&LinkStats> {
        self.links.iter().find(|l| l.module == module)
    }
}

/// Builder for [`PipelineEngine`].
pub struct PipelineEngineBuilder {
    config: EngineConfig,
    registry: Arc<PluginRegistry>,
    pools: Option<Arc<PoolManager>>,
    dedup: Option<Arc<DeduplicationCache>>,
    sink: Option<Arc<dyn ResultSink>>,
    progress: Option<Arc<dyn ProgressTracker>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl PipelineEngineBuilder {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            config: EngineConfig::default(),
            registry,
            pools: None,
            dedup: None,
            sink: None,
            progress: None,
            metrics: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pools(mut self, pools: Arc<PoolManager>) -> Self {
        self.pools = Some(pools);
        self
    }

    pub fn dedup(mut self, dedup: Arc<DeduplicationCache>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Anything not provided falls back to an in-memory or logging default.
    pub fn build(self) -> PipelineEngine {
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));
        let pools = self
            .pools
            .unwrap_or_else(|| Arc::new(PoolManager::new(&self.config)));

        let ctx = ChainContext {
            registry: self.registry,
            dedup: self
                .dedup
                .unwrap_or_else(|| Arc::new(DeduplicationCache::in_memory())),
            sink: self
                .sink
                .unwrap_or_else(|| Arc::new(MemoryResultStore::new())),
            progress: self
                .progress
                .unwrap_or_else(|| Arc::new(LogProgressTracker)),
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(MetricsCollector::new())),
            events,
            link_queue_capacity: self.config.link_queue_capacity,
            result_queue_capacity: self.config.result_queue_capacity,
            wait_granularity: self.config.wait_granularity,
        };

        PipelineEngine {
            ctx: Arc::new(ctx),
            pools,
        }
    }
}

/// Runs tasks through their module chains.
///
/// One engine serves any number of tasks, sequentially or concurrently. Worker
/// pools, the plugin registry and the dedup cache are shared between them.
pub struct PipelineEngine {
    ctx: Arc<ChainContext>,
    pools: Arc<PoolManager>,
}

impl PipelineEngine {
    pub fn builder(registry: Arc<PluginRegistry>) -> PipelineEngineBuilder {
        PipelineEngineBuilder::new(registry)
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.ctx.events.subscribe()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.ctx.metrics
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    pub fn dedup(&self) -> &Arc<DeduplicationCache> {
        &self.ctx.dedup
    }

    /// Run a task and wait until its whole chain has drained.
    ///
    /// Only a chain that cannot be constructed fails the run. Missing plugins,
    /// rejected submissions and plugin errors are logged and counted.
    pub async fn run_pipeline(&self, task: Task) -> Result<RunSummary> {
        self.run(task, None).await
    }

    /// Like [`run_pipeline`](Self::run_pipeline), also handing every item
    /// leaving the last module to `output`.
    pub async fn run_pipeline_into(
        &self,
        task: Task,
        output: mpsc::Sender<PipelineItem>,
    ) -> Result<RunSummary> {
        self.run(task, Some(output)).await
    }

    async fn run(&self, task: Task, output: Option<mpsc::Sender<PipelineItem>>) -> Result<RunSummary> {
        task.validate()?;
        let task = Arc::new(task);
        let modules = task.configured_modules();
        let started_at = Instant::now();

        let mut head = match self.build_chain(&task, &modules, output) {
            Ok(head) => head,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to construct module chain");
                self.ctx.metrics.record_task_finished(false);
                return Err(e);
            }
        };

        info!(
            task_id = %task.id,
            modules = ?modules,
            targets = task.unit_count(),
            "Starting pipeline"
        );
        let _ = self.ctx.events.send(PipelineEvent::TaskStarted {
            task_id: task.id.clone(),
            modules: modules.clone(),
        });

        let (input_tx, input_rx) = mpsc::channel(self.ctx.link_queue_capacity);
        head.set_input(input_rx);

        let targets = task.targets.clone();
        let feeder = tokio::spawn(async move {
            for target in targets {
                if input_tx.send(PipelineItem::Target(target)).await.is_err() {
                    break;
                }
            }
            // Dropping the sender closes the head link's input.
        });

        let result = head.run().await;
        if let Err(e) = feeder.await {
            warn!(task_id = %task.id, error = %e, "Target feeder failed");
        }
        let released_keys = self.ctx.dedup.release_task(&task.id);

        match result {
            Ok(report) => {
                let summary = RunSummary {
                    task_id: task.id.clone(),
                    links: report.links,
                    delivered: report.delivered,
                    released_keys,
                    duration: started_at.elapsed(),
                };
                self.ctx.metrics.record_task_finished(true);
                let _ = self.ctx.events.send(PipelineEvent::TaskCompleted {
                    task_id: task.id.clone(),
                    accepted: summary.accepted(),
                    duration_secs: summary.duration.as_secs_f64(),
                });
                info!(
                    task_id = %task.id,
                    accepted = summary.accepted(),
                    delivered = summary.delivered,
                    duration_ms = summary.duration.as_millis() as u64,
                    "Pipeline finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Pipeline failed");
                self.ctx.metrics.record_task_finished(false);
                Err(e)
            }
        }
    }

    /// Chain for `modules`, built from the terminal link backwards.
    fn build_chain(
        &self,
        task: &Arc<Task>,
        modules: &[ModuleKind],
        output: Option<mpsc::Sender<PipelineItem>>,
    ) -> Result<Box<dyn ChainLink>> {
        let mut link: Box<dyn ChainLink> = match output {
            Some(tx) => Box::new(TerminalLink::forwarding(tx)),
            None => Box::new(TerminalLink::new()),
        };

        for module in modules.iter().rev().copied() {
            let pool = self
                .pools
                .pool(module)
                .map_err(|e| Error::ChainConstruction(format!("{module}: {e}")))?;
            link = Box::new(ModuleRunner::new(
                module,
                Arc::clone(task),
                Arc::clone(&self.ctx),
                pool,
                link,
            ));
        }

        Ok(link)
    }

    /// Stop pool monitoring and drain every worker pool.
    pub async fn shutdown(&self) {
        self.pools.shutdown().await;
    }
}
