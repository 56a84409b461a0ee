//! Chain links.
//!
//! A task's chain is a series of [`ModuleRunner`]s ending in a
//! [`TerminalLink`]. Each runner starts its downstream link, fans every input
//! item out to the module's plugins through the module's worker pool, and
//! funnels plugin results through a single collector task that deduplicates,
//! persists and forwards them. A link's output queue closes only once its
//! input is exhausted, every invocation it submitted has finished and the
//! collector has drained the result queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::completion::{CompletionGroup, CompletionGuard};
use super::dedup::{DedupOutcome, DeduplicationCache};
use super::events::PipelineEvent;
use super::progress::ProgressTracker;
use super::sink::{ResultRecord, ResultSink};
use super::worker_pool::WorkerPool;
use crate::config::WaitGranularity;
use crate::domain::{ModuleKind, PipelineItem, Task};
use crate::metrics::MetricsCollector;
use crate::plugin::{PluginInstance, PluginRegistry, ResultSender};
use crate::{Error, Result};

/// Name reported by the terminal link.
pub const TERMINAL_LINK: &str = "terminal";

/// Collaborators shared by every link of every task.
pub struct ChainContext {
    pub registry: Arc<PluginRegistry>,
    pub dedup: Arc<DeduplicationCache>,
    pub sink: Arc<dyn ResultSink>,
    pub progress: Arc<dyn ProgressTracker>,
    pub metrics: Arc<MetricsCollector>,
    pub events: broadcast::Sender<PipelineEvent>,
    pub link_queue_capacity: usize,
    pub result_queue_capacity: usize,
    pub wait_granularity: WaitGranularity,
}

impl ChainContext {
    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Counters for one link of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub module: ModuleKind,
    pub items_received: usize,
    pub plugins_missing: usize,
    pub invocations_submitted: usize,
    pub invocations_rejected: usize,
    pub invocations_failed: usize,
    pub results_produced: usize,
    pub accepted: usize,
    pub duplicates_in_task: usize,
    pub known_in_history: usize,
    pub persist_failures: usize,
    pub duration: Duration,
}

impl LinkStats {
    pub fn new(module: ModuleKind) -> Self {
        Self {
            module,
            items_received: 0,
            plugins_missing: 0,
            invocations_submitted: 0,
            invocations_rejected: 0,
            invocations_failed: 0,
            results_produced: 0,
            accepted: 0,
            duplicates_in_task: 0,
            known_in_history: 0,
            persist_failures: 0,
            duration: Duration::ZERO,
        }
    }
}

/// What a link and everything downstream of it did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// One entry per module link, in chain order.
    pub links: Vec<LinkStats>,
    /// Items that reached the end of the chain.
    pub delivered: usize,
}

/// One stage of a task's chain.
#[async_trait]
pub trait ChainLink: Send {
    fn name(&self) -> &str;

    /// Attach the queue this link reads from. Must be called before `run`.
    fn set_input(&mut self, input: mpsc::Receiver<PipelineItem>);

    /// Process input until it closes and the downstream chain has finished.
    async fn run(self: Box<Self>) -> Result<ChainReport>;
}

/// Chain link driving one module.
pub struct ModuleRunner {
    module: ModuleKind,
    task: Arc<Task>,
    ctx: Arc<ChainContext>,
    pool: Arc<WorkerPool>,
    input: Option<mpsc::Receiver<PipelineItem>>,
    next: Box<dyn ChainLink>,
}

impl ModuleRunner {
    pub fn new(
        module: ModuleKind,
        task: Arc<Task>,
        ctx: Arc<ChainContext>,
        pool: Arc<WorkerPool>,
        next: Box<dyn ChainLink>,
    ) -> Self {
        Self {
            module,
            task,
            ctx,
            pool,
            input: None,
            next,
        }
    }

    pub fn module(&self) -> ModuleKind {
        self.module
    }
}

#[async_trait]
impl ChainLink for ModuleRunner {
    fn name(&self) -> &str {
        self.module.as_ref()
    }

    fn set_input(&mut self, input: mpsc::Receiver<PipelineItem>) {
        self.input = Some(input);
    }

    async fn run(self: Box<Self>) -> Result<ChainReport> {
        let ModuleRunner {
            module,
            task,
            ctx,
            pool,
            input,
            mut next,
        } = *self;
        let mut input = input
            .ok_or_else(|| Error::ChainConstruction(format!("{module} link has no input queue")))?;
        let started_at = Instant::now();

        // Wire and start the downstream link before consuming anything.
        let (next_tx, next_rx) = mpsc::channel(ctx.link_queue_capacity);
        next.set_input(next_rx);
        let downstream_name = next.name().to_string();
        let downstream = tokio::spawn(next.run());

        let (result_tx, result_rx) = mpsc::channel(ctx.result_queue_capacity);
        let collector = Collector {
            module,
            task_id: task.id.clone(),
            check_history: module.checks_history(&task.options),
            ctx: Arc::clone(&ctx),
        };
        let collector = tokio::spawn(collector.run(result_rx, next_tx));

        let mut stats = LinkStats::new(module);
        let group = CompletionGroup::new();
        let failures = Arc::new(AtomicUsize::new(0));
        let target = task.target_label();
        let plugins = task.plugins_for(module);

        while let Some(item) = input.recv().await {
            if stats.items_received == 0 {
                ctx.progress
                    .start(module, &target, &task.id, task.unit_count())
                    .await;
                ctx.emit(PipelineEvent::ModuleStarted {
                    task_id: task.id.clone(),
                    module,
                });
            }
            stats.items_received += 1;

            for name in plugins {
                let Some(mut instance) = ctx.registry.get(module, name) else {
                    error!(module = %module, plugin = %name, task_id = %task.id, "Plugin not found, skipping");
                    stats.plugins_missing += 1;
                    continue;
                };

                let parameter = task
                    .parameter_for(module, instance.plugin_id(), instance.name())
                    .unwrap_or_default()
                    .to_string();
                instance.set_task_id(task.id.as_str());
                instance.set_parameter(parameter);
                instance.set_results(ResultSender::new(result_tx.clone()));

                let work = invoke(
                    instance,
                    item.clone(),
                    group.guard(),
                    Arc::clone(&ctx.metrics),
                    Arc::clone(&failures),
                );
                match pool.submit(work) {
                    Ok(()) => {
                        stats.invocations_submitted += 1;
                        ctx.metrics.record_submission(module.as_ref(), true);
                    }
                    Err(e) => {
                        error!(module = %module, plugin = %name, task_id = %task.id, error = %e, "Failed to submit plugin invocation");
                        stats.invocations_rejected += 1;
                        ctx.metrics.record_submission(module.as_ref(), false);
                    }
                }

                if ctx.wait_granularity == WaitGranularity::Invocation {
                    group.wait().await;
                }
            }

            if ctx.wait_granularity == WaitGranularity::Item {
                group.wait().await;
            }
        }

        // Input closed: let in-flight invocations finish, then release our
        // result sender so the collector sees the end of the stream.
        group.wait().await;
        drop(result_tx);

        let collected = settle(collector, "collector").await;
        let downstream = settle(downstream, &downstream_name).await.and_then(|r| r);

        stats.invocations_failed = failures.load(Ordering::Acquire);
        match collected {
            Ok(c) => {
                stats.results_produced = c.produced;
                stats.accepted = c.accepted;
                stats.duplicates_in_task = c.duplicates_in_task;
                stats.known_in_history = c.known_in_history;
                stats.persist_failures = c.persist_failures;
            }
            Err(e) => error!(module = %module, task_id = %task.id, error = %e, "Result collector failed"),
        }
        stats.duration = started_at.elapsed();

        if stats.items_received > 0 {
            ctx.progress
                .end(module, &target, &task.id, task.unit_count())
                .await;
            ctx.emit(PipelineEvent::ModuleFinished {
                task_id: task.id.clone(),
                module,
                accepted: stats.accepted,
            });
        }

        info!(
            module = %module,
            task_id = %task.id,
            items = stats.items_received,
            submitted = stats.invocations_submitted,
            rejected = stats.invocations_rejected,
            failed = stats.invocations_failed,
            accepted = stats.accepted,
            "Module finished"
        );
        if stats.invocations_rejected > 0 {
            warn!(
                module = %module,
                task_id = %task.id,
                rejected = stats.invocations_rejected,
                capacity = pool.capacity(),
                "Worker pool rejected invocations, their work did not run"
            );
        }

        let mut report = downstream?;
        report.links.insert(0, stats);
        Ok(report)
    }
}

/// Await a link-owned task, mapping cancellation and panics to errors.
async fn settle<T>(handle: JoinHandle<T>, what: &str) -> Result<T> {
    match handle.await {
        Ok(value) => Ok(value),
        Err(e) if e.is_cancelled() => Err(Error::Other(format!("{what} task was cancelled"))),
        Err(e) => Err(Error::Other(format!("{what} task panicked: {e}"))),
    }
}

/// One plugin invocation as run inside the worker pool.
async fn invoke(
    instance: PluginInstance,
    item: PipelineItem,
    _done: CompletionGuard,
    metrics: Arc<MetricsCollector>,
    failures: Arc<AtomicUsize>,
) {
    let plugin = instance.name().to_string();
    let module = instance.module();
    let task_id = instance.task_id().to_string();

    match instance.execute(item).await {
        Ok(published) => {
            debug!(module = %module, plugin = %plugin, task_id = %task_id, published, "Plugin invocation finished");
            metrics.record_plugin_execution(&plugin, true);
        }
        Err(e) => {
            warn!(module = %module, plugin = %plugin, task_id = %task_id, error = %e, "Plugin invocation failed");
            failures.fetch_add(1, Ordering::AcqRel);
            metrics.record_plugin_execution(&plugin, false);
        }
    }
}

#[derive(Debug, Default)]
struct CollectorStats {
    produced: usize,
    accepted: usize,
    duplicates_in_task: usize,
    known_in_history: usize,
    persist_failures: usize,
}

/// Single consumer of a link's result queue.
struct Collector {
    module: ModuleKind,
    task_id: String,
    check_history: bool,
    ctx: Arc<ChainContext>,
}

impl Collector {
    async fn run(
        self,
        mut results: mpsc::Receiver<PipelineItem>,
        output: mpsc::Sender<PipelineItem>,
    ) -> CollectorStats {
        let mut stats = CollectorStats::default();
        let mut downstream_open = true;

        while let Some(item) = results.recv().await {
            stats.produced += 1;

            let key = item.dedup_key();
            let outcome = self
                .ctx
                .dedup
                .check(&self.task_id, self.module, &key, self.check_history)
                .await;
            self.ctx.metrics.record_dedup(outcome);
            match outcome {
                DedupOutcome::DuplicateInTask => {
                    stats.duplicates_in_task += 1;
                    continue;
                }
                DedupOutcome::KnownInHistory => {
                    debug!(module = %self.module, task_id = %self.task_id, key = %key, "Result known from earlier tasks, dropping");
                    stats.known_in_history += 1;
                    continue;
                }
                DedupOutcome::Novel => {}
            }

            let record = ResultRecord::new(self.task_id.as_str(), self.module, item);
            if let Err(e) = self.ctx.sink.persist(&record).await {
                warn!(module = %self.module, task_id = %self.task_id, key = %record.dedup_key, error = %e, "Failed to persist result");
                stats.persist_failures += 1;
                self.ctx.metrics.record_persist_failure();
            }
            stats.accepted += 1;
            self.ctx.emit(PipelineEvent::ResultAccepted {
                task_id: self.task_id.clone(),
                module: self.module,
                dedup_key: record.dedup_key,
            });

            // Keep draining even without a consumer so plugins never block.
            if downstream_open && output.send(record.item).await.is_err() {
                error!(module = %self.module, task_id = %self.task_id, "Downstream link is gone, results will not be forwarded");
                downstream_open = false;
            }
        }

        stats
    }
}

/// End of every chain. Drains its input, optionally handing items on.
pub struct TerminalLink {
    input: Option<mpsc::Receiver<PipelineItem>>,
    output: Option<mpsc::Sender<PipelineItem>>,
}

impl TerminalLink {
    pub fn new() -> Self {
        Self {
            input: None,
            output: None,
        }
    }

    /// Terminal link that forwards every item it receives to `output`.
    pub fn forwarding(output: mpsc::Sender<PipelineItem>) -> Self {
        Self {
            input: None,
            output: Some(output),
        }
    }
}

impl Default for TerminalLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainLink for TerminalLink {
    fn name(&self) -> &str {
        TERMINAL_LINK
    }

    fn set_input(&mut self, input: mpsc::Receiver<PipelineItem>) {
        self.input = Some(input);
    }

    async fn run(self: Box<Self>) -> Result<ChainReport> {
        let TerminalLink { input, mut output } = *self;
        let mut input =
            input.ok_or_else(|| Error::ChainConstruction("terminal link has no input queue".into()))?;

        let mut delivered = 0;
        while let Some(item) = input.recv().await {
            delivered += 1;
            if let Some(tx) = &output
                && tx.send(item).await.is_err()
            {
                debug!("Terminal output receiver dropped");
                output = None;
            }
        }

        Ok(ChainReport {
            links: Vec::new(),
            delivered,
        })
    }
}
