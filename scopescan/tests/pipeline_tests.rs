//! End-to-end pipeline tests.
//!
//! These run whole tasks through the engine against in-memory collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use scopescan::Error;
use scopescan::config::{EngineConfig, WaitGranularity};
use scopescan::domain::{AssetResult, ModuleKind, PipelineItem, SubdomainResult, Task, TaskOptions};
use scopescan::metrics::MetricsCollector;
use scopescan::pipeline::{
    ChannelProgressTracker, DeduplicationCache, MemoryResultStore, PipelineEngine, ProgressMark,
    ProgressPhase, RunSummary, WorkerPoolConfig,
};
use scopescan::plugin::builtin::TargetParser;
use scopescan::plugin::{FnPlugin, PluginOutput, PluginRegistry};
use tokio::sync::{Barrier, mpsc};

struct Harness {
    engine: PipelineEngine,
    store: Arc<MemoryResultStore>,
    metrics: Arc<MetricsCollector>,
    progress_rx: mpsc::Receiver<ProgressMark>,
}

impl Harness {
    fn new(registry: PluginRegistry, config: EngineConfig) -> Self {
        let store = Arc::new(MemoryResultStore::new());
        Self::with_store(registry, config, store)
    }

    fn with_store(registry: PluginRegistry, config: EngineConfig, store: Arc<MemoryResultStore>) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let (progress_tx, progress_rx) = mpsc::channel(256);
        let engine = PipelineEngine::builder(Arc::new(registry))
            .config(config)
            .dedup(Arc::new(DeduplicationCache::new(store.clone())))
            .sink(store.clone())
            .progress(Arc::new(ChannelProgressTracker::new(progress_tx)))
            .metrics(metrics.clone())
            .build();
        Self {
            engine,
            store,
            metrics,
            progress_rx,
        }
    }

    /// Run a task, returning the summary and the items leaving the chain.
    async fn run(&self, task: Task) -> (RunSummary, Vec<PipelineItem>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            self.engine.run_pipeline_into(task, tx),
        )
        .await
        .expect("pipeline did not drain")
        .expect("pipeline failed");

        let mut forwarded = Vec::new();
        while let Some(item) = rx.recv().await {
            forwarded.push(item);
        }
        (summary, forwarded)
    }

    fn progress_marks(&mut self) -> Vec<ProgressMark> {
        let mut marks = Vec::new();
        while let Ok(mark) = self.progress_rx.try_recv() {
            marks.push(mark);
        }
        marks
    }
}

fn subdomain(host: &str) -> SubdomainResult {
    SubdomainResult::new(host, "A").with_ips(["1.2.3.4"])
}

/// Emits `sub.<host>` `times` times per input item.
fn repeating_plugin(name: &str, times: usize) -> FnPlugin {
    FnPlugin::new(name, ModuleKind::SubdomainScan, move |ctx, input| async move {
        let host = format!("sub.{}", input.host());
        for _ in 0..times {
            ctx.emit(subdomain(&host)).await?;
        }
        Ok(PluginOutput::empty())
    })
}

fn subdomain_task(id: &str, targets: &[&str], plugins: &[&str]) -> Task {
    Task::new(id, targets.iter().map(|t| t.to_string()).collect())
        .with_plugins(ModuleKind::SubdomainScan, plugins.iter().copied())
}

mod scenario_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_result_is_persisted_and_forwarded() {
        let registry = PluginRegistry::builder()
            .register(repeating_plugin("finder", 1))
            .build();
        let mut harness = Harness::new(registry, EngineConfig::default());

        let (summary, forwarded) = harness
            .run(subdomain_task("t1", &["a.com"], &["finder"]))
            .await;

        let records = harness.store.records_for("t1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dedup_key, "subdomain:sub.a.com");
        assert_eq!(records[0].module, ModuleKind::SubdomainScan);
        assert_eq!(forwarded, vec![PipelineItem::from(subdomain("sub.a.com"))]);
        assert_eq!(summary.accepted(), 1);

        let marks = harness.progress_marks();
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].phase, ProgressPhase::Start);
        assert_eq!(marks[1].phase, ProgressPhase::End);
        assert_eq!(marks[1].module, ModuleKind::SubdomainScan);
        assert_eq!(marks[1].target, "a.com");
        assert_eq!(marks[1].unit_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_emission_is_accepted_once() {
        let registry = PluginRegistry::builder()
            .register(repeating_plugin("finder", 2))
            .build();
        let harness = Harness::new(registry, EngineConfig::default());

        let (summary, forwarded) = harness
            .run(subdomain_task("t1", &["a.com"], &["finder"]))
            .await;

        assert_eq!(harness.store.records_for("t1").len(), 1);
        assert_eq!(forwarded.len(), 1);
        let link = summary.link(ModuleKind::SubdomainScan).unwrap();
        assert_eq!(link.results_produced, 2);
        assert_eq!(link.duplicates_in_task, 1);
    }

    #[tokio::test]
    async fn test_known_subdomain_is_dropped_when_ignoring_old() {
        let store = Arc::new(MemoryResultStore::new());
        let registry = || {
            PluginRegistry::builder()
                .register(repeating_plugin("finder", 1))
                .build()
        };

        // An earlier task already recorded sub.a.com.
        let earlier = Harness::with_store(registry(), EngineConfig::default(), store.clone());
        earlier
            .run(subdomain_task("old", &["a.com"], &["finder"]))
            .await;
        assert_eq!(store.records_for("old").len(), 1);

        let harness = Harness::with_store(registry(), EngineConfig::default(), store.clone());
        let task = subdomain_task("new", &["a.com"], &["finder"]).with_options(TaskOptions {
            ignore_old_subdomains: true,
        });
        let (summary, forwarded) = harness.run(task).await;

        assert!(store.records_for("new").is_empty());
        assert!(forwarded.is_empty());
        assert_eq!(
            summary.link(ModuleKind::SubdomainScan).unwrap().known_in_history,
            1
        );

        // Without the option the history tier is not consulted.
        let (_, forwarded) = harness
            .run(subdomain_task("newer", &["a.com"], &["finder"]))
            .await;
        assert_eq!(store.records_for("newer").len(), 1);
        assert_eq!(forwarded.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_plugin_does_not_abort_task() {
        let registry = PluginRegistry::builder()
            .register(repeating_plugin("finder", 1))
            .build();
        let harness = Harness::new(registry, EngineConfig::default());

        let (summary, forwarded) = harness
            .run(subdomain_task("t1", &["a.com"], &["ghost", "finder"]))
            .await;

        let link = summary.link(ModuleKind::SubdomainScan).unwrap();
        assert_eq!(link.plugins_missing, 1);
        assert_eq!(link.invocations_submitted, 1);
        assert_eq!(forwarded.len(), 1);
    }

    #[tokio::test]
    async fn test_saturated_pool_rejects_and_still_drains() {
        let slow = |name: &str| {
            FnPlugin::new(name, ModuleKind::SubdomainScan, |ctx, input| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                ctx.emit(subdomain(&format!("{}.{}", ctx.plugin_name, input.host())))
                    .await?;
                Ok(PluginOutput::empty())
            })
        };
        let registry = PluginRegistry::builder()
            .register(slow("one"))
            .register(slow("two"))
            .build();

        let mut config = EngineConfig::default();
        config.module_pools.insert(
            ModuleKind::SubdomainScan,
            WorkerPoolConfig {
                max_workers: 1,
                queue_capacity: 0,
            },
        );
        let harness = Harness::new(registry, config);

        let (summary, forwarded) = harness
            .run(subdomain_task("t1", &["a.com"], &["one", "two"]))
            .await;

        let link = summary.link(ModuleKind::SubdomainScan).unwrap();
        assert_eq!(link.invocations_submitted, 1);
        assert_eq!(link.invocations_rejected, 1);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(harness.metrics.submissions_rejected("SubdomainScan"), 1);
    }

    #[tokio::test]
    async fn test_queued_invocation_runs_after_slot_frees() {
        let registry = PluginRegistry::builder()
            .register(repeating_plugin("one", 1))
            .register(
                FnPlugin::new("two", ModuleKind::SubdomainScan, |ctx, input| async move {
                    ctx.emit(subdomain(&format!("two.{}", input.host()))).await?;
                    Ok(PluginOutput::empty())
                }),
            )
            .build();

        let mut config = EngineConfig::default();
        config.module_pools.insert(
            ModuleKind::SubdomainScan,
            WorkerPoolConfig {
                max_workers: 1,
                queue_capacity: 1,
            },
        );
        let harness = Harness::new(registry, config);

        let (summary, forwarded) = harness
            .run(subdomain_task("t1", &["a.com"], &["one", "two"]))
            .await;

        let link = summary.link(ModuleKind::SubdomainScan).unwrap();
        assert_eq!(link.invocations_submitted, 2);
        assert_eq!(link.invocations_rejected, 0);
        assert_eq!(forwarded.len(), 2);
    }

    #[tokio::test]
    async fn test_link_granularity_overflow_is_accounted() {
        let registry = PluginRegistry::builder()
            .register(FnPlugin::new(
                "slow",
                ModuleKind::SubdomainScan,
                |ctx, input| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    ctx.emit(subdomain(&format!("sub.{}", input.host()))).await?;
                    Ok(PluginOutput::empty())
                },
            ))
            .build();

        let mut config = EngineConfig::default();
        config.wait_granularity = WaitGranularity::Link;
        config.module_pools.insert(
            ModuleKind::SubdomainScan,
            WorkerPoolConfig {
                max_workers: 1,
                queue_capacity: 1,
            },
        );
        let harness = Harness::new(registry, config);

        let targets = ["a.com", "b.com", "c.com", "d.com", "e.com"];
        let (summary, forwarded) = harness.run(subdomain_task("t1", &targets, &["slow"])).await;

        let link = summary.link(ModuleKind::SubdomainScan).unwrap();
        assert_eq!(link.invocations_submitted, 2);
        assert_eq!(link.invocations_rejected, 3);
        assert_eq!(forwarded.len(), 2);
        assert_eq!(harness.metrics.submissions_rejected("SubdomainScan"), 3);
    }
}

mod property_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicates_are_accepted_once() {
        let mut builder = PluginRegistry::builder();
        let names: Vec<String> = (0..8).map(|i| format!("racer{i}")).collect();
        for name in &names {
            builder = builder.register(repeating_plugin(name, 25));
        }
        let harness = Harness::new(builder.build(), EngineConfig::default());

        let task = Task::new("t1", vec!["a.com".into()])
            .with_plugins(ModuleKind::SubdomainScan, names.iter().cloned());
        let (summary, forwarded) = harness.run(task).await;

        assert_eq!(harness.store.records_for("t1").len(), 1);
        assert_eq!(forwarded.len(), 1);
        let link = summary.link(ModuleKind::SubdomainScan).unwrap();
        assert_eq!(link.results_produced, 200);
        assert_eq!(link.duplicates_in_task, 199);
    }

    #[tokio::test]
    async fn test_distinct_results_are_all_forwarded() {
        let registry = PluginRegistry::builder()
            .register(FnPlugin::new(
                "bulk",
                ModuleKind::SubdomainScan,
                |ctx, input| async move {
                    for i in 0..300 {
                        ctx.emit(subdomain(&format!("h{i}.{}", input.host()))).await?;
                    }
                    Ok(PluginOutput::empty())
                },
            ))
            .build();
        let mut config = EngineConfig::default();
        config.result_queue_capacity = 4;
        config.link_queue_capacity = 4;
        let harness = Harness::new(registry, config);

        let (summary, forwarded) = harness
            .run(subdomain_task("t1", &["a.com", "b.com"], &["bulk"]))
            .await;

        assert_eq!(harness.store.records_for("t1").len(), 600);
        assert_eq!(forwarded.len(), 600);
        assert_eq!(summary.delivered, 600);
        assert_eq!(summary.released_keys, 600);
        assert_eq!(harness.engine.dedup().task_count(), 0);
    }

    #[tokio::test]
    async fn test_no_input_means_no_progress_marks() {
        let registry = PluginRegistry::builder()
            .register(repeating_plugin("finder", 1))
            .build();
        let mut harness = Harness::new(registry, EngineConfig::default());

        let (summary, forwarded) = harness.run(subdomain_task("t1", &[], &["finder"])).await;

        assert!(forwarded.is_empty());
        assert_eq!(summary.link(ModuleKind::SubdomainScan).unwrap().items_received, 0);
        assert!(harness.progress_marks().is_empty());
    }

    #[tokio::test]
    async fn test_slow_results_are_drained_before_close() {
        let registry = PluginRegistry::builder()
            .register(FnPlugin::new(
                "slow",
                ModuleKind::SubdomainScan,
                |ctx, input| async move {
                    for i in 0..5u64 {
                        tokio::time::sleep(Duration::from_millis(10 * i)).await;
                        ctx.emit(subdomain(&format!("s{i}.{}", input.host()))).await?;
                    }
                    Ok(PluginOutput::empty())
                },
            ))
            .build();
        let mut config = EngineConfig::default();
        config.wait_granularity = WaitGranularity::Link;
        let harness = Harness::new(registry, config);

        let (summary, forwarded) = harness
            .run(subdomain_task("t1", &["a.com", "b.com", "c.com"], &["slow"]))
            .await;

        assert_eq!(forwarded.len(), 15);
        assert_eq!(summary.accepted(), 15);
    }

    #[tokio::test]
    async fn test_item_granularity_runs_plugins_concurrently() {
        // Both invocations must be in flight at once to pass the barrier.
        let barrier = Arc::new(Barrier::new(2));
        let meet = |name: &str| {
            let barrier = barrier.clone();
            FnPlugin::new(name, ModuleKind::SubdomainScan, move |ctx, input| {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    ctx.emit(subdomain(&format!("{}.{}", ctx.plugin_name, input.host())))
                        .await?;
                    Ok(PluginOutput::empty())
                }
            })
        };
        let registry = PluginRegistry::builder()
            .register(meet("left"))
            .register(meet("right"))
            .build();
        let harness = Harness::new(registry, EngineConfig::default());

        let (_, forwarded) = harness
            .run(subdomain_task("t1", &["a.com"], &["left", "right"]))
            .await;
        assert_eq!(forwarded.len(), 2);
    }
}

mod chain_tests {
    use super::*;

    fn port_plugin() -> FnPlugin {
        FnPlugin::new("ports", ModuleKind::PortScan, |_, input| async move {
            let asset = |port| {
                PipelineItem::from(AssetResult {
                    host: input.host().to_string(),
                    ip: None,
                    port,
                    service: None,
                })
            };
            Ok(PluginOutput::with_items(vec![asset(80), asset(443)]))
        })
    }

    #[tokio::test]
    async fn test_multi_module_chain() {
        let registry = PluginRegistry::builder()
            .register(TargetParser)
            .register(FnPlugin::new(
                "finder",
                ModuleKind::SubdomainScan,
                |ctx, input| async move {
                    let host = input.host().to_string();
                    ctx.emit(subdomain(&format!("www.{host}"))).await?;
                    ctx.emit(subdomain(&format!("api.{host}"))).await?;
                    Ok(PluginOutput::empty())
                },
            ))
            .register(port_plugin())
            .build();
        let mut harness = Harness::new(registry, EngineConfig::default());

        let task = Task::new(
            "t1",
            vec!["https://A.com/login".into(), "a.com".into(), "b.com:8080".into()],
        )
        .with_plugins(ModuleKind::PortScan, ["ports"])
        .with_plugins(ModuleKind::TargetHandler, [TargetParser::NAME])
        .with_plugins(ModuleKind::SubdomainScan, ["finder"]);

        let (summary, forwarded) = harness.run(task).await;

        let modules: Vec<_> = summary.links.iter().map(|l| l.module).collect();
        assert_eq!(
            modules,
            vec![
                ModuleKind::TargetHandler,
                ModuleKind::SubdomainScan,
                ModuleKind::PortScan
            ]
        );

        // Two distinct hosts survive target parsing.
        assert_eq!(summary.links[0].accepted, 2);
        assert_eq!(summary.links[0].duplicates_in_task, 1);
        assert_eq!(summary.links[1].accepted, 4);
        assert_eq!(summary.links[2].items_received, 4);
        assert_eq!(summary.links[2].accepted, 8);
        assert_eq!(forwarded.len(), 8);
        assert!(forwarded.iter().all(|item| matches!(item, PipelineItem::Asset(_))));
        assert_eq!(harness.store.records_for("t1").len(), 2 + 4 + 8);

        // One start/end pair per module.
        let marks = harness.progress_marks();
        assert_eq!(marks.len(), 6);
        for module in modules {
            let phases: Vec<_> = marks
                .iter()
                .filter(|m| m.module == module)
                .map(|m| m.phase)
                .collect();
            assert_eq!(phases, vec![ProgressPhase::Start, ProgressPhase::End]);
        }
    }

    #[tokio::test]
    async fn test_failing_plugin_does_not_fail_task() {
        let registry = PluginRegistry::builder()
            .register(FnPlugin::new("broken", ModuleKind::PortScan, |_, _| async {
                Err(Error::plugin_execution("broken", "binary missing"))
            }))
            .register(port_plugin())
            .build();
        let harness = Harness::new(registry, EngineConfig::default());

        let task = Task::new("t1", vec!["a.com".into()])
            .with_plugins(ModuleKind::PortScan, ["broken", "ports"]);
        let (summary, forwarded) = harness.run(task).await;

        let link = summary.link(ModuleKind::PortScan).unwrap();
        assert_eq!(link.invocations_failed, 1);
        assert_eq!(forwarded.len(), 2);
        assert_eq!(harness.metrics.snapshot().plugin_failures["broken"], 1);
    }

    #[tokio::test]
    async fn test_downstream_module_enriches_same_kind() {
        let registry = PluginRegistry::builder()
            .register(FnPlugin::new("naabu", ModuleKind::PortScan, |_, input| async move {
                Ok(PluginOutput::with_items(vec![PipelineItem::from(AssetResult {
                    host: input.host().to_string(),
                    ip: None,
                    port: 80,
                    service: None,
                })]))
            }))
            .register(FnPlugin::new(
                "httpx",
                ModuleKind::AssetMapping,
                |_, input| async move {
                    let PipelineItem::Asset(mut asset) = input else {
                        return Ok(PluginOutput::empty());
                    };
                    asset.service = Some("http".into());
                    Ok(PluginOutput::with_items(vec![PipelineItem::Asset(asset)]))
                },
            ))
            .build();
        let harness = Harness::new(registry, EngineConfig::default());

        let task = Task::new("t1", vec!["a.com".into()])
            .with_plugins(ModuleKind::PortScan, ["naabu"])
            .with_plugins(ModuleKind::AssetMapping, ["httpx"]);
        let (summary, forwarded) = harness.run(task).await;

        let mapping = summary.link(ModuleKind::AssetMapping).unwrap();
        assert_eq!(mapping.results_produced, 1);
        assert_eq!(mapping.accepted, 1);
        assert_eq!(mapping.duplicates_in_task, 0);
        assert_eq!(summary.delivered, 1);

        let PipelineItem::Asset(asset) = &forwarded[0] else {
            panic!("expected an asset, got {:?}", forwarded[0]);
        };
        assert_eq!(asset.service.as_deref(), Some("http"));

        // Both modules persist their own copy of the key.
        let records = harness.store.records_for("t1");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.dedup_key == "asset:a.com:80"));
    }

    #[tokio::test]
    async fn test_plugin_failing_check_never_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sick_calls = calls.clone();
        let (registry, report) = PluginRegistry::builder()
            .register(
                FnPlugin::new("sick", ModuleKind::PortScan, move |_, _| {
                    let calls = sick_calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(PluginOutput::empty())
                    }
                })
                .with_check(|| async { false }),
            )
            .register(port_plugin())
            .initialize()
            .await;
        assert!(!report.all_healthy());
        let harness = Harness::new(registry, EngineConfig::default());

        let task = Task::new("t1", vec!["a.com".into(), "b.com".into()])
            .with_plugins(ModuleKind::PortScan, ["sick", "ports"]);
        let (summary, forwarded) = harness.run(task).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let link = summary.link(ModuleKind::PortScan).unwrap();
        assert_eq!(link.plugins_missing, 2);
        assert_eq!(link.invocations_submitted, 2);
        assert_eq!(forwarded.len(), 4);
    }
}
