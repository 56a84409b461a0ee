use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use scopescan::config::EngineConfig;
use scopescan::database::{self, SqlxProgressRepository, SqlxResultRepository};
use scopescan::domain::Task;
use scopescan::logging::{self, LoggingOptions};
use scopescan::metrics::MetricsCollector;
use scopescan::pipeline::{DeduplicationCache, PipelineEngine, PoolManager};
use scopescan::plugin::PluginRegistry;
use scopescan::plugin::builtin::register_builtins;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn load_task(path: &Path) -> anyhow::Result<Task> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse task file {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let task_files: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if task_files.is_empty() {
        anyhow::bail!("usage: scopescan <task.json>...");
    }

    let config = EngineConfig::from_env()?;

    // Initialize logging
    let (logging, _log_guard) = logging::init_logging(&LoggingOptions {
        log_dir: config.log_dir.clone(),
        filter: config.log_filter.clone(),
        console: true,
    })?;
    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;
    let results = Arc::new(SqlxResultRepository::new(pool.clone()));
    let progress = Arc::new(SqlxProgressRepository::new(pool.clone()));

    // Plugins are installed and checked once, before any task runs
    let (registry, health) = register_builtins(PluginRegistry::builder())
        .initialize()
        .await;
    for entry in health.unhealthy() {
        warn!(
            module = %entry.module,
            plugin = %entry.name,
            installed = entry.installed,
            "Plugin unusable for this run"
        );
    }

    let metrics = Arc::new(MetricsCollector::new());
    let pools = Arc::new(PoolManager::new(&config));
    let monitor = pools.start_monitoring(Arc::clone(&metrics), config.monitor_interval());

    let engine = PipelineEngine::builder(Arc::new(registry))
        .config(config.clone())
        .pools(Arc::clone(&pools))
        .dedup(Arc::new(DeduplicationCache::new(results.clone())))
        .sink(results)
        .progress(progress)
        .metrics(Arc::clone(&metrics))
        .build();

    info!(tasks = task_files.len(), "scopescan initialized successfully");

    let mut failed = 0usize;
    for path in &task_files {
        let outcome = match load_task(path) {
            Ok(task) => engine.run_pipeline(task).await.map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(summary) => info!(
                task_id = %summary.task_id,
                summary = %serde_json::to_string(&summary)?,
                "Task completed"
            ),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Task failed");
                failed += 1;
            }
        }
    }

    engine.shutdown().await;
    if let Err(e) = monitor.await {
        warn!(error = %e, "Pool monitor ended abnormally");
    }
    shutdown.cancel();
    pool.close().await;

    info!(metrics = %serde_json::to_string(&metrics.snapshot())?, "scopescan finished");

    if failed > 0 {
        anyhow::bail!("{failed} of {} task(s) failed", task_files.len());
    }
    Ok(())
}
