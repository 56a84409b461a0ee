//! Bounded worker pools, one per scan module.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::domain::ModuleKind;
use crate::metrics::MetricsCollector;
use crate::{Error, Result};

/// Configuration for a worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Maximum concurrently running units of work.
    pub max_workers: usize,
    /// Admitted units that may wait for a running slot.
    /// Submissions beyond `max_workers + queue_capacity` are rejected.
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            queue_capacity: 100,
        }
    }
}

/// Point-in-time occupancy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLoad {
    pub running: usize,
    pub waiting: usize,
    pub capacity: usize,
}

/// Decrements a counter when dropped, including on panic.
struct CounterGuard(Arc<AtomicUsize>);

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A bounded-concurrency executor for one module.
///
/// `submit` never blocks: a unit of work is either admitted (it will run once
/// a slot frees up) or rejected immediately.
pub struct WorkerPool {
    module: ModuleKind,
    config: WorkerPoolConfig,
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Admitted units, running or waiting for a permit.
    admitted: Arc<AtomicUsize>,
    /// Units currently holding a permit.
    running: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: TaskTracker,
}

impl WorkerPool {
    /// Create a new worker pool with default configuration.
    pub fn new(module: ModuleKind) -> Self {
        Self::with_config(module, WorkerPoolConfig::default())
    }

    /// Create a new worker pool with custom configuration.
    pub fn with_config(module: ModuleKind, config: WorkerPoolConfig) -> Self {
        Self {
            module,
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            config,
            admitted: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Admit a unit of work.
    ///
    /// On error the work is dropped without running; callers must account
    /// for it themselves.
    pub fn submit<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancellation_token.is_cancelled() {
            return Err(Error::PoolClosed(self.module.to_string()));
        }

        let capacity = self.capacity();
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| Error::PoolSaturated {
                module: self.module.to_string(),
                capacity,
            })?;

        let slot = CounterGuard(self.admitted.clone());
        let semaphore = self.semaphore.clone();
        let running = self.running.clone();

        self.tasks.spawn(async move {
            let _slot = slot;
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            running.fetch_add(1, Ordering::AcqRel);
            let _running = CounterGuard(running);
            work.await;
        });

        Ok(())
    }

    /// Stop admitting work and wait for admitted work to finish.
    pub async fn stop(&self) {
        info!(module = %self.module, "Stopping worker pool");
        self.cancellation_token.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!(module = %self.module, "Worker pool stopped");
    }

    /// Maximum number of admitted units (running plus waiting).
    pub fn capacity(&self) -> usize {
        self.config.max_workers + self.config.queue_capacity
    }

    pub fn load(&self) -> PoolLoad {
        let admitted = self.admitted.load(Ordering::Acquire);
        let running = self.running.load(Ordering::Acquire).min(admitted);
        PoolLoad {
            running,
            waiting: admitted - running,
            capacity: self.capacity(),
        }
    }

    pub fn module(&self) -> ModuleKind {
        self.module
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Check if the pool is accepting work.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

/// Owns one [`WorkerPool`] per module.
pub struct PoolManager {
    pools: HashMap<ModuleKind, Arc<WorkerPool>>,
    cancellation_token: CancellationToken,
}

impl PoolManager {
    /// Create a pool for every module using the configured sizes.
    pub fn new(config: &EngineConfig) -> Self {
        let pools = ModuleKind::chain_order()
            .map(|module| {
                let pool_config = config.pool_for(module).clone();
                (module, Arc::new(WorkerPool::with_config(module, pool_config)))
            })
            .collect();

        Self {
            pools,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Pool for a module.
    pub fn pool(&self, module: ModuleKind) -> Result<Arc<WorkerPool>> {
        let pool = self
            .pools
            .get(&module)
            .ok_or_else(|| Error::ChainConstruction(format!("no worker pool for {module}")))?;
        if !pool.is_running() {
            return Err(Error::PoolClosed(module.to_string()));
        }
        Ok(pool.clone())
    }

    pub fn submit<F>(&self, module: ModuleKind, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pool(module)?.submit(work)
    }

    pub fn loads(&self) -> Vec<(ModuleKind, PoolLoad)> {
        let mut loads: Vec<_> = self
            .pools
            .iter()
            .map(|(module, pool)| (*module, pool.load()))
            .collect();
        loads.sort_by_key(|(module, _)| *module);
        loads
    }

    /// Periodically sample pool occupancy into `metrics`.
    ///
    /// Sampling never influences admission.
    pub fn start_monitoring(
        self: &Arc<Self>,
        metrics: Arc<MetricsCollector>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            debug!("Pool monitor started");
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        for (module, load) in manager.loads() {
                            metrics.set_pool_occupancy(module.as_ref(), load.running, load.waiting);
                            if load.running + load.waiting > 0 {
                                debug!(
                                    module = %module,
                                    running = load.running,
                                    waiting = load.waiting,
                                    capacity = load.capacity,
                                    "Pool occupancy"
                                );
                            }
                        }
                    }
                }
            }
            debug!("Pool monitor stopped");
        })
    }

    /// Stop the monitor and drain every pool.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        for pool in self.pools.values() {
            pool.stop().await;
        }
    }
}
