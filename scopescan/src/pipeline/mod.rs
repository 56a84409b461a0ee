//! Pipeline execution engine.
//!
//! - Per-module bounded worker pools with an occupancy monitor
//! - Chain links that fan items out to plugins and forward unique results
//! - Two-tier result deduplication
//! - Progress tracking and result persistence hooks
//! - The engine that builds and drives a task's chain

mod completion;
mod dedup;
mod engine;
mod events;
mod progress;
mod runner;
mod sink;
mod worker_pool;

pub use completion::{CompletionGroup, CompletionGuard};
pub use dedup::{DedupOutcome, DeduplicationCache, HistoryStore, NoHistory};
pub use engine::{PipelineEngine, PipelineEngineBuilder, RunSummary};
pub use events::PipelineEvent;
pub use progress::{
    ChannelProgressTracker, LogProgressTracker, ProgressMark, ProgressPhase, ProgressTracker,
};
pub use runner::{ChainContext, ChainLink, ChainReport, LinkStats, ModuleRunner, TERMINAL_LINK, TerminalLink};
pub use sink::{MemoryResultStore, ResultRecord, ResultSink};
pub use worker_pool::{PoolLoad, PoolManager, WorkerPool, WorkerPoolConfig};
