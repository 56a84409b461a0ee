//! Domain layer for scopescan.
//!
//! Tasks, the module catalogue and the items that flow through a chain.

pub mod item;
pub mod module;
pub mod task;

pub use item::{AssetResult, DnsRecords, PipelineItem, SubdomainResult, normalize_host};
pub use module::ModuleKind;
pub use task::{Task, TaskOptions};
