//! scopescan library crate.
//!
//! Pipeline execution engine of a reconnaissance scan node: a task runs
//! through a chain of scan modules, each fanning items out to plugins on a
//! bounded worker pool and forwarding only unique results downstream.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod plugin;

pub use error::{Error, Result};
