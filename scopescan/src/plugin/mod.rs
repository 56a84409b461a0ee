//! Plugin contract, registry and builtin plugins.

pub mod builtin;
mod fn_plugin;
mod instance;
mod registry;
mod traits;

pub use fn_plugin::FnPlugin;
pub use instance::PluginInstance;
pub use registry::{PluginHealth, PluginHealthReport, PluginRegistry, PluginRegistryBuilder};
pub use traits::{Plugin, PluginContext, PluginExtension, PluginOutput, ResultSender};
