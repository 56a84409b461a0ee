//! Plugins shipped with the engine.

mod dns_resolve;
mod target_parser;

pub use dns_resolve::DnsResolve;
pub use target_parser::TargetParser;

use super::PluginRegistryBuilder;

/// Register every builtin plugin.
pub fn register_builtins(builder: PluginRegistryBuilder) -> PluginRegistryBuilder {
    builder.register(TargetParser).register(DnsResolve::default())
}
