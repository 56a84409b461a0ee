use async_trait::async_trait;

use crate::Result;
use crate::domain::{ModuleKind, PipelineItem, normalize_host};
use crate::plugin::{Plugin, PluginContext, PluginOutput};

/// Turns raw target strings into bare host names.
///
/// Strips scheme, credentials, path, query, port and a leading wildcard
/// label. Structured items pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetParser;

impl TargetParser {
    pub const NAME: &'static str = "TargetParser";

    pub fn parse(raw: &str) -> Option<String> {
        let mut rest = raw.trim();
        if let Some((_, after)) = rest.split_once("://") {
            rest = after;
        }
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        rest = &rest[..end];
        if let Some((_, after)) = rest.rsplit_once('@') {
            rest = after;
        }

        let host = if let Some(bracketed) = rest.strip_prefix('[') {
            // IPv6 literal, e.g. [::1]:8080
            bracketed.split(']').next().unwrap_or_default()
        } else if rest.matches(':').count() == 1 {
            rest.split(':').next().unwrap_or_default()
        } else {
            rest
        };

        let host = normalize_host(host.trim_start_matches("*."));
        (!host.is_empty()).then_some(host)
    }
}

#[async_trait]
impl Plugin for TargetParser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn module(&self) -> ModuleKind {
        ModuleKind::TargetHandler
    }

    async fn execute(&self, ctx: &PluginContext, input: PipelineItem) -> Result<PluginOutput> {
        let item = match input {
            PipelineItem::Target(raw) => match Self::parse(&raw) {
                Some(host) => PipelineItem::Target(host),
                None => {
                    ctx.log(tracing::Level::DEBUG, &format!("Ignoring unparsable target {raw:?}"));
                    return Ok(PluginOutput::empty());
                }
            },
            other => other,
        };
        Ok(PluginOutput::with_items(vec![item]))
    }
}
