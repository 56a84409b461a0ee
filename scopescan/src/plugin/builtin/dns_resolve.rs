use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::Level;

use crate::domain::{DnsRecords, ModuleKind, PipelineItem, SubdomainResult, normalize_host};
use crate::plugin::{Plugin, PluginContext, PluginOutput};
use crate::{Error, Result};

/// Resolves a host with the system resolver.
///
/// Emits one [`SubdomainResult`] per resolvable host. The lookup timeout can
/// be overridden per task with a `timeout=<secs>` parameter.
#[derive(Debug, Clone)]
pub struct DnsResolve {
    timeout: Duration,
}

impl Default for DnsResolve {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl DnsResolve {
    pub const NAME: &'static str = "DnsResolve";

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn timeout_for(&self, ctx: &PluginContext) -> Duration {
        ctx.arg("timeout")
            .and_then(|secs| secs.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.timeout)
    }
}

/// Group resolved addresses into A and AAAA answers, without repeats.
pub(crate) fn records_from_addrs(addrs: impl IntoIterator<Item = IpAddr>) -> DnsRecords {
    let mut records = DnsRecords::default();
    for addr in addrs {
        let (bucket, value) = match addr {
            IpAddr::V4(v4) => (&mut records.a, v4.to_string()),
            IpAddr::V6(v6) => (&mut records.aaaa, v6.to_string()),
        };
        if !bucket.contains(&value) {
            bucket.push(value);
        }
    }
    records
}

#[async_trait]
impl Plugin for DnsResolve {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn module(&self) -> ModuleKind {
        ModuleKind::SubdomainScan
    }

    async fn execute(&self, ctx: &PluginContext, input: PipelineItem) -> Result<PluginOutput> {
        let host = normalize_host(input.host());
        if host.is_empty() {
            return Ok(PluginOutput::empty());
        }

        let lookup = tokio::net::lookup_host((host.as_str(), 0));
        let addrs = match tokio::time::timeout(self.timeout_for(ctx), lookup).await {
            Ok(Ok(addrs)) => addrs.map(|addr| addr.ip()),
            Ok(Err(e)) => {
                ctx.log(Level::DEBUG, &format!("{host} did not resolve: {e}"));
                return Ok(PluginOutput::empty());
            }
            Err(_) => {
                return Err(Error::plugin_execution(
                    Self::NAME,
                    format!("lookup of {host} timed out"),
                ));
            }
        };

        let records = records_from_addrs(addrs);
        Ok(match SubdomainResult::from_records(&host, &records) {
            Some(result) => PluginOutput::with_items(vec![result.into()]),
            None => PluginOutput::empty(),
        })
    }
}
