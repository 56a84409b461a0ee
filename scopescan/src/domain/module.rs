//! Scan module catalogue.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::task::TaskOptions;

/// One stage of the scan chain.
///
/// Declaration order is the canonical chain order: a task's chain always
/// runs its configured modules in this order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum ModuleKind {
    /// Normalizes raw targets before anything else sees them.
    TargetHandler,
    /// Subdomain enumeration.
    SubdomainScan,
    /// Subdomain takeover checks.
    SubdomainSecurity,
    /// Open port discovery.
    PortScan,
    /// Service and fingerprint mapping of open ports.
    AssetMapping,
    /// URL discovery.
    #[serde(rename = "URLScan")]
    #[strum(serialize = "URLScan")]
    UrlScan,
    /// Crawling discovered web assets.
    WebCrawler,
    /// Directory brute force.
    DirScan,
    /// Vulnerability scanning.
    VulnerabilityScan,
}

impl ModuleKind {
    /// All modules in canonical chain order.
    pub fn chain_order() -> impl Iterator<Item = ModuleKind> {
        ModuleKind::iter()
    }

    /// Whether results of this module must also be novel across all history
    /// before they are accepted, given the task's options.
    pub fn checks_history(self, options: &TaskOptions) -> bool {
        match self {
            ModuleKind::SubdomainScan => options.ignore_old_subdomains,
            _ => false,
        }
    }
}
