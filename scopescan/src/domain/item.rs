//! Payloads flowing between chain links.

use serde::{Deserialize, Serialize};

/// Normalize a host name for identity comparison.
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// DNS answers for one host, grouped by record type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsRecords {
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
    pub cname: Vec<String>,
    pub mx: Vec<String>,
    pub ns: Vec<String>,
    pub txt: Vec<String>,
    pub ptr: Vec<String>,
    pub srv: Vec<String>,
    pub caa: Vec<String>,
}

/// A discovered subdomain with its resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdomainResult {
    pub host: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub value: Vec<String>,
    #[serde(default)]
    pub ip: Vec<String>,
}

impl SubdomainResult {
    pub fn new(host: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            record_type: record_type.into(),
            value: Vec::new(),
            ip: Vec::new(),
        }
    }

    pub fn with_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ip.extend(ips.into_iter().map(Into::into));
        self
    }

    /// Build a result from DNS answers.
    ///
    /// The record type is the first non-empty of A, AAAA, CNAME, MX, NS, TXT.
    /// Returns `None` when the answer carries none of those.
    pub fn from_records(host: &str, records: &DnsRecords) -> Option<Self> {
        let record_type = [
            ("A", &records.a),
            ("AAAA", &records.aaaa),
            ("CNAME", &records.cname),
            ("MX", &records.mx),
            ("NS", &records.ns),
            ("TXT", &records.txt),
        ]
        .into_iter()
        .find(|(_, values)| !values.is_empty())
        .map(|(name, _)| name)?;

        let value = [
            &records.cname,
            &records.mx,
            &records.ptr,
            &records.ns,
            &records.txt,
            &records.srv,
            &records.caa,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect();

        let ip = records.a.iter().chain(&records.aaaa).cloned().collect();

        Some(Self {
            host: host.to_string(),
            record_type: record_type.to_string(),
            value,
            ip,
        })
    }
}

/// An open port on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetResult {
    pub host: String,
    #[serde(default)]
    pub ip: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub service: Option<String>,
}

/// Item carried on a link's queue.
///
/// Raw targets enter at the head of the chain; later stages carry
/// structured results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PipelineItem {
    Target(String),
    Subdomain(SubdomainResult),
    Asset(AssetResult),
}

impl PipelineItem {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineItem::Target(_) => "target",
            PipelineItem::Subdomain(_) => "subdomain",
            PipelineItem::Asset(_) => "asset",
        }
    }

    /// Host the item refers to.
    pub fn host(&self) -> &str {
        match self {
            PipelineItem::Target(target) => target,
            PipelineItem::Subdomain(result) => &result.host,
            PipelineItem::Asset(asset) => &asset.host,
        }
    }

    /// Normalized identity used to suppress repeats.
    pub fn dedup_key(&self) -> String {
        match self {
            PipelineItem::Target(target) => format!("target:{}", normalize_host(target)),
            PipelineItem::Subdomain(result) => {
                format!("subdomain:{}", normalize_host(&result.host))
            }
            PipelineItem::Asset(asset) => {
                format!("asset:{}:{}", normalize_host(&asset.host), asset.port)
            }
        }
    }
}

impl From<SubdomainResult> for PipelineItem {
    fn from(result: SubdomainResult) -> Self {
        PipelineItem::Subdomain(result)
    }
}

impl From<AssetResult> for PipelineItem {
    fn from(asset: AssetResult) -> Self {
        PipelineItem::Asset(asset)
    }
}
