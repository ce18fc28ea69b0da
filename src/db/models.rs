// Row types and the closed set of finding payload shapes.
//
// The payload discriminant lives in the findings `type` column
// (`FindingKind`); each kind has one record struct below, matching the wire
// shapes downstream consumers accept. A stored `data` cell holds either a
// single record or a list of records of the row's kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StoreError;

/// Lifecycle state of a scan. Transitions are monotonic:
/// `Pending -> Running -> {Completed | Failed | Stopped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Stopped => "stopped",
        }
    }

    /// Terminal states carry an end_time; the others don't.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Stopped
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            "stopped" => Some(ScanStatus::Stopped),
            _ => None,
        }
    }
}

/// One scan row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: String,
    pub target: String,
    pub status: ScanStatus,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// The closed set of finding categories downstream consumers recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Subdomain,
    Port,
    Http,
    Enrichment,
    CloudBucket,
    Github,
    Screenshot,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Subdomain => "subdomain",
            FindingKind::Port => "port",
            FindingKind::Http => "http",
            FindingKind::Enrichment => "enrichment",
            FindingKind::CloudBucket => "cloud_bucket",
            FindingKind::Github => "github",
            FindingKind::Screenshot => "screenshot",
        }
    }

    /// Parse a stored kind. The legacy `portscan` alias is rejected so it
    /// can never be written again; readers only ever see `port`.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "subdomain" => Ok(FindingKind::Subdomain),
            "port" => Ok(FindingKind::Port),
            "http" => Ok(FindingKind::Http),
            "enrichment" => Ok(FindingKind::Enrichment),
            "cloud_bucket" => Ok(FindingKind::CloudBucket),
            "github" => Ok(FindingKind::Github),
            "screenshot" => Ok(FindingKind::Screenshot),
            other => Err(StoreError::InvalidKind(other.to_string())),
        }
    }
}

/// One finding row, payload deserialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub scan_id: Option<String>,
    pub target: String,
    pub module: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: FindingKind,
    pub data: Value,
    pub timestamp: String,
}

impl Finding {
    /// Iterate the payload entries: a list yields its elements, a single
    /// object yields itself.
    pub fn entries(&self) -> impl Iterator<Item = &Value> {
        payload_entries(&self.data)
    }
}

pub fn payload_entries(data: &Value) -> impl Iterator<Item = &Value> {
    match data {
        Value::Array(items) => items.iter(),
        other => std::slice::from_ref(other).iter(),
    }
}

/// Serialize a payload to canonical JSON: serde_json's map is BTreeMap-backed
/// (no preserve_order), so keys come out sorted and byte-equality of the
/// stored text implements semantic equality.
pub fn canonical_json<T: Serialize + ?Sized>(payload: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    serde_json::to_string(&value)
}

// --- Payload records (wire shapes, field names stable) ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdomainRecord {
    pub subdomain: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub ip: String,
    pub port: u16,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRecord {
    pub url: String,
    pub status: u16,
    pub server: String,
    pub title: String,
    #[serde(rename = "x-powered-by")]
    pub x_powered_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBanner {
    pub port: u16,
    pub banner: String,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub ip: String,
    pub org: String,
    pub os: String,
    pub ports: Vec<u16>,
    pub vulns: Vec<String>,
    pub hostnames: Vec<String>,
    pub data: Vec<ServiceBanner>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudBucketRecord {
    pub bucket: String,
    pub provider: String,
    pub url: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubRecord {
    pub query: String,
    pub url: String,
    pub repository: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    pub url: String,
    pub screenshot_path: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
