use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

use crate::geometry::{GeoPoint, Polygon};

pub const DEFAULT_RELOAD_INTERVAL_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
pub const DEFAULT_ENCODING: &str = "UTF-8";

/// One raw entry of a CAP feed, optionally enriched with its CAP `info` blocks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertStub {
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub detail_url: String,
    pub guid: String,
    pub category: String,
    pub requires_proxy: bool,
    /// `None` until the detail document has been resolved.
    pub detail: Option<Vec<AlertDetail>>,
}

impl AlertStub {
    pub fn is_resolved(&self) -> bool {
        self.detail.is_some()
    }

    /// Every polygon across all details and areas of this alert.
    pub fn polygons(&self) -> impl Iterator<Item = &Polygon> {
        self.detail
            .iter()
            .flatten()
            .flat_map(|detail| detail.areas.iter())
            .flat_map(|area| area.polygons.iter())
    }

    pub fn headline_severity(&self) -> Option<&Severity> {
        self.first_detail().map(|detail| &detail.severity)
    }

    pub fn headline_event(&self) -> Option<&str> {
        self.first_detail().map(|detail| detail.event.as_str())
    }

    pub fn headline_onset(&self) -> Option<DateTime<FixedOffset>> {
        self.first_detail().and_then(|detail| detail.onset)
    }

    /// Non-empty area descriptions across all details, in document order.
    pub fn area_descriptions(&self) -> Vec<&str> {
        self.detail
            .iter()
            .flatten()
            .flat_map(|detail| detail.areas.iter())
            .map(|area| area.description.as_str())
            .filter(|description| !description.is_empty())
            .collect()
    }

    /// Best-effort identity used for "is this a new alert" comparisons.
    pub fn identity(&self) -> String {
        if !self.guid.is_empty() {
            format!("guid:{}", self.guid)
        } else if !self.detail_url.is_empty() {
            format!("url:{}", self.detail_url)
        } else {
            format!("item:{}@{}", self.title, self.published_at.to_rfc3339())
        }
    }

    fn first_detail(&self) -> Option<&AlertDetail> {
        self.detail.as_ref().and_then(|details| details.first())
    }
}

/// One CAP `<info>` block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDetail {
    pub severity: Severity,
    pub event: String,
    pub onset: Option<DateTime<FixedOffset>>,
    pub areas: Vec<Area>,
}

/// One CAP `<area>` block. Polygons that failed to parse are not kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Area {
    pub description: String,
    pub polygons: Vec<Polygon>,
}

/// CAP severity. Values outside the CAP vocabulary are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Severity {
    Extreme,
    Severe,
    Moderate,
    Minor,
    Unknown,
    Other(String),
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Extreme => "Extreme",
            Severity::Severe => "Severe",
            Severity::Moderate => "Moderate",
            Severity::Minor => "Minor",
            Severity::Unknown => "Unknown",
            Severity::Other(value) => value,
        }
    }
}

impl From<&str> for Severity {
    fn from(value: &str) -> Self {
        match value.trim() {
            "Extreme" => Severity::Extreme,
            "Severe" => Severity::Severe,
            "Moderate" => Severity::Moderate,
            "Minor" => Severity::Minor,
            "Unknown" | "" => Severity::Unknown,
            other => Severity::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One configured feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRegistration {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub reload_interval_ms: Option<u64>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_use_cors_proxy")]
    pub use_cors_proxy: bool,
    /// Per-feed display overrides, passed through for the presentation layer.
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

fn default_use_cors_proxy() -> bool {
    true
}

impl FeedRegistration {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            reload_interval_ms: None,
            encoding: default_encoding(),
            use_cors_proxy: default_use_cors_proxy(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_reload_interval_ms(mut self, interval_ms: u64) -> Self {
        self.reload_interval_ms = Some(interval_ms);
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    pub fn with_cors_proxy(mut self, use_cors_proxy: bool) -> Self {
        self.use_cors_proxy = use_cors_proxy;
        self
    }
}

/// Global options consumed by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregatorOptions {
    /// Used for registrations that do not carry their own interval.
    pub reload_interval_ms: u64,
    /// Wait before re-attempting detail resolutions that failed in a sweep.
    pub retry_delay_ms: u64,
    pub log_feed_warnings: bool,
    pub cache_feed: bool,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            reload_interval_ms: DEFAULT_RELOAD_INTERVAL_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            log_feed_warnings: false,
            cache_feed: false,
            lat: None,
            lon: None,
        }
    }
}

impl AggregatorOptions {
    pub fn reference_point(&self) -> Option<GeoPoint> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_redirects: usize,
    pub cache_dir: PathBuf,
    pub cache_ttl_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("CAP-Aggregator/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: 30,
            max_redirects: 5,
            cache_dir: PathBuf::from(".cache"),
            cache_ttl_seconds: 86_400,
        }
    }
}

/// Flat classification of pipeline failures, as reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    MalformedUrl,
    FeedTransportFailure,
    FeedParseFailure,
    DetailTransportFailure,
    DetailParseFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedUrl => "MALFORMED_URL",
            ErrorKind::FeedTransportFailure => "FEED_TRANSPORT_FAILURE",
            ErrorKind::FeedParseFailure => "FEED_PARSE_FAILURE",
            ErrorKind::DetailTransportFailure => "DETAIL_TRANSPORT_FAILURE",
            ErrorKind::DetailParseFailure => "DETAIL_PARSE_FAILURE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finer classification of a transport failure, for consumers that show
/// distinct messages for rejected credentials and unreachable hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportCause {
    Unauthorized,
    NoConnection,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },
}

impl TransportError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Status { status: 401 | 403, .. })
    }

    pub fn is_connection(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    pub fn cause(&self) -> TransportCause {
        if self.is_unauthorized() {
            TransportCause::Unauthorized
        } else if self.is_connection() {
            TransportCause::NoConnection
        } else {
            TransportCause::Other
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Malformed feed url {url}: {source}")]
    MalformedUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Could not fetch feed {url}: {source}")]
    FeedTransport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Could not parse feed {url}: {message}")]
    FeedParse { url: String, message: String },

    #[error("Could not fetch alert detail {url}: {source}")]
    DetailTransport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Could not parse alert detail {url}: {message}")]
    DetailParse { url: String, message: String },
}

impl AggregatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AggregatorError::MalformedUrl { .. } => ErrorKind::MalformedUrl,
            AggregatorError::FeedTransport { .. } => ErrorKind::FeedTransportFailure,
            AggregatorError::FeedParse { .. } => ErrorKind::FeedParseFailure,
            AggregatorError::DetailTransport { .. } => ErrorKind::DetailTransportFailure,
            AggregatorError::DetailParse { .. } => ErrorKind::DetailParseFailure,
        }
    }

    /// Transport sub-classification, for feed and detail fetch failures.
    pub fn transport_cause(&self) -> Option<TransportCause> {
        match self {
            AggregatorError::FeedTransport { source, .. }
            | AggregatorError::DetailTransport { source, .. } => Some(source.cause()),
            _ => None,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            AggregatorError::MalformedUrl { url, .. }
            | AggregatorError::FeedTransport { url, .. }
            | AggregatorError::FeedParse { url, .. }
            | AggregatorError::DetailTransport { url, .. }
            | AggregatorError::DetailParse { url, .. } => url,
        }
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
