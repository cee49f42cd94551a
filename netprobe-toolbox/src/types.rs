//! Public types returned by probe operations.
//!
//! Every result keeps the same contract: when `error` is `Some`, the
//! measurement fields are absent and must not be read. When `error` is `None`
//! the probe completed, even if it found nothing (zero DNS records is success).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProbeFailure;

/// The four diagnostics a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Reachability and round-trip latency of a host.
    Ping,
    /// A, AAAA, MX, NS and TXT records of a domain.
    Dns,
    /// One GET request against a URL, following redirects.
    Http,
    /// TLS handshake and leaf certificate of a host on port 443.
    Tls,
}

impl ProbeKind {
    /// Whether the raw target is a URL (`true`) or a bare host (`false`).
    pub const fn takes_url(self) -> bool {
        matches!(self, Self::Http)
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => write!(f, "ping"),
            Self::Dns => write!(f, "dns"),
            Self::Http => write!(f, "http"),
            Self::Tls => write!(f, "tls"),
        }
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ping" => Ok(Self::Ping),
            "dns" => Ok(Self::Dns),
            "http" | "http-analysis" => Ok(Self::Http),
            "tls" | "tls-info" => Ok(Self::Tls),
            _ => Err(format!("Unsupported probe kind: {s}")),
        }
    }
}

/// Reachability / latency check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityResult {
    /// Host exactly as requested.
    pub host: String,
    /// Address the check was run against.
    pub ip: Option<String>,
    /// Whether the host answered.
    pub reachable: bool,
    /// Round-trip time in milliseconds, present only when reachable.
    pub latency_ms: Option<f64>,
    /// When the check ran (UTC).
    pub timestamp: DateTime<Utc>,
    /// Failure description; exclusive with `latency_ms`.
    pub error: Option<ProbeFailure>,
}

impl ConnectivityResult {
    pub(crate) fn unreachable(host: &str, ip: Option<String>, error: ProbeFailure) -> Self {
        Self {
            host: host.to_string(),
            ip,
            reachable: false,
            latency_ms: None,
            timestamp: Utc::now(),
            error: Some(error),
        }
    }
}

/// DNS record lookup result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsResult {
    /// Queried domain.
    pub domain: String,
    /// IPv4 addresses.
    pub a_records: Vec<String>,
    /// IPv6 addresses.
    pub aaaa_records: Vec<String>,
    /// Mail exchangers rendered as `"<priority> <target>"`.
    pub mx_records: Vec<String>,
    /// Authoritative name servers.
    pub ns_records: Vec<String>,
    /// TXT strings; multi-string records joined with a space.
    pub txt_records: Vec<String>,
    /// TTL of the first A answer, in seconds.
    pub ttl: Option<u32>,
    /// Set only when every query failed.
    pub error: Option<ProbeFailure>,
}

impl DnsResult {
    pub(crate) fn empty(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            a_records: Vec::new(),
            aaaa_records: Vec::new(),
            mx_records: Vec::new(),
            ns_records: Vec::new(),
            txt_records: Vec::new(),
            ttl: None,
            error: None,
        }
    }

    pub(crate) fn failed(domain: &str, error: ProbeFailure) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(domain)
        }
    }
}

/// HTTP response analysis result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResult {
    /// URL as requested.
    pub url: String,
    /// Final status code after redirects.
    pub status: Option<u16>,
    /// Reason phrase for `status` (e.g. `"Moved Permanently"`, or `"HTTP 418"`).
    pub status_text: Option<String>,
    /// Wall-clock time from request start to full body, in milliseconds.
    pub response_time_ms: Option<u64>,
    /// `content-type` response header.
    pub content_type: Option<String>,
    /// `server` response header.
    pub server: Option<String>,
    /// All response headers, lowercase names, repeated values joined with `", "`.
    pub headers: BTreeMap<String, String>,
    /// Every URL visited, starting with the request URL. Empty without redirects.
    pub redirect_chain: Vec<String>,
    /// URL that produced the final response.
    pub final_url: Option<String>,
    /// `content-length` header, or the body size when absent.
    pub content_length: Option<u64>,
    /// Failure description.
    pub error: Option<ProbeFailure>,
}

impl HttpResult {
    pub(crate) fn failed(url: &str, error: ProbeFailure) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            status_text: None,
            response_time_ms: None,
            content_type: None,
            server: None,
            headers: BTreeMap::new(),
            redirect_chain: Vec::new(),
            final_url: None,
            content_length: None,
            error: Some(error),
        }
    }
}

/// TLS session and leaf certificate details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsResult {
    /// Host as requested.
    pub host: String,
    /// Negotiated protocol (e.g. `"TLSv1.3"`).
    pub protocol: Option<String>,
    /// Negotiated cipher suite (e.g. `"TLS_AES_128_GCM_SHA256"`).
    pub cipher_suite: Option<String>,
    /// Issuer common name, or the full issuer DN when it has no CN.
    pub issuer: Option<String>,
    /// Subject common name, or the full subject DN when it has no CN.
    pub subject: Option<String>,
    /// Not-before date (UTC).
    pub valid_from: Option<NaiveDate>,
    /// Not-after date (UTC).
    pub valid_until: Option<NaiveDate>,
    /// Days from today (UTC) to `valid_until`; negative once expired.
    pub days_until_expiry: Option<i64>,
    /// `days_until_expiry < 0`.
    pub expired: Option<bool>,
    /// Serial number as uppercase hex.
    pub serial_number: Option<String>,
    /// DNS names from the SAN extension; omitted when there are none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_alternative_names: Option<Vec<String>>,
    /// Whether the chain verified against the bundled web PKI roots.
    pub trusted: Option<bool>,
    /// Why verification failed, when `trusted` is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<String>,
    /// Failure before a session was established.
    pub error: Option<ProbeFailure>,
}

impl TlsResult {
    pub(crate) fn empty(host: &str) -> Self {
        Self {
            host: host.to_string(),
            protocol: None,
            cipher_suite: None,
            issuer: None,
            subject: None,
            valid_from: None,
            valid_until: None,
            days_until_expiry: None,
            expired: None,
            serial_number: None,
            subject_alternative_names: None,
            trusted: None,
            verification_error: None,
            error: None,
        }
    }

    pub(crate) fn failed(host: &str, error: ProbeFailure) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(host)
        }
    }
}

/// Result of any probe, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "probe", rename_all = "lowercase")]
pub enum ProbeOutcome {
    Ping(ConnectivityResult),
    Dns(DnsResult),
    Http(HttpResult),
    Tls(TlsResult),
}

impl ProbeOutcome {
    pub const fn kind(&self) -> ProbeKind {
        match self {
            Self::Ping(_) => ProbeKind::Ping,
            Self::Dns(_) => ProbeKind::Dns,
            Self::Http(_) => ProbeKind::Http,
            Self::Tls(_) => ProbeKind::Tls,
        }
    }

    /// The failure carried by the inner result, if any.
    pub const fn error(&self) -> Option<&ProbeFailure> {
        match self {
            Self::Ping(r) => r.error.as_ref(),
            Self::Dns(r) => r.error.as_ref(),
            Self::Http(r) => r.error.as_ref(),
            Self::Tls(r) => r.error.as_ref(),
        }
    }
}
