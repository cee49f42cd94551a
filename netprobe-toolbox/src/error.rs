//! 统一错误类型定义
//!
//! Two layers of failure exist. [`ToolboxError`] travels the `Err` path and is
//! reserved for validator rejections and bad configuration. Routine network
//! failures never do: probers fold them into a [`ProbeFailure`] stored in the
//! result's `error` field.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the target validator refused a host or URL.
///
/// The set is closed; the `Display` text is the message returned to callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// Input was empty or whitespace only.
    #[error("Host cannot be empty")]
    EmptyHost,

    /// Host is on the configured block list.
    #[error("Access to this host is not allowed")]
    BlockedHost,

    /// Host names the local machine.
    #[error("Access to localhost is not allowed")]
    LocalhostBlocked,

    /// Host is neither a well-formed domain name nor a dotted-quad IPv4 address.
    #[error("Invalid host format")]
    InvalidFormat,

    /// Host resolves to a loopback, link-local, private or unspecified address.
    #[error("Access to internal IPs is not allowed")]
    InternalIpBlocked,

    /// URL parsed but carries no host component.
    #[error("Invalid URL: no host specified")]
    NoHostInUrl,

    /// URL scheme other than `http` or `https`.
    #[error("Only HTTP and HTTPS protocols are allowed")]
    UnsupportedScheme,

    /// URL could not be parsed at all.
    #[error("Invalid URL format")]
    MalformedUrl,
}

/// 工具箱错误类型
#[derive(Error, Debug, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum ToolboxError {
    /// 目标被安全校验拒绝
    #[error("{0}")]
    Rejected(RejectReason),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ToolboxError {
    /// Whether this error is an expected outcome of user input.
    ///
    /// Expected errors are logged at `warn`, everything else at `error`.
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl From<RejectReason> for ToolboxError {
    fn from(reason: RejectReason) -> Self {
        Self::Rejected(reason)
    }
}

/// 工具箱 Result 类型别名
pub type ToolboxResult<T> = std::result::Result<T, ToolboxError>;

/// Category of a probe failure carried inside a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeErrorKind {
    /// Name resolution failed or returned nothing.
    HostNotFound,
    /// The peer refused or reset the connection.
    ConnectionFailed,
    /// A bounded operation ran out of time.
    Timeout,
    /// The peer spoke, but not the expected protocol (TLS alert, bad HTTP, bad certificate).
    ProtocolError,
    /// A redirect pointed at a target the validator refuses, or the hop limit was hit.
    RedirectRejected,
    /// Anything else.
    Unexpected,
}

/// Structured `error` field of every probe result.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct ProbeFailure {
    /// Failure category.
    pub kind: ProbeErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl ProbeFailure {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn host_not_found(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::HostNotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::ConnectionFailed, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::ProtocolError, message)
    }
}
