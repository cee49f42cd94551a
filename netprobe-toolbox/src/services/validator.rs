//! SSRF-safe target validation.
//!
//! Every probe target passes through [`TargetValidator`] before any socket is
//! opened. Checks run in a fixed order and stop at the first failure; only the
//! last one (internal-address resolution) touches the network. The address it
//! resolves is pinned into the returned [`ValidatedTarget`] so probers connect
//! to exactly what was checked.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, LazyLock};

use log::{debug, warn};
use regex::Regex;
use url::Url;

use crate::config::SecurityConfig;
use crate::error::{RejectReason, ToolboxResult};
use crate::services::resolver::HostResolver;

/// Dot-joined labels of 1-63 alphanumerics/hyphens (no leading or trailing
/// hyphen), ending in an alphabetic label of at least two characters.
static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$")
        .unwrap_or_else(|_| unreachable!("domain pattern is a valid regex"))
});

/// Dotted-quad IPv4, each octet 0-255 without leading zeros.
static IPV4_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(\.(25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3}$")
        .unwrap_or_else(|_| unreachable!("ipv4 pattern is a valid regex"))
});

/// A target that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTarget {
    pub(crate) input: String,
    pub(crate) host: String,
    pub(crate) pinned_addr: Option<IpAddr>,
}

impl ValidatedTarget {
    /// Caller input, trimmed (a bare host, or the full URL for HTTP probes).
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Normalized host (trimmed, lowercase, IPv6 brackets kept as given).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Address observed during validation. `None` when internal-IP blocking is
    /// off or resolution failed (fail-open); probers then resolve themselves.
    pub const fn pinned_addr(&self) -> Option<IpAddr> {
        self.pinned_addr
    }

    /// Target that skips validation. Only for probers driven directly by tests
    /// against loopback fixtures.
    #[cfg(any(test, feature = "test-util"))]
    pub fn unchecked(input: impl Into<String>, host: impl Into<String>, pinned: Option<IpAddr>) -> Self {
        Self {
            input: input.into(),
            host: host.into(),
            pinned_addr: pinned,
        }
    }
}

/// Outcome of validating one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Allowed(ValidatedTarget),
    Rejected(RejectReason),
}

impl ValidationVerdict {
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    pub const fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Allowed(_) => None,
            Self::Rejected(reason) => Some(*reason),
        }
    }

    /// Convert into the error path used by the service façade.
    pub fn into_result(self) -> ToolboxResult<ValidatedTarget> {
        match self {
            Self::Allowed(target) => Ok(target),
            Self::Rejected(reason) => Err(reason.into()),
        }
    }
}

/// Classifies hosts and URLs as safe or unsafe probe targets.
#[derive(Clone)]
pub struct TargetValidator {
    security: SecurityConfig,
    resolver: Arc<dyn HostResolver>,
}

impl std::fmt::Debug for TargetValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetValidator")
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

impl TargetValidator {
    /// `security.blocked_hosts` is expected to be normalized already
    /// (see [`crate::ProbeConfig::into_validated`]).
    pub fn new(security: SecurityConfig, resolver: Arc<dyn HostResolver>) -> Self {
        Self { security, resolver }
    }

    pub const fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// Validate a bare hostname or IPv4 address.
    pub async fn validate_host(&self, raw: &str) -> ValidationVerdict {
        let input = raw.trim();
        if input.is_empty() {
            return ValidationVerdict::Rejected(RejectReason::EmptyHost);
        }
        self.verdict_for_host(input, input).await
    }

    /// Validate an `http`/`https` URL and the host it names.
    pub async fn validate_url(&self, raw: &str) -> ValidationVerdict {
        let input = raw.trim();
        if input.is_empty() {
            return ValidationVerdict::Rejected(RejectReason::EmptyHost);
        }
        let url = match parse_web_url(input) {
            Ok(url) => url,
            Err(reason) => {
                debug!("[VALIDATOR] Rejected URL {input}: {reason}");
                return ValidationVerdict::Rejected(reason);
            }
        };
        let Some(host) = url.host_str() else {
            return ValidationVerdict::Rejected(RejectReason::NoHostInUrl);
        };
        let host = host.to_string();
        self.verdict_for_host(input, &host).await
    }

    /// Synchronous re-check of a redirect hop.
    ///
    /// Applies the scheme and host grammar rules plus the internal-address
    /// rule for IP literals. Domain names are covered at connect time by the
    /// HTTP client's filtering resolver.
    pub fn check_redirect(&self, url: &Url) -> Result<(), RejectReason> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RejectReason::UnsupportedScheme);
        }
        let host = url.host_str().ok_or(RejectReason::NoHostInUrl)?;
        let host = self.check_syntax(host)?;
        if self.security.block_internal_ips
            && let Some(ip) = parse_ip_literal(&host)
            && is_internal_ip(ip)
        {
            return Err(RejectReason::InternalIpBlocked);
        }
        Ok(())
    }

    async fn verdict_for_host(&self, input: &str, raw_host: &str) -> ValidationVerdict {
        let host = match self.check_syntax(raw_host) {
            Ok(host) => host,
            Err(reason) => {
                warn!("[VALIDATOR] Rejected {raw_host}: {reason}");
                return ValidationVerdict::Rejected(reason);
            }
        };

        let pinned_addr = if self.security.block_internal_ips {
            match self.check_internal(&host).await {
                Ok(pinned) => pinned,
                Err(reason) => {
                    warn!("[VALIDATOR] Rejected {host}: {reason}");
                    return ValidationVerdict::Rejected(reason);
                }
            }
        } else {
            None
        };

        ValidationVerdict::Allowed(ValidatedTarget {
            input: input.to_string(),
            host,
            pinned_addr,
        })
    }

    /// Checks 1-4: emptiness, localhost variants, block list, grammar.
    /// Localhost forms are always `LocalhostBlocked`, listed or not.
    /// Returns the normalized host.
    fn check_syntax(&self, raw: &str) -> Result<String, RejectReason> {
        let host = raw.trim().to_lowercase();
        if host.is_empty() {
            return Err(RejectReason::EmptyHost);
        }
        if is_localhost(&host) {
            return Err(RejectReason::LocalhostBlocked);
        }
        if self.security.is_blocked(&host) {
            return Err(RejectReason::BlockedHost);
        }
        if !DOMAIN_PATTERN.is_match(&host) && !IPV4_PATTERN.is_match(&host) {
            return Err(RejectReason::InvalidFormat);
        }
        Ok(host)
    }

    /// Check 5: resolve and refuse if any address is internal.
    /// Resolution failure lets the target through unpinned.
    async fn check_internal(&self, host: &str) -> Result<Option<IpAddr>, RejectReason> {
        let addrs = match self.resolver.resolve(host).await {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("[VALIDATOR] Could not resolve {host} for internal IP check: {e}");
                return Ok(None);
            }
        };
        if addrs.iter().copied().any(is_internal_ip) {
            return Err(RejectReason::InternalIpBlocked);
        }
        Ok(addrs.first().copied())
    }
}

/// Parse `raw` and require an `http`/`https` scheme.
fn parse_web_url(raw: &str) -> Result<Url, RejectReason> {
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::EmptyHost) => return Err(RejectReason::NoHostInUrl),
        Err(_) => return Err(RejectReason::MalformedUrl),
    };
    // The url crate lowercases schemes while parsing.
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RejectReason::UnsupportedScheme);
    }
    Ok(url)
}

fn is_localhost(host: &str) -> bool {
    matches!(host, "localhost" | "0.0.0.0" | "::1" | "[::1]") || host.starts_with("127.")
}

fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

/// Loopback, link-local (incl. `169.254.0.0/16`), RFC 1918 private,
/// unspecified, IPv6 site-local and unique-local. IPv4-mapped IPv6 addresses
/// are judged by their IPv4 form.
pub(crate) fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_ipv4(v4),
        IpAddr::V6(v6) => is_internal_ipv6(v6),
    }
}

const fn is_internal_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_internal_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
        // fec0::/10 site-local
        || (first & 0xffc0) == 0xfec0
        // fc00::/7 unique-local
        || (first & 0xfe00) == 0xfc00
}
