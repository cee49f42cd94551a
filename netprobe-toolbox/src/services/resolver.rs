//! Shared DNS resolver helpers used across service modules.

use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver, config::ResolverConfig, config::ResolverOpts,
    name_server::TokioConnectionProvider,
};
use tokio::time::timeout;

use crate::error::ProbeFailure;

/// Shared default DNS resolver.
///
/// On Unix/Windows this uses the host system configuration (e.g. `/etc/resolv.conf`).
/// If the system configuration cannot be loaded, it falls back to Hickory's default
/// upstream set (Google Public DNS).
pub(crate) static DEFAULT_RESOLVER: LazyLock<TokioResolver> = LazyLock::new(build_system_resolver);

/// Build a resolver using the host system DNS configuration (with fallback).
fn build_system_resolver() -> TokioResolver {
    #[cfg(any(unix, target_os = "windows"))]
    {
        match TokioResolver::builder_tokio() {
            Ok(builder) => return builder.build(),
            Err(e) => {
                log::warn!(
                    "Failed to load system DNS configuration, falling back to defaults: {e}"
                );
            }
        }
    }

    TokioResolver::builder_with_config(
        ResolverConfig::default(),
        TokioConnectionProvider::default(),
    )
    .with_options(ResolverOpts::default())
    .build()
}

/// Host-to-address resolution seam.
///
/// The validator, the connectivity prober and the HTTP client's connect-time
/// filter all resolve through this trait so tests can substitute fixed answers.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve `host` (a domain name or an IP literal) to one or more addresses.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ProbeFailure>;
}

/// [`HostResolver`] backed by [`DEFAULT_RESOLVER`], bounded by a timeout.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ProbeFailure> {
        if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        match timeout(self.timeout, DEFAULT_RESOLVER.lookup_ip(host)).await {
            Ok(Ok(lookup)) => {
                let addrs: Vec<IpAddr> = lookup.iter().collect();
                if addrs.is_empty() {
                    Err(ProbeFailure::host_not_found(format!(
                        "Host not found: {host}"
                    )))
                } else {
                    Ok(addrs)
                }
            }
            Ok(Err(e)) => {
                log::debug!("[DNS] Resolution of {host} failed: {e}");
                Err(ProbeFailure::host_not_found(format!(
                    "Host not found: {host}"
                )))
            }
            Err(_) => Err(ProbeFailure::timeout(format!(
                "Resolution of {host} timed out ({}ms)",
                self.timeout.as_millis()
            ))),
        }
    }
}
