//! Probe configuration.
//!
//! Built once at startup, validated with [`ProbeConfig::into_validated`], then
//! shared read-only behind an `Arc` by the validator, probers and caches.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ToolboxError, ToolboxResult};

/// Root configuration for all probes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProbeConfig {
    pub timeout: TimeoutConfig,
    pub security: SecurityConfig,
    pub ping: PingConfig,
    pub http: HttpConfig,
    pub cache: CacheConfig,
}

/// Per-probe time limits, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TimeoutConfig {
    pub ping: u64,
    pub http: u64,
    pub tls: u64,
    pub dns: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ping: 3_000,
            http: 10_000,
            tls: 5_000,
            dns: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub const fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping)
    }

    pub const fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http)
    }

    pub const fn tls_timeout(&self) -> Duration {
        Duration::from_millis(self.tls)
    }

    pub const fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns)
    }
}

/// Target policy applied by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SecurityConfig {
    /// Resolve domain names and refuse those landing on internal addresses.
    pub block_internal_ips: bool,
    /// Hosts refused outright. Compared after trim + lowercase.
    pub blocked_hosts: BTreeSet<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            block_internal_ips: true,
            blocked_hosts: BTreeSet::new(),
        }
    }
}

impl SecurityConfig {
    /// `host` must already be normalized.
    pub fn is_blocked(&self, host: &str) -> bool {
        self.blocked_hosts.contains(host)
    }
}

/// Connectivity prober settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PingConfig {
    /// Try the platform `ping` utility before falling back to TCP.
    pub system_ping: bool,
    /// Ports tried, in order, by the TCP reachability fallback.
    pub tcp_ports: Vec<u16>,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            system_ping: true,
            tcp_ports: vec![443, 80],
        }
    }
}

/// HTTP prober settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HttpConfig {
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            user_agent: concat!("netprobe/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Result cache settings (DNS and TLS only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_entries: 1_000,
        }
    }
}

impl CacheConfig {
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl ProbeConfig {
    /// Normalize the block list and reject unusable values.
    pub fn into_validated(mut self) -> ToolboxResult<Self> {
        self.security.blocked_hosts = self
            .security
            .blocked_hosts
            .iter()
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self.validate()?;
        Ok(self)
    }

    /// Check that every limit is usable.
    pub fn validate(&self) -> ToolboxResult<()> {
        let timeouts = [
            ("timeout.ping", self.timeout.ping),
            ("timeout.http", self.timeout.http),
            ("timeout.tls", self.timeout.tls),
            ("timeout.dns", self.timeout.dns),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(ToolboxError::ConfigError(format!(
                    "{key} must be greater than zero"
                )));
            }
        }
        if self.cache.enabled && (self.cache.max_entries == 0 || self.cache.ttl_secs == 0) {
            return Err(ToolboxError::ConfigError(
                "cache.max-entries and cache.ttl-secs must be greater than zero when the cache is enabled"
                    .to_string(),
            ));
        }
        if !self.ping.system_ping && self.ping.tcp_ports.is_empty() {
            return Err(ToolboxError::ConfigError(
                "ping.tcp-ports cannot be empty when ping.system-ping is disabled".to_string(),
            ));
        }
        Ok(())
    }
}
