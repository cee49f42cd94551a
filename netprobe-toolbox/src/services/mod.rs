//! Service façade exposing all probe operations.
//!
//! [`ProbeService`] owns the validator, the four probers and the result
//! caches. Every call validates the raw target first; a rejection is the only
//! thing that comes back as `Err`. Routine network failures are reported
//! inside the returned result.

mod dns;
mod http;
mod ping;
mod resolver;
mod tls;
mod validator;

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::cache::ResultCache;
use crate::config::ProbeConfig;
use crate::error::{ProbeFailure, ToolboxResult};
use crate::types::{ConnectivityResult, DnsResult, HttpResult, ProbeKind, ProbeOutcome, TlsResult};

pub use dns::DnsProber;
pub use http::{HttpProber, SafeResolver};
pub use ping::ConnectivityProber;
pub use resolver::{HostResolver, SystemResolver};
pub use tls::TlsProber;
pub use validator::{TargetValidator, ValidatedTarget, ValidationVerdict};

/// A probe result that may carry a failure.
pub trait ProbeReport: Clone + Send + Sync + 'static {
    fn failure(&self) -> Option<&ProbeFailure>;
}

impl ProbeReport for ConnectivityResult {
    fn failure(&self) -> Option<&ProbeFailure> {
        self.error.as_ref()
    }
}

impl ProbeReport for DnsResult {
    fn failure(&self) -> Option<&ProbeFailure> {
        self.error.as_ref()
    }
}

impl ProbeReport for HttpResult {
    fn failure(&self) -> Option<&ProbeFailure> {
        self.error.as_ref()
    }
}

impl ProbeReport for TlsResult {
    fn failure(&self) -> Option<&ProbeFailure> {
        self.error.as_ref()
    }
}

/// Capability shared by the four probers: measure one validated target.
///
/// Implementations never fail across this boundary; failures are folded into
/// the report.
#[async_trait]
pub trait Prober: Send + Sync {
    type Report: ProbeReport;

    fn kind(&self) -> ProbeKind;

    async fn probe(&self, target: &ValidatedTarget) -> Self::Report;
}

#[async_trait]
impl Prober for ConnectivityProber {
    type Report = ConnectivityResult;

    fn kind(&self) -> ProbeKind {
        ProbeKind::Ping
    }

    async fn probe(&self, target: &ValidatedTarget) -> ConnectivityResult {
        self.ping(target).await
    }
}

#[async_trait]
impl Prober for DnsProber {
    type Report = DnsResult;

    fn kind(&self) -> ProbeKind {
        ProbeKind::Dns
    }

    async fn probe(&self, target: &ValidatedTarget) -> DnsResult {
        self.lookup(target).await
    }
}

#[async_trait]
impl Prober for HttpProber {
    type Report = HttpResult;

    fn kind(&self) -> ProbeKind {
        ProbeKind::Http
    }

    async fn probe(&self, target: &ValidatedTarget) -> HttpResult {
        self.analyze(target).await
    }
}

#[async_trait]
impl Prober for TlsProber {
    type Report = TlsResult;

    fn kind(&self) -> ProbeKind {
        ProbeKind::Tls
    }

    async fn probe(&self, target: &ValidatedTarget) -> TlsResult {
        self.inspect(target).await
    }
}

/// Entry point for all network diagnostic operations.
///
/// ```rust,no_run
/// use netprobe_toolbox::{ProbeConfig, ProbeService};
/// # async fn demo() -> netprobe_toolbox::ToolboxResult<()> {
/// let service = ProbeService::new(ProbeConfig::default())?;
/// let dns = service.dns_lookup("example.com").await?;
/// # Ok(())
/// # }
/// ```
pub struct ProbeService {
    config: Arc<ProbeConfig>,
    validator: Arc<TargetValidator>,
    ping: ConnectivityProber,
    dns: DnsProber,
    http: HttpProber,
    tls: TlsProber,
    dns_cache: Option<ResultCache<DnsResult>>,
    tls_cache: Option<ResultCache<TlsResult>>,
}

impl ProbeService {
    /// Build a service resolving through the system DNS configuration.
    pub fn new(config: ProbeConfig) -> ToolboxResult<Self> {
        let resolver = Arc::new(SystemResolver::new(config.timeout.dns_timeout()));
        Self::with_resolver(config, resolver)
    }

    /// Build a service whose validator and probers resolve hostnames through
    /// `resolver`. The DNS prober itself always queries real record sets.
    pub fn with_resolver(config: ProbeConfig, resolver: Arc<dyn HostResolver>) -> ToolboxResult<Self> {
        let config = Arc::new(config.into_validated()?);
        let validator = Arc::new(TargetValidator::new(
            config.security.clone(),
            Arc::clone(&resolver),
        ));

        let (dns_cache, tls_cache) = if config.cache.enabled {
            (
                Some(ResultCache::new(config.cache.ttl(), config.cache.max_entries)),
                Some(ResultCache::new(config.cache.ttl(), config.cache.max_entries)),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            ping: ConnectivityProber::new(Arc::clone(&config), Arc::clone(&resolver)),
            dns: DnsProber::new(Arc::clone(&config)),
            http: HttpProber::new(Arc::clone(&config), Arc::clone(&validator), Arc::clone(&resolver)),
            tls: TlsProber::new(Arc::clone(&config), resolver),
            validator,
            config,
            dns_cache,
            tls_cache,
        })
    }

    /// Inspect TLS on `port` instead of 443.
    #[must_use]
    pub fn with_tls_port(self, port: u16) -> Self {
        Self {
            tls: self.tls.with_port(port),
            ..self
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn validator(&self) -> &TargetValidator {
        &self.validator
    }

    /// Check reachability and latency of a host. Never cached.
    pub async fn ping(&self, host: &str) -> ToolboxResult<ConnectivityResult> {
        self.execute(&self.ping, None, host).await
    }

    /// Resolve A, AAAA, MX, NS and TXT records for a domain.
    pub async fn dns_lookup(&self, domain: &str) -> ToolboxResult<DnsResult> {
        self.execute(&self.dns, self.dns_cache.as_ref(), domain).await
    }

    /// Fetch a URL and report timing, headers and redirects. Never cached.
    pub async fn analyze_http(&self, url: &str) -> ToolboxResult<HttpResult> {
        self.execute(&self.http, None, url).await
    }

    /// Handshake with a host and describe its leaf certificate.
    pub async fn inspect_tls(&self, host: &str) -> ToolboxResult<TlsResult> {
        self.execute(&self.tls, self.tls_cache.as_ref(), host).await
    }

    /// Run the probe named by `kind` against a raw target.
    pub async fn run(&self, kind: ProbeKind, raw: &str) -> ToolboxResult<ProbeOutcome> {
        Ok(match kind {
            ProbeKind::Ping => ProbeOutcome::Ping(self.ping(raw).await?),
            ProbeKind::Dns => ProbeOutcome::Dns(self.dns_lookup(raw).await?),
            ProbeKind::Http => ProbeOutcome::Http(self.analyze_http(raw).await?),
            ProbeKind::Tls => ProbeOutcome::Tls(self.inspect_tls(raw).await?),
        })
    }

    /// Validate, consult the cache, probe, and cache error-free reports.
    ///
    /// The cache is keyed by the raw input and consulted only after the
    /// target passes validation.
    async fn execute<P: Prober>(
        &self,
        prober: &P,
        cache: Option<&ResultCache<P::Report>>,
        raw: &str,
    ) -> ToolboxResult<P::Report> {
        let kind = prober.kind();
        let verdict = if kind.takes_url() {
            self.validator.validate_url(raw).await
        } else {
            self.validator.validate_host(raw).await
        };
        let target = verdict.into_result()?;

        if let Some(cache) = cache
            && let Some(hit) = cache.get(raw)
        {
            debug!("[CACHE] {kind} hit for {raw}");
            return Ok(hit);
        }

        let report = prober.probe(&target).await;

        if let Some(cache) = cache
            && report.failure().is_none()
        {
            cache.insert(raw, report.clone());
        }
        Ok(report)
    }
}
