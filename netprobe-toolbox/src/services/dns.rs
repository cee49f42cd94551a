//! DNS 查询模块
//!
//! Five record types are queried concurrently, each under its own timeout.
//! A type with no answer (or a nonexistent name) yields an empty list; the
//! result only carries an `error` when every query failed outright.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::{
    ResolveError, TokioResolver,
    proto::rr::{Record, RecordType},
};
use log::{debug, trace};
use tokio::time::timeout;

use crate::config::ProbeConfig;
use crate::error::{ProbeErrorKind, ProbeFailure};
use crate::services::resolver::DEFAULT_RESOLVER;
use crate::services::validator::ValidatedTarget;
use crate::types::DnsResult;

/// Why a single record-type query produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryError {
    TimedOut,
    Failed(String),
}

/// `Ok(None)` means the resolver answered authoritatively with no records.
type QueryOutcome<T> = Result<Option<T>, QueryError>;

pub struct DnsProber {
    config: Arc<ProbeConfig>,
    resolver: TokioResolver,
}

impl DnsProber {
    /// Prober backed by the shared system resolver.
    pub fn new(config: Arc<ProbeConfig>) -> Self {
        Self::with_resolver(config, DEFAULT_RESOLVER.clone())
    }

    pub const fn with_resolver(config: Arc<ProbeConfig>, resolver: TokioResolver) -> Self {
        Self { config, resolver }
    }

    pub async fn lookup(&self, target: &ValidatedTarget) -> DnsResult {
        let domain = target.host.as_str();
        let wait = self.config.timeout.dns_timeout();
        debug!("[DNS] Looking up {domain}");

        let r = &self.resolver;
        let (a, aaaa, mx, ns, txt) = futures::join!(
            bounded(wait, r.ipv4_lookup(domain)),
            bounded(wait, r.ipv6_lookup(domain)),
            bounded(wait, r.mx_lookup(domain)),
            bounded(wait, r.ns_lookup(domain)),
            bounded(wait, r.txt_lookup(domain)),
        );

        let outcomes = [
            ("A", a.as_ref().err()),
            ("AAAA", aaaa.as_ref().err()),
            ("MX", mx.as_ref().err()),
            ("NS", ns.as_ref().err()),
            ("TXT", txt.as_ref().err()),
        ];
        for (record_type, err) in &outcomes {
            if let Some(err) = err {
                trace!("[DNS] {record_type} query for {domain} failed: {err:?}");
            }
        }
        let failures: Vec<&QueryError> = outcomes.iter().filter_map(|(_, e)| *e).collect();
        if failures.len() == outcomes.len() {
            let failure = total_failure(domain, &failures, wait);
            debug!("[DNS] Lookup of {domain} failed: {failure}");
            return DnsResult::failed(&target.input, failure);
        }

        let mut result = DnsResult::empty(&target.input);

        if let Ok(Some(lookup)) = a {
            result.a_records = lookup.iter().map(ToString::to_string).collect();
            result.ttl = lookup
                .as_lookup()
                .record_iter()
                .find(|r| r.record_type() == RecordType::A)
                .map(Record::ttl);
        }
        if let Ok(Some(lookup)) = aaaa {
            result.aaaa_records = lookup.iter().map(ToString::to_string).collect();
        }
        if let Ok(Some(lookup)) = mx {
            result.mx_records = lookup
                .iter()
                .map(|mx| format_mx(mx.preference(), &mx.exchange().to_string()))
                .collect();
        }
        if let Ok(Some(lookup)) = ns {
            result.ns_records = lookup
                .iter()
                .map(|ns| trim_root(&ns.to_string()).to_string())
                .collect();
        }
        if let Ok(Some(lookup)) = txt {
            result.txt_records = lookup
                .iter()
                .map(|txt| join_txt(txt.iter().map(|part| &**part)))
                .collect();
        }

        debug!(
            "[DNS] {domain}: {} A, {} AAAA, {} MX, {} NS, {} TXT",
            result.a_records.len(),
            result.aaaa_records.len(),
            result.mx_records.len(),
            result.ns_records.len(),
            result.txt_records.len()
        );
        result
    }
}

/// Run one query under `wait`, folding "no such records" into `Ok(None)`.
async fn bounded<T, F>(wait: Duration, query: F) -> QueryOutcome<T>
where
    F: Future<Output = Result<T, ResolveError>>,
{
    match timeout(wait, query).await {
        Ok(Ok(lookup)) => Ok(Some(lookup)),
        Ok(Err(e)) if e.is_no_records_found() || e.is_nx_domain() => Ok(None),
        Ok(Err(e)) => Err(QueryError::Failed(e.to_string())),
        Err(_) => Err(QueryError::TimedOut),
    }
}

fn total_failure(domain: &str, failures: &[&QueryError], wait: Duration) -> ProbeFailure {
    if failures.iter().all(|f| **f == QueryError::TimedOut) {
        return ProbeFailure::timeout(format!(
            "DNS lookup for {domain} timed out ({}ms)",
            wait.as_millis()
        ));
    }
    let detail = failures
        .iter()
        .find_map(|f| match f {
            QueryError::Failed(msg) => Some(msg.as_str()),
            QueryError::TimedOut => None,
        })
        .unwrap_or("resolver unavailable");
    ProbeFailure::new(
        ProbeErrorKind::HostNotFound,
        format!("DNS lookup failed: {detail}"),
    )
}

fn format_mx(preference: u16, exchange: &str) -> String {
    format!("{preference} {}", trim_root(exchange))
}

fn trim_root(name: &str) -> &str {
    name.trim_end_matches('.')
}

fn join_txt<'a>(parts: impl Iterator<Item = &'a [u8]>) -> String {
    parts
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
