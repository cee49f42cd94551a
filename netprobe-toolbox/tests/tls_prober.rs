//! TLS inspection against a loopback fixture presenting a self-signed
//! certificate for `probe.test`, valid 2025-08-10 to 2026-08-10.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use common::{LOOPBACK, StaticResolver, closed_port, spawn_silent, spawn_tls};
use netprobe_toolbox::{ProbeConfig, ProbeErrorKind, TlsProber, ValidatedTarget};

fn prober(port: u16, configure: impl FnOnce(&mut ProbeConfig)) -> TlsProber {
    let mut config = ProbeConfig::default();
    config.security.block_internal_ips = false;
    configure(&mut config);
    let resolver = Arc::new(StaticResolver::default().with("probe.test", &[LOOPBACK]));
    TlsProber::new(Arc::new(config), resolver).with_port(port)
}

fn pinned_target() -> ValidatedTarget {
    ValidatedTarget::unchecked("probe.test", "probe.test", Some(LOOPBACK))
}

#[tokio::test]
async fn test_inspect_self_signed_certificate() {
    let (addr, _server) = spawn_tls().await;

    let result = prober(addr.port(), |_| {}).inspect(&pinned_target()).await;

    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.host, "probe.test");
    assert_eq!(result.protocol.as_deref(), Some("TLSv1.3"));
    let cipher = require_some!(result.cipher_suite.clone());
    assert!(cipher.starts_with("TLS_"), "cipher: {cipher}");

    assert_eq!(result.subject.as_deref(), Some("probe.test"));
    assert_eq!(result.issuer.as_deref(), Some("probe.test"));
    assert_eq!(result.serial_number.as_deref(), Some("ABCDEF0123456789"));
    assert_eq!(
        result.subject_alternative_names,
        Some(vec!["probe.test".to_string(), "www.probe.test".to_string()])
    );
    assert_eq!(result.valid_from, NaiveDate::from_ymd_opt(2025, 8, 10));
    assert_eq!(result.valid_until, NaiveDate::from_ymd_opt(2026, 8, 10));

    // Expiry is relative to today's UTC date; allow for a midnight rollover.
    let days = require_some!(result.days_until_expiry);
    let expected = (NaiveDate::from_ymd_opt(2026, 8, 10).unwrap() - Utc::now().date_naive()).num_days();
    assert!((days - expected).abs() <= 1, "days {days}, expected about {expected}");
    assert_eq!(result.expired, Some(days < 0));

    // Self-signed: inspected, but not trusted by the web PKI roots.
    assert_eq!(result.trusted, Some(false));
    assert!(result.verification_error.is_some());
}

#[tokio::test]
async fn test_inspect_resolves_unpinned_target() {
    let (addr, _server) = spawn_tls().await;
    let target = ValidatedTarget::unchecked("probe.test", "probe.test", None);

    let result = prober(addr.port(), |_| {}).inspect(&target).await;

    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.subject.as_deref(), Some("probe.test"));
}

#[tokio::test]
async fn test_inspect_refuses_internal_resolution() {
    let target = ValidatedTarget::unchecked("probe.test", "probe.test", None);

    let result = prober(443, |c| c.security.block_internal_ips = true)
        .inspect(&target)
        .await;

    let error = require_some!(result.error);
    assert_eq!(error.kind, ProbeErrorKind::ConnectionFailed);
    assert!(result.subject.is_none());
}

#[tokio::test]
async fn test_inspect_unknown_host() {
    let target = ValidatedTarget::unchecked("missing.test", "missing.test", None);

    let result = prober(443, |_| {}).inspect(&target).await;

    let error = require_some!(result.error);
    assert_eq!(error.kind, ProbeErrorKind::HostNotFound);
}

#[tokio::test]
async fn test_inspect_connection_refused() {
    let port = closed_port().await;

    let result = prober(port, |_| {}).inspect(&pinned_target()).await;

    let error = require_some!(result.error);
    assert_eq!(error.kind, ProbeErrorKind::ConnectionFailed);
    assert!(result.protocol.is_none());
}

#[tokio::test]
async fn test_inspect_handshake_timeout() {
    let (addr, _server) = spawn_silent().await;

    let result = prober(addr.port(), |c| c.timeout.tls = 200)
        .inspect(&pinned_target())
        .await;

    let error = require_some!(result.error);
    assert_eq!(error.kind, ProbeErrorKind::Timeout);
}
