//! HTTP analysis against a loopback fixture server
//!
//! 运行方式:
//! ```bash
//! cargo test -p netprobe-toolbox --test http_prober
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{LOOPBACK, StaticResolver, closed_port, response, spawn_http, spawn_silent};
use netprobe_toolbox::{
    HttpProber, HttpResult, ProbeConfig, ProbeErrorKind, TargetValidator, ValidatedTarget,
};

/// Fixture servers listen on loopback, so internal-IP blocking is off and the
/// fixture host is pinned the way the validator would pin it.
fn prober(configure: impl FnOnce(&mut ProbeConfig)) -> HttpProber {
    let mut config = ProbeConfig::default();
    config.security.block_internal_ips = false;
    configure(&mut config);
    let config = Arc::new(config);

    let resolver = Arc::new(StaticResolver::default().with("probe.test", &[LOOPBACK]));
    let validator = Arc::new(TargetValidator::new(config.security.clone(), resolver.clone()));
    HttpProber::new(config, validator, resolver)
}

async fn analyze(prober: &HttpProber, port: u16, path: &str) -> HttpResult {
    let url = format!("http://probe.test:{port}{path}");
    let target = ValidatedTarget::unchecked(url, "probe.test", Some(LOOPBACK));
    prober.analyze(&target).await
}

// ==================== success tests ====================

#[tokio::test]
async fn test_analyze_ok_response() {
    let (addr, _server) = spawn_http(|_| {
        response(
            "200 OK",
            &[
                ("Content-Type", "text/html; charset=utf-8"),
                ("Server", "fixture/1.0"),
                ("X-Dup", "a"),
                ("X-Dup", "b"),
                ("Content-Length", "5"),
            ],
            "hello",
        )
    })
    .await;

    let result = analyze(&prober(|_| {}), addr.port(), "/").await;

    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.status_text.as_deref(), Some("OK"));
    assert_eq!(result.content_type.as_deref(), Some("text/html; charset=utf-8"));
    assert_eq!(result.server.as_deref(), Some("fixture/1.0"));
    assert_eq!(result.headers.get("x-dup").map(String::as_str), Some("a, b"));
    assert_eq!(result.content_length, Some(5));
    assert!(result.redirect_chain.is_empty());
    assert!(result.response_time_ms.is_some());
}

#[tokio::test]
async fn test_analyze_content_length_falls_back_to_body() {
    let (addr, _server) = spawn_http(|_| response("200 OK", &[], "twelve bytes")).await;

    let result = analyze(&prober(|_| {}), addr.port(), "/").await;

    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.content_length, Some(12));
}

#[tokio::test]
async fn test_analyze_unlisted_status_text() {
    let (addr, _server) = spawn_http(|_| response("418 I'm a teapot", &[("Content-Length", "0")], "")).await;

    let result = analyze(&prober(|_| {}), addr.port(), "/").await;

    assert_eq!(result.status, Some(418));
    assert_eq!(result.status_text.as_deref(), Some("HTTP 418"));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_analyze_counts_chunked_body() {
    let (addr, _server) = spawn_http(|_| {
        response(
            "200 OK",
            &[("Transfer-Encoding", "chunked")],
            "5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
    })
    .await;

    let result = analyze(&prober(|_| {}), addr.port(), "/").await;

    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.content_length, Some(11));
}

// ==================== redirect tests ====================

#[tokio::test]
async fn test_analyze_follows_redirect_chain() {
    let (addr, _server) = spawn_http(|path| match path {
        "/start" => response("301 Moved Permanently", &[("Location", "/final"), ("Content-Length", "0")], ""),
        _ => response("200 OK", &[("Content-Length", "2")], "ok"),
    })
    .await;
    let port = addr.port();

    let result = analyze(&prober(|_| {}), port, "/start").await;

    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.status, Some(200));
    assert_eq!(
        result.redirect_chain,
        vec![
            format!("http://probe.test:{port}/start"),
            format!("http://probe.test:{port}/final"),
        ]
    );
    assert_eq!(
        result.final_url.as_deref(),
        Some(format!("http://probe.test:{port}/final").as_str())
    );
}

#[tokio::test]
async fn test_analyze_rejects_redirect_to_loopback() {
    let (addr, _server) = spawn_http(move |_| {
        response(
            "302 Found",
            &[("Location", "http://127.0.0.1/admin"), ("Content-Length", "0")],
            "",
        )
    })
    .await;

    let result = analyze(&prober(|_| {}), addr.port(), "/").await;

    let error = require_some!(result.error);
    assert_eq!(error.kind, ProbeErrorKind::RedirectRejected);
    assert!(result.status.is_none());
}

#[tokio::test]
async fn test_analyze_rejects_unsupported_redirect_scheme() {
    let (addr, _server) = spawn_http(|_| {
        response("302 Found", &[("Location", "ftp://probe.test/file"), ("Content-Length", "0")], "")
    })
    .await;

    let result = analyze(&prober(|_| {}), addr.port(), "/").await;

    let error = require_some!(result.error);
    assert_eq!(error.kind, ProbeErrorKind::RedirectRejected);
}

#[tokio::test]
async fn test_analyze_stops_after_max_redirects() {
    let (addr, _server) = spawn_http(|path| {
        let n: u32 = path.trim_start_matches("/hop/").parse().unwrap_or(0);
        let next = format!("/hop/{}", n + 1);
        response("302 Found", &[("Location", next.as_str()), ("Content-Length", "0")], "")
    })
    .await;

    let result = analyze(&prober(|c| c.http.max_redirects = 3), addr.port(), "/hop/0").await;

    let error = require_some!(result.error);
    assert_eq!(error.kind, ProbeErrorKind::RedirectRejected);
    assert!(error.message.contains("max 3"), "message: {}", error.message);
}

// ==================== failure tests ====================

#[tokio::test]
async fn test_analyze_times_out() {
    let (addr, _server) = spawn_silent().await;

    let result = analyze(&prober(|c| c.timeout.http = 200), addr.port(), "/").await;

    let error = require_some!(result.error);
    assert_eq!(error.kind, ProbeErrorKind::Timeout);
    assert!(result.status.is_none());
}

#[tokio::test]
async fn test_analyze_connection_refused() {
    let port = closed_port().await;

    let result = analyze(&prober(|_| {}), port, "/").await;

    let error = require_some!(result.error);
    assert_eq!(error.kind, ProbeErrorKind::ConnectionFailed);
}

#[tokio::test]
async fn test_analyze_blocks_internal_resolution_at_connect() {
    // Nothing pinned: the client resolves itself and must refuse loopback.
    let config = Arc::new(ProbeConfig::default());
    let resolver = Arc::new(StaticResolver::default().with("rebind.test", &[LOOPBACK]));
    let validator = Arc::new(TargetValidator::new(config.security.clone(), resolver.clone()));
    let prober = HttpProber::new(config, validator, resolver.clone());

    let target = ValidatedTarget::unchecked("http://rebind.test:9/", "rebind.test", None);
    let result = prober.analyze(&target).await;

    let error = require_some!(result.error);
    assert!(error.message.contains("internal address"), "message: {}", error.message);
    assert!(resolver.calls() >= 1);
}

// ==================== proxy environment tests ====================

/// Set only in the child process spawned by `test_analyze_ignores_proxy_environment`.
const PROXY_CHILD_ENV: &str = "NETPROBE_PROXY_CHILD";

/// Runs inside a child process whose environment names a proxy. The client
/// must still resolve `rebind.test` itself and refuse the loopback answer.
#[tokio::test]
async fn test_analyze_with_proxy_env_still_resolves_locally() {
    if std::env::var_os(PROXY_CHILD_ENV).is_none() {
        return;
    }
    let config = Arc::new(ProbeConfig::default());
    let resolver = Arc::new(StaticResolver::default().with("rebind.test", &[LOOPBACK]));
    let validator = Arc::new(TargetValidator::new(config.security.clone(), resolver.clone()));
    let prober = HttpProber::new(config, validator, resolver.clone());

    let target = ValidatedTarget::unchecked("http://rebind.test/admin", "rebind.test", None);
    let result = prober.analyze(&target).await;

    assert!(result.status.is_none(), "status: {:?}", result.status);
    let error = require_some!(result.error);
    assert!(error.message.contains("internal address"), "message: {}", error.message);
    assert!(resolver.calls() >= 1);
}

#[tokio::test]
async fn test_analyze_ignores_proxy_environment() {
    let forwarded = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&forwarded);
    let (proxy, _server) = spawn_http(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        response("200 OK", &[("Content-Length", "2")], "ok")
    })
    .await;
    let proxy_url = format!("http://{proxy}");

    // Proxy variables are process-wide, so the check runs in a child copy of
    // this test binary.
    let output = tokio::process::Command::new(std::env::current_exe().unwrap())
        .args([
            "test_analyze_with_proxy_env_still_resolves_locally",
            "--exact",
            "--nocapture",
        ])
        .env(PROXY_CHILD_ENV, "1")
        .env("HTTP_PROXY", &proxy_url)
        .env("http_proxy", &proxy_url)
        .env("ALL_PROXY", &proxy_url)
        .env("all_proxy", &proxy_url)
        .env_remove("NO_PROXY")
        .env_remove("no_proxy")
        .output()
        .await
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "child failed:\n{stdout}\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("1 passed"), "child output:\n{stdout}");
    assert_eq!(forwarded.load(Ordering::SeqCst), 0, "request went through the proxy");
}
