//! Reachability and latency checks.
//!
//! The platform `ping` utility is tried first since it measures a real ICMP
//! round trip. When it is disabled, missing, or gets no reply, a TCP connect to
//! the configured ports is timed instead.

use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, trace, warn};
use regex::Regex;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout_at;

use crate::config::ProbeConfig;
use crate::error::{ProbeErrorKind, ProbeFailure};
use crate::services::resolver::HostResolver;
use crate::services::validator::ValidatedTarget;
use crate::types::ConnectivityResult;

/// Per-reply latency, e.g. `time=12.3 ms` (Linux/macOS) or `time<1ms` (Windows).
static PING_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)time[=<]\s*(?P<val>[0-9]+(?:\.[0-9]+)?)\s*ms")
        .unwrap_or_else(|_| unreachable!("ping time pattern is a valid regex"))
});

/// Extra time granted to the `ping` process beyond its own reply timeout.
const PROCESS_GRACE: Duration = Duration::from_secs(1);

pub struct ConnectivityProber {
    config: Arc<ProbeConfig>,
    resolver: Arc<dyn HostResolver>,
}

impl ConnectivityProber {
    pub fn new(config: Arc<ProbeConfig>, resolver: Arc<dyn HostResolver>) -> Self {
        Self { config, resolver }
    }

    pub async fn ping(&self, target: &ValidatedTarget) -> ConnectivityResult {
        let host = target.input.as_str();
        debug!("[PING] Checking {host}");

        let ip = match target.pinned_addr {
            Some(ip) => ip,
            None => match self.resolver.resolve(&target.host).await {
                Ok(addrs) => match addrs.first() {
                    Some(ip) => *ip,
                    None => {
                        return ConnectivityResult::unreachable(
                            host,
                            None,
                            ProbeFailure::host_not_found(format!("Host not found: {host}")),
                        );
                    }
                },
                Err(e) => {
                    warn!("[PING] Could not resolve {host}: {e}");
                    return ConnectivityResult::unreachable(host, None, e);
                }
            },
        };

        let wait = self.config.timeout.ping_timeout();

        if self.config.ping.system_ping {
            match system_ping(ip, wait).await {
                Ok(latency_ms) => {
                    debug!("[PING] {host} ({ip}) replied in {latency_ms}ms");
                    return reachable(host, ip, latency_ms);
                }
                Err(e) => trace!("[PING] System ping for {ip} unavailable: {e}"),
            }
        }

        match tcp_ping(ip, &self.config.ping.tcp_ports, wait).await {
            Ok((port, latency_ms)) => {
                debug!("[PING] {host} ({ip}) accepted TCP on {port} in {latency_ms}ms");
                reachable(host, ip, latency_ms)
            }
            Err(e) => {
                debug!("[PING] {host} ({ip}) unreachable: {e}");
                ConnectivityResult::unreachable(host, Some(ip.to_string()), e)
            }
        }
    }
}

fn reachable(host: &str, ip: IpAddr, latency_ms: f64) -> ConnectivityResult {
    ConnectivityResult {
        host: host.to_string(),
        ip: Some(ip.to_string()),
        reachable: true,
        latency_ms: Some(latency_ms),
        timestamp: Utc::now(),
        error: None,
    }
}

/// Run the platform `ping` once against an already-resolved address.
async fn system_ping(ip: IpAddr, wait: Duration) -> Result<f64, ProbeFailure> {
    let secs = wait.as_secs().max(1).to_string();
    let millis = wait.as_millis().max(1).to_string();

    let mut cmd = Command::new("ping");
    if cfg!(target_os = "windows") {
        cmd.args(["-n", "1", "-w", &millis]);
    } else if cfg!(target_os = "macos") {
        cmd.args(["-c", "1", "-t", &secs]);
    } else {
        cmd.args(["-c", "1", "-W", &secs]);
    }
    cmd.arg(ip.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let deadline = tokio::time::Instant::now() + wait + PROCESS_GRACE;
    let output = timeout_at(deadline, cmd.output())
        .await
        .map_err(|_| ProbeFailure::timeout("ping timed out"))?
        .map_err(|e| ProbeFailure::new(ProbeErrorKind::Unexpected, format!("failed to execute ping: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        return Err(ProbeFailure::timeout(format!(
            "no echo reply from {ip}"
        )));
    }
    parse_ping_time(&stdout).ok_or_else(|| {
        ProbeFailure::new(
            ProbeErrorKind::Unexpected,
            "failed to parse ping output",
        )
    })
}

/// Extract the first per-reply latency (ms) from `ping` output.
fn parse_ping_time(output: &str) -> Option<f64> {
    PING_TIME
        .captures(output)
        .and_then(|caps| caps.name("val"))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Time a TCP connect to each port in turn until one accepts.
///
/// All attempts share one deadline. Returns the accepting port and the
/// connect time in milliseconds.
async fn tcp_ping(ip: IpAddr, ports: &[u16], wait: Duration) -> Result<(u16, f64), ProbeFailure> {
    let deadline = tokio::time::Instant::now() + wait;
    let mut last_error = ProbeFailure::connection(format!("No TCP port answered on {ip}"));

    for &port in ports {
        let addr = SocketAddr::new(ip, port);
        trace!("[PING] TCP connect to {addr}");
        let start = Instant::now();
        match timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => return Ok((port, elapsed_ms(start))),
            Ok(Err(e)) => {
                last_error = ProbeFailure::connection(format!("Connection error: {e}"));
            }
            Err(_) => {
                return Err(ProbeFailure::timeout(format!(
                    "Connection timed out after {}ms",
                    wait.as_millis()
                )));
            }
        }
    }

    Err(last_error)
}

fn elapsed_ms(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 1_000_000.0).round() / 1_000.0
}
