//! HTTP response analysis.
//!
//! Issues one GET, follows redirects, and reports timing, headers and the
//! redirect chain. Each request gets its own client so the validator's pinned
//! address can be installed as a resolve override. Redirect hops are checked
//! against the validator's rules, and any name the client still has to resolve
//! goes through [`SafeResolver`].

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, trace, warn};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::{Attempt, Policy};
use reqwest::{Client, Response};

use crate::config::ProbeConfig;
use crate::error::{ProbeErrorKind, ProbeFailure};
use crate::services::resolver::HostResolver;
use crate::services::validator::{TargetValidator, ValidatedTarget, is_internal_ip};
use crate::types::HttpResult;

type BoxError = Box<dyn StdError + Send + Sync>;

/// `reqwest` resolver routed through a [`HostResolver`].
///
/// With `block_internal` set, names resolving to an internal address are
/// refused. This closes the window between validation and connect, including
/// redirect targets and DNS rebinding.
#[derive(Clone)]
pub struct SafeResolver {
    inner: Arc<dyn HostResolver>,
    block_internal: bool,
}

impl SafeResolver {
    pub fn new(inner: Arc<dyn HostResolver>, block_internal: bool) -> Self {
        Self {
            inner,
            block_internal,
        }
    }
}

impl Resolve for SafeResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let inner = Arc::clone(&self.inner);
        let block_internal = self.block_internal;
        Box::pin(async move {
            let host = name.as_str().to_string();
            let addrs = inner
                .resolve(&host)
                .await
                .map_err(|e| -> BoxError { Box::new(e) })?;

            if block_internal && addrs.iter().copied().any(is_internal_ip) {
                warn!("[HTTP] Refusing to connect to {host}: resolves to an internal address");
                return Err(Box::new(ProbeFailure::new(
                    ProbeErrorKind::RedirectRejected,
                    format!("{host} resolves to an internal address"),
                )) as BoxError);
            }

            let addrs: Addrs = Box::new(
                addrs
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, 0))
                    .collect::<Vec<_>>()
                    .into_iter(),
            );
            Ok(addrs)
        })
    }
}

pub struct HttpProber {
    config: Arc<ProbeConfig>,
    validator: Arc<TargetValidator>,
    resolver: Arc<dyn HostResolver>,
}

impl HttpProber {
    pub fn new(
        config: Arc<ProbeConfig>,
        validator: Arc<TargetValidator>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            config,
            validator,
            resolver,
        }
    }

    pub async fn analyze(&self, target: &ValidatedTarget) -> HttpResult {
        let url = target.input.as_str();
        debug!("[HTTP] Analyzing {url}");

        let hops: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let client = match self.build_client(target, Arc::clone(&hops)) {
            Ok(client) => client,
            Err(e) => {
                warn!("[HTTP] Failed to build client: {e}");
                return HttpResult::failed(
                    url,
                    ProbeFailure::new(ProbeErrorKind::Unexpected, format!("Analysis failed: {e}")),
                );
            }
        };

        let start = Instant::now();
        let mut response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let failure = classify(&e);
                debug!("[HTTP] Request to {url} failed: {failure}");
                return HttpResult::failed(url, failure);
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = collect_headers(&response);

        // Only the length is needed; chunks are dropped as they arrive.
        let mut body_len: u64 = 0;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => body_len += chunk.len() as u64,
                Ok(None) => break,
                Err(e) => {
                    let failure = classify(&e);
                    debug!("[HTTP] Reading body from {url} failed: {failure}");
                    return HttpResult::failed(url, failure);
                }
            }
        }
        let elapsed = start.elapsed();

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(body_len);

        let hops = hops.lock().map(|h| h.clone()).unwrap_or_default();
        let redirect_chain = if hops.is_empty() {
            Vec::new()
        } else {
            std::iter::once(url.to_string()).chain(hops).collect()
        };

        debug!(
            "[HTTP] {url} -> {status} in {:?} ({} redirects)",
            elapsed,
            redirect_chain.len().saturating_sub(1)
        );

        HttpResult {
            url: url.to_string(),
            status: Some(status),
            status_text: Some(status_text(status)),
            response_time_ms: Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
            content_type: headers.get("content-type").cloned(),
            server: headers.get("server").cloned(),
            headers,
            redirect_chain,
            final_url: Some(final_url),
            content_length: Some(content_length),
            error: None,
        }
    }

    fn build_client(
        &self,
        target: &ValidatedTarget,
        hops: Arc<Mutex<Vec<String>>>,
    ) -> reqwest::Result<Client> {
        let validator = Arc::clone(&self.validator);
        let max_redirects = self.config.http.max_redirects;
        let policy = Policy::custom(move |attempt| follow_checked(attempt, &validator, &hops, max_redirects));

        let mut builder = Client::builder()
            .timeout(self.config.timeout.http_timeout())
            .user_agent(self.config.http.user_agent.as_str())
            .redirect(policy)
            .no_proxy();

        if let Some(pinned) = target.pinned_addr
            && target.host.parse::<IpAddr>().is_err()
        {
            trace!("[HTTP] Pinning {} to {pinned}", target.host);
            builder = builder.resolve(&target.host, SocketAddr::new(pinned, 0));
        }
        builder
            .dns_resolver(Arc::new(SafeResolver::new(
                Arc::clone(&self.resolver),
                self.config.security.block_internal_ips,
            )))
            .build()
    }
}

/// Redirect policy body: re-validate the hop, enforce the hop limit, record it.
fn follow_checked(
    attempt: Attempt<'_>,
    validator: &TargetValidator,
    hops: &Mutex<Vec<String>>,
    max_redirects: usize,
) -> reqwest::redirect::Action {
    if attempt.previous().len() > max_redirects {
        return attempt.error(ProbeFailure::new(
            ProbeErrorKind::RedirectRejected,
            format!("Too many redirects (max {max_redirects})"),
        ));
    }
    let hop = attempt.url().to_string();
    if let Err(reason) = validator.check_redirect(attempt.url()) {
        warn!("[HTTP] Redirect to {hop} rejected: {reason}");
        return attempt.error(ProbeFailure::new(
            ProbeErrorKind::RedirectRejected,
            format!("Redirect to {hop} rejected: {reason}"),
        ));
    }
    if let Ok(mut hops) = hops.lock() {
        hops.push(hop);
    }
    attempt.follow()
}

/// Lowercase header names; repeated headers joined with `", "`.
fn collect_headers(response: &Response) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers
            .entry(name.as_str().to_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    headers
}

/// Map a `reqwest` error onto a failure kind, preferring a [`ProbeFailure`]
/// raised by our own redirect policy or resolver.
fn classify(err: &reqwest::Error) -> ProbeFailure {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(failure) = cause.downcast_ref::<ProbeFailure>() {
            return failure.clone();
        }
        source = cause.source();
    }

    let detail = error_chain(err);
    if err.is_timeout() {
        ProbeFailure::timeout(format!("HTTP request timed out: {detail}"))
    } else if err.is_redirect() {
        ProbeFailure::new(ProbeErrorKind::RedirectRejected, detail)
    } else if err.is_connect() {
        ProbeFailure::connection(format!("HTTP request failed: {detail}"))
    } else if err.is_request() || err.is_body() || err.is_decode() {
        ProbeFailure::protocol(format!("HTTP request failed: {detail}"))
    } else {
        ProbeFailure::new(ProbeErrorKind::Unexpected, format!("Analysis failed: {detail}"))
    }
}

/// `err` followed by each of its sources, joined with `": "`.
fn error_chain(err: &dyn StdError) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

/// Reason phrase for common status codes; `"HTTP <code>"` otherwise.
pub(crate) fn status_text(code: u16) -> String {
    let phrase = match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => return format!("HTTP {code}"),
    };
    phrase.to_string()
}
