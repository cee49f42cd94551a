//! `/api/network` 路由

use actix_web::web::{self, Json, Query};
use netprobe_toolbox::{ConnectivityResult, DnsResult, HttpResult, ProbeService, TlsResult};
use serde::Deserialize;

use crate::error::ApiError;

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct HostQuery {
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DomainQuery {
    domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    url: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/network")
            .route("/ping", web::get().to(ping))
            .route("/dns", web::get().to(dns))
            .route("/http-analysis", web::get().to(http_analysis))
            .route("/tls-info", web::get().to(tls_info)),
    );
}

/// A present, non-blank query parameter.
fn required(value: Option<String>, name: &'static str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ApiError::MissingParameter(name))
}

async fn ping(
    service: web::Data<ProbeService>,
    query: Query<HostQuery>,
) -> ApiResult<ConnectivityResult> {
    let host = required(query.into_inner().host, "host")?;
    tracing::info!("Ping request for host: {host}");
    Ok(Json(service.ping(&host).await?))
}

async fn dns(service: web::Data<ProbeService>, query: Query<DomainQuery>) -> ApiResult<DnsResult> {
    let domain = required(query.into_inner().domain, "domain")?;
    tracing::info!("DNS lookup request for domain: {domain}");
    Ok(Json(service.dns_lookup(&domain).await?))
}

async fn http_analysis(
    service: web::Data<ProbeService>,
    query: Query<UrlQuery>,
) -> ApiResult<HttpResult> {
    let url = required(query.into_inner().url, "url")?;
    tracing::info!("HTTP analysis request for URL: {url}");
    Ok(Json(service.analyze_http(&url).await?))
}

async fn tls_info(service: web::Data<ProbeService>, query: Query<HostQuery>) -> ApiResult<TlsResult> {
    let host = required(query.into_inner().host, "host")?;
    tracing::info!("TLS info request for host: {host}");
    Ok(Json(service.inspect_tls(&host).await?))
}
