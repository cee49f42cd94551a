//! Netprobe HTTP API entry point
//!
//! Serves the network diagnostic probes under `/api/network`, behind a
//! per-client rate limit.

mod config;
mod error;
mod logging;
mod rate_limit;
mod routes;

use actix_web::middleware::{DefaultHeaders, from_fn};
use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use netprobe_toolbox::ProbeService;

use config::AppConfig;
use rate_limit::{RateLimiter, rate_limit};

#[actix_web::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    let _log_guard = logging::init(&config.logging)?;

    let service = ProbeService::new(config.probe.clone()).context("Invalid probe configuration")?;
    let service = web::Data::new(service);
    let limiter = web::Data::new(RateLimiter::new(config.rate_limit.clone()));

    let bind = (config.server.host.clone(), config.server.port);
    tracing::info!(
        "Starting netprobe on {}:{} with {} workers (rate limit {})",
        bind.0,
        bind.1,
        config.server.workers,
        if limiter.enabled() { "on" } else { "off" }
    );

    HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .app_data(limiter.clone())
            .wrap(from_fn(rate_limit))
            .wrap(DefaultHeaders::new().add(("Access-Control-Allow-Origin", "*")))
            .configure(routes::configure)
    })
    .workers(config.server.workers)
    .bind(&bind)
    .with_context(|| format!("Failed to bind {}:{}", bind.0, bind.1))?
    .run()
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}
