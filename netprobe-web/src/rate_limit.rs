//! Per-client rate limiting.
//!
//! One token bucket per client address. A bucket starts full and is topped up
//! by `refill-tokens` at the end of every full period, never above capacity.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{Error, HttpResponse, web};
use serde_json::json;

use crate::config::RateLimitConfig;

const REMAINING_HEADER: &str = "x-rate-limit-remaining";

/// Most clients tracked at once. At the cap, idle buckets are pruned and then
/// the least recently refilled bucket is evicted.
const MAX_CLIENTS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    const fn full(capacity: u64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, period: Duration, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let periods = elapsed.as_nanos() / period.as_nanos().max(1);
        if periods == 0 {
            return;
        }
        let periods = u64::try_from(periods).unwrap_or(u64::MAX);
        let added = periods.saturating_mul(config.refill_tokens);
        self.tokens = self.tokens.saturating_add(added).min(config.capacity);
        let advance = u32::try_from(periods).map_or(elapsed, |p| period.saturating_mul(p));
        self.last_refill += advance;
    }

    /// Take one token. Returns the tokens left, or `None` when empty.
    fn try_consume(&mut self) -> Option<u64> {
        self.tokens = self.tokens.checked_sub(1)?;
        Some(self.tokens)
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    period: Duration,
    max_clients: usize,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            period: Duration::from_secs(config.refill_period_secs.max(1)),
            config,
            max_clients: MAX_CLIENTS,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_max_clients(self, max_clients: usize) -> Self {
        Self {
            max_clients: max_clients.max(1),
            ..self
        }
    }

    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Consume one token for `client`. `Some(remaining)` if allowed.
    pub fn check(&self, client: &str) -> Option<u64> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> Option<u64> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        if buckets.len() >= self.max_clients && !buckets.contains_key(client) {
            self.prune(&mut buckets, now);
            while buckets.len() >= self.max_clients {
                let Some(oldest) = buckets
                    .iter()
                    .min_by_key(|(_, bucket)| bucket.last_refill)
                    .map(|(key, _)| key.clone())
                else {
                    break;
                };
                tracing::debug!("Rate-limit table full, evicting {oldest}");
                buckets.remove(&oldest);
            }
        }

        let bucket = buckets
            .entry(client.to_string())
            .or_insert_with(|| TokenBucket::full(self.config.capacity, now));
        bucket.refill(&self.config, self.period, now);
        bucket.try_consume()
    }

    /// Drop buckets that have refilled to capacity; they hold no state a
    /// fresh bucket would not.
    fn prune(&self, buckets: &mut HashMap<String, TokenBucket>, now: Instant) {
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket.refill(&self.config, self.period, now);
            bucket.tokens < self.config.capacity
        });
        tracing::debug!("Pruned {} idle rate-limit buckets", before - buckets.len());
    }
}

/// Client address: first `X-Forwarded-For` entry, then `X-Real-IP`, then
/// the socket peer.
fn client_key(req: &ServiceRequest) -> String {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
    };
    let ip = header("x-forwarded-for")
        .and_then(|xff| xff.split(',').next().map(|ip| ip.trim().to_string()))
        .or_else(|| header("x-real-ip"))
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    format!("rate_limit:{ip}")
}

/// Middleware gate in front of every route.
pub async fn rate_limit<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    let Some(limiter) = req.app_data::<web::Data<RateLimiter>>().cloned() else {
        return Ok(next.call(req).await?.map_into_left_body());
    };
    if !limiter.enabled() {
        return Ok(next.call(req).await?.map_into_left_body());
    }

    let key = client_key(&req);
    match limiter.check(&key) {
        Some(remaining) => {
            let mut res = next.call(req).await?;
            res.headers_mut().insert(
                HeaderName::from_static(REMAINING_HEADER),
                HeaderValue::from(remaining),
            );
            Ok(res.map_into_left_body())
        }
        None => {
            tracing::warn!("Rate limit exceeded for client: {key}");
            let response = HttpResponse::TooManyRequests().json(json!({
                "error": "Rate limit exceeded",
                "message": "Too many requests. Please try again later.",
            }));
            Ok(req.into_response(response).map_into_right_body())
        }
    }
}
