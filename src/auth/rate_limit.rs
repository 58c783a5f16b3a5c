//! Per-client token bucket rate limiting for sensitive routes.
//!
//! Flow Overview:
//! 1) The middleware checks whether the matched route is in the limited set.
//! 2) It derives a client key (peer IP, or the first forwarded hop when proxy
//!    headers are trusted).
//! 3) `check_at` refills the key's bucket and takes one token under a single
//!    lock spanning lookup and insert, so two first requests from one address
//!    always share one bucket.
//! 4) A background task calls `sweep_at` on an interval and drops buckets idle
//!    longer than the threshold, bounding memory under address churn.

use super::{error::AuthError, state::AuthState};
use axum::{
    Extension,
    extract::{ConnectInfo, MatchedPath, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Key used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

pub trait RateLimiter: Send + Sync {
    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision;

    /// Evict entries idle for longer than the configured threshold. Returns
    /// how many were removed.
    fn sweep_at(&self, now: Instant) -> usize;

    fn tracked_clients(&self) -> usize;

    fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_at(&self, _key: &str, _now: Instant) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn sweep_at(&self, _now: Instant) -> usize {
        0
    }

    fn tracked_clients(&self) -> usize {
        0
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Token bucket per client: capacity and burst are both `requests_per_minute`,
/// refilled continuously at `requests_per_minute / 60` tokens per second.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_second: f64,
    idle_threshold: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    #[must_use]
    pub fn new(requests_per_minute: u32, idle_threshold: Duration) -> Self {
        let capacity = f64::from(requests_per_minute.max(1));
        Self {
            capacity,
            refill_per_second: capacity / 60.0,
            idle_threshold,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        bucket.last_refill = bucket.last_refill.max(now);
        bucket.last_seen = bucket.last_seen.max(now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitDecision::Allowed
        } else {
            let missing = 1.0 - bucket.tokens;
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs_f64(missing / self.refill_per_second),
            }
        }
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= self.idle_threshold);
        before - buckets.len()
    }

    fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }
}

/// Periodically evict idle buckets.
pub fn spawn_sweeper(limiter: Arc<dyn RateLimiter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = limiter.sweep_at(Instant::now());
            if evicted > 0 {
                debug!(
                    evicted,
                    tracked = limiter.tracked_clients(),
                    "rate limiter sweep"
                );
            }
        }
    })
}

/// Derive the rate limit key for a request.
///
/// Forwarding headers are only honored when the deployment sits behind a
/// trusted proxy; otherwise any client could pick its own bucket.
#[must_use]
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .and_then(|value| value.parse::<IpAddr>().ok());
        let real_ip = || {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .and_then(|value| value.parse::<IpAddr>().ok())
        };
        if let Some(ip) = forwarded.or_else(real_ip) {
            return ip.to_string();
        }
    }

    peer.map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.ip().to_string())
}

/// Middleware: reject requests to limited routes once the client's bucket is empty.
///
/// # Errors
/// Returns `RateLimitExceeded` with a retry hint.
pub async fn enforce(
    Extension(state): Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let limited = request
        .extensions()
        .get::<MatchedPath>()
        .is_some_and(|path| state.rate_limit_config().is_limited(path.as_str()));
    if !limited {
        return Ok(next.run(request).await);
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let key = client_key(
        request.headers(),
        peer,
        state.rate_limit_config().trust_proxy_headers(),
    );

    match state.rate_limiter().check(&key) {
        RateLimitDecision::Allowed => Ok(next.run(request).await),
        RateLimitDecision::Limited { retry_after } => {
            warn!(client = %key, path = %request.uri().path(), "rate limit exceeded");
            Err(AuthError::RateLimitExceeded {
                retry_after_secs: retry_after.as_secs_f64().ceil().max(1.0) as u64,
            })
        }
    }
}
