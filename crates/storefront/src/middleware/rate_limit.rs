//! Rate limiting.
//!
//! Two limiters share one notion of client identity ([`client_ip`]):
//! - [`RateLimiter`]: sliding-window limit over the whole JSON API
//!   (100 requests per 15 minutes per client by default), backed by a
//!   [`RateLimitStore`]
//! - [`auth_rate_limiter`]: `tower_governor` token bucket for the sign-in
//!   endpoint (~10/min)

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::QuantaInstant;
use governor::middleware::NoOpMiddleware;
use moka::future::Cache;
use tower_governor::{GovernorError, GovernorLayer, governor::GovernorConfigBuilder};

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::state::AppState;

/// Key shared by every request that carries no client address.
pub const UNKNOWN_CLIENT: &str = "unknown";

const DEFAULT_MAX_KEYS: u64 = 100_000;

// =============================================================================
// Client identity
// =============================================================================

/// Resolve the client IP from proxy headers.
///
/// Checks Cloudflare's `CF-Connecting-IP` first, then the first hop of
/// `X-Forwarded-For`, then `X-Real-IP` and Fly.io's `Fly-Client-IP`.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header("cf-connecting-ip")
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse().ok())
        })
        .or_else(|| header("x-real-ip").and_then(|s| s.trim().parse().ok()))
        .or_else(|| header("fly-client-ip").and_then(|s| s.trim().parse().ok()))
}

/// Rate-limit key for a request.
#[must_use]
pub fn client_key(headers: &HeaderMap) -> String {
    client_ip(headers).map_or_else(|| UNKNOWN_CLIENT.to_string(), |ip| ip.to_string())
}

// =============================================================================
// Sliding window
// =============================================================================

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests still available in the current window.
    pub remaining: usize,
    /// Time until the oldest recorded request leaves the window. Zero when allowed.
    pub retry_after: Duration,
}

/// Storage for per-client request timestamps.
///
/// Implement this over a shared store to enforce one limit across several
/// server instances.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Prune timestamps older than `window`, then record `now` if fewer than
    /// `limit` remain. Denied requests are not recorded.
    async fn hit(&self, key: &str, now: Instant, limit: usize, window: Duration)
    -> RateLimitDecision;
}

/// In-process store. Keys idle for a full window are evicted, and the number
/// of tracked clients is bounded.
pub struct MokaRateLimitStore {
    windows: Cache<String, Arc<Mutex<VecDeque<Instant>>>>,
}

impl MokaRateLimitStore {
    #[must_use]
    pub fn new(window: Duration, max_keys: u64) -> Self {
        Self {
            windows: Cache::builder()
                .max_capacity(max_keys)
                .time_to_idle(window)
                .build(),
        }
    }

    /// Number of clients currently tracked.
    pub async fn tracked_clients(&self) -> u64 {
        self.windows.run_pending_tasks().await;
        self.windows.entry_count()
    }
}

#[async_trait]
impl RateLimitStore for MokaRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        now: Instant,
        limit: usize,
        window: Duration,
    ) -> RateLimitDecision {
        let entry = self
            .windows
            .get_with_by_ref(key, async { Arc::new(Mutex::new(VecDeque::new())) })
            .await;
        let mut timestamps = entry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        slide(&mut timestamps, now, limit, window)
    }
}

/// Apply the sliding-window rule to one client's timestamps.
fn slide(
    timestamps: &mut VecDeque<Instant>,
    now: Instant,
    limit: usize,
    window: Duration,
) -> RateLimitDecision {
    while timestamps
        .front()
        .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= window)
    {
        timestamps.pop_front();
    }

    if timestamps.len() >= limit {
        let retry_after = timestamps.front().map_or(Duration::ZERO, |oldest| {
            window.saturating_sub(now.saturating_duration_since(*oldest))
        });
        return RateLimitDecision {
            allowed: false,
            remaining: 0,
            retry_after,
        };
    }

    timestamps.push_back(now);
    RateLimitDecision {
        allowed: true,
        remaining: limit - timestamps.len(),
        retry_after: Duration::ZERO,
    }
}

/// Sliding-window limiter over a [`RateLimitStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Limiter over the in-process store.
    #[must_use]
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::with_store(
            Arc::new(MokaRateLimitStore::new(config.window, DEFAULT_MAX_KEYS)),
            config,
        )
    }

    #[must_use]
    pub fn with_store(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Check and record a request for `key` now.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now()).await
    }

    /// Check and record a request for `key` at an explicit instant.
    pub async fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        self.store
            .hit(key, now, self.config.max_requests, self.config.window)
            .await
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

/// Middleware enforcing the API rate limit.
///
/// Denied requests get 429 with a `Retry-After` header and never reach the
/// handler.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(request.headers());
    let decision = state.rate_limiter().check(&key).await;

    if !decision.allowed {
        tracing::warn!(
            client = %key,
            path = %request.uri().path(),
            retry_after_secs = decision.retry_after.as_secs(),
            "Rate limit exceeded"
        );
        return AppError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into_response();
    }

    next.run(request).await
}

// =============================================================================
// Sign-in limiter (tower_governor)
// =============================================================================

/// Key extractor for `tower_governor` using [`client_ip`].
///
/// Requests without a client address share one bucket.
#[derive(Clone, Copy)]
pub struct ClientIpKeyExtractor;

impl tower_governor::key_extractor::KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &axum::http::Request<T>) -> Result<Self::Key, GovernorError> {
        Ok(client_ip(req.headers()).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
    }
}

/// Rate limiter layer type for Axum.
pub type RateLimiterLayer =
    GovernorLayer<ClientIpKeyExtractor, NoOpMiddleware<QuantaInstant>, axum::body::Body>;

/// Create rate limiter for sign-in: ~10 requests per minute per IP.
///
/// Configuration: 1 request every 6 seconds (replenish), burst of 5.
///
/// # Panics
///
/// This function will not panic. The configuration uses only valid positive
/// integers (`per_second(6)` and `burst_size(5)`), which are always accepted
/// by `GovernorConfigBuilder`.
#[must_use]
pub fn auth_rate_limiter() -> RateLimiterLayer {
    let config = GovernorConfigBuilder::default()
        .key_extractor(ClientIpKeyExtractor)
        .per_second(6)
        .burst_size(5)
        .finish()
        .expect("rate limiter config with per_second(6) and burst_size(5) is valid");
    GovernorLayer::new(Arc::new(config))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(15 * 60);

    fn limiter(max_requests: usize) -> RateLimiter {
        RateLimiter::in_memory(RateLimitConfig {
            max_requests,
            window: WINDOW,
        })
    }

    #[tokio::test]
    async fn test_hundred_and_first_request_denied() {
        let limiter = limiter(100);
        let start = Instant::now();

        for i in 0..100u64 {
            let decision = limiter
                .check_at("203.0.113.7", start + Duration::from_secs(i))
                .await;
            assert!(decision.allowed, "request {i} should pass");
        }

        let denied = limiter
            .check_at("203.0.113.7", start + Duration::from_secs(100))
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, WINDOW - Duration::from_secs(100));
    }

    #[tokio::test]
    async fn test_allowed_again_after_window() {
        let limiter = limiter(2);
        let start = Instant::now();

        assert!(limiter.check_at("k", start).await.allowed);
        assert!(limiter.check_at("k", start).await.allowed);
        assert!(!limiter.check_at("k", start + Duration::from_secs(1)).await.allowed);

        let later = limiter.check_at("k", start + WINDOW).await;
        assert!(later.allowed);
    }

    #[tokio::test]
    async fn test_denied_requests_are_not_recorded() {
        let limiter = limiter(1);
        let start = Instant::now();

        assert!(limiter.check_at("k", start).await.allowed);
        // Hammering while limited must not push the window forward.
        for s in 1..10 {
            assert!(!limiter.check_at("k", start + Duration::from_secs(s)).await.allowed);
        }
        assert!(limiter.check_at("k", start + WINDOW).await.allowed);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1);
        let now = Instant::now();
        assert!(limiter.check_at("a", now).await.allowed);
        assert!(limiter.check_at("b", now).await.allowed);
        assert!(!limiter.check_at("a", now).await.allowed);
    }

    #[tokio::test]
    async fn test_store_tracks_each_client_once() {
        let store = MokaRateLimitStore::new(WINDOW, 10);
        let now = Instant::now();
        store.hit("a", now, 5, WINDOW).await;
        store.hit("a", now, 5, WINDOW).await;
        store.hit("b", now, 5, WINDOW).await;
        assert_eq!(store.tracked_clients().await, 2);
    }

    #[test]
    fn test_slide_reports_remaining() {
        let mut timestamps = VecDeque::new();
        let now = Instant::now();
        let decision = slide(&mut timestamps, now, 3, WINDOW);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn test_client_ip_header_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), UNKNOWN_CLIENT);

        headers.insert("fly-client-ip", HeaderValue::from_static("10.0.0.4"));
        assert_eq!(client_key(&headers), "10.0.0.4");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.3"));
        assert_eq!(client_key(&headers), "10.0.0.3");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.2, 10.0.0.1"),
        );
        assert_eq!(client_key(&headers), "198.51.100.2");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(client_key(&headers), "203.0.113.9");
    }

    #[test]
    fn test_unparseable_header_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("not-an-ip"));
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.1"));
        assert_eq!(client_key(&headers), "192.0.2.1");
    }
}
