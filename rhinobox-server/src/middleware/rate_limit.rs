//! Per-key (IP + endpoint) token bucket rate limiter. Bucket size =
//! `requests + burst`; refill rate = `requests / window`. A background
//! sweeper evicts buckets idle for `2 * window` every 5 minutes, and stops
//! on shutdown (the `AbortHandle` is dropped along with the server task).

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use rhinobox_core::config::RateLimitConfig;

use crate::app_state::SharedState;
use crate::error::facade_error;
use crate::net::client_ip;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub reset_secs: u64,
}

pub struct RateLimiter {
    buckets: DashMap<String, Mutex<Bucket>>,
    capacity: f64,
    refill_per_sec: f64,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        let window = cfg.window_secs.max(1);
        Self {
            buckets: DashMap::new(),
            capacity: (cfg.requests + cfg.burst) as f64,
            refill_per_sec: cfg.requests as f64 / window as f64,
            window_secs: window,
        }
    }

    pub fn check(&self, key: &str) -> Decision {
        let now = Instant::now();
        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Mutex::new(Bucket {
                    tokens: self.capacity,
                    last_refill: now,
                    last_seen: now,
                })
            });
        let mut bucket = entry.lock().unwrap();

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision {
                allowed: true,
                remaining: bucket.tokens.floor() as u32,
                limit: self.capacity as u32,
                reset_secs: self.window_secs,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait = (deficit / self.refill_per_sec).ceil().max(1.0) as u64;
            Decision {
                allowed: false,
                remaining: 0,
                limit: self.capacity as u32,
                reset_secs: wait,
            }
        }
    }

    /// Removes buckets idle for longer than `2 * window`. Run periodically
    /// by a background task started in `main.rs`.
    pub fn sweep(&self) {
        let cutoff = Duration::from_secs(self.window_secs * 2);
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.lock().unwrap().last_seen) < cutoff);
    }
}

pub async fn rate_limit_middleware(
    State(state): State<SharedState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(req.headers(), connect_info)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("{ip}:{}", req.uri().path());

    let decision = state.rate_limiter.check(&key);
    let limit = decision.limit;
    let remaining = decision.remaining;
    let reset = decision.reset_secs;

    if !decision.allowed {
        let mut response = facade_error(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "rate limit exceeded".to_string(),
            None,
        );
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
        headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
        headers.insert("retry-after", HeaderValue::from(reset));
        return response;
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
    response
}
