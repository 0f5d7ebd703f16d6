use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use trailhead_store::RedisClient;

use crate::error::AppError;
use crate::state::AppState;

/// Bounded-window request counting keyed by client.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// `true` while `key` is within `limit` calls for the current window.
    async fn check(&self, key: &str, limit: i64, window_seconds: i64) -> anyhow::Result<bool>;
}

#[async_trait]
impl RateLimiter for RedisClient {
    async fn check(&self, key: &str, limit: i64, window_seconds: i64) -> anyhow::Result<bool> {
        Ok(self.check_rate_limit(key, limit, window_seconds).await?)
    }
}

/// Fixed windows held in process memory, for a single instance.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, (Instant, i64)>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str, limit: i64, window_seconds: i64) -> anyhow::Result<bool> {
        let window = Duration::from_secs(window_seconds.max(1) as u64);
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        // Drop windows that have run out
        windows.retain(|_, (started, _)| now.duration_since(*started) < window);

        let (_, count) = windows.entry(key.to_string()).or_insert((now, 0));
        *count += 1;
        Ok(*count <= limit)
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return Ok(next.run(req).await);
    };

    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("ratelimit:{}", ip);

    match limiter
        .check(&key, state.rate_limit.requests, state.rate_limit.window_seconds)
        .await
    {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => Err(AppError::RateLimited),
        Err(e) => {
            // Fail open
            tracing::warn!(error = %e, "rate limiter unavailable");
            Ok(next.run(req).await)
        }
    }
}
