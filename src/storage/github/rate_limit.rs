//! Request budget for the GitHub client.
//!
//! A governor token bucket enforces the configured hourly budget locally;
//! the `x-ratelimit-*` headers of every response tighten it further when
//! the server reports the budget exhausted before our bucket is.

use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::errors::{Result, StorageError};

const FALLBACK_REQUESTS_PER_HOUR: NonZeroU32 = NonZeroU32::MIN.saturating_add(4_999);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ServerBudget {
    remaining: u64,
    reset_at: DateTime<Utc>,
}

pub struct RateBudget {
    limiter: DefaultDirectRateLimiter,
    server: Mutex<Option<ServerBudget>>,
    config: RateLimitConfig,
}

impl RateBudget {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_hour = NonZeroU32::new(config.requests_per_hour).unwrap_or(FALLBACK_REQUESTS_PER_HOUR);
        Self {
            limiter: RateLimiter::direct(Quota::per_hour(per_hour)),
            server: Mutex::new(None),
            config: config.clone(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Waits for a token. Fails fast with `RateLimit` when the server says
    /// the budget is gone for longer than the maximum backoff.
    pub async fn acquire(&self) -> Result<()> {
        if let Some(wait) = self.server_wait(Utc::now()) {
            let cap = Duration::from_millis(self.config.max_backoff_ms);
            if wait > cap {
                return Err(StorageError::RateLimit(format!(
                    "GitHub budget exhausted, resets in {}s",
                    wait.as_secs()
                )));
            }
            debug!(wait_ms = wait.as_millis() as u64, "waiting for GitHub budget reset");
            tokio::time::sleep(wait).await;
        }
        self.limiter.until_ready().await;
        Ok(())
    }

    fn server_wait(&self, now: DateTime<Utc>) -> Option<Duration> {
        let budget = (*self.server.lock().unwrap_or_else(PoisonError::into_inner))?;
        if budget.remaining > 0 || budget.reset_at <= now {
            return None;
        }
        (budget.reset_at - now).to_std().ok()
    }

    /// Records the server's view of the budget.
    pub fn observe(&self, headers: &HeaderMap) {
        let remaining = header_u64(headers, "x-ratelimit-remaining");
        let reset = header_u64(headers, "x-ratelimit-reset")
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        if let (Some(remaining), Some(reset_at)) = (remaining, reset) {
            if remaining == 0 {
                warn!(reset_at = %reset_at, "GitHub rate limit exhausted");
            }
            *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(ServerBudget {
                remaining,
                reset_at,
            });
        }
    }

    /// Exponential backoff for the given retry attempt (0-based), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .config
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Delay for a rate-limited response: `retry-after`, then the reset
    /// header, then plain backoff. Never longer than the maximum backoff.
    pub fn retry_delay(&self, headers: &HeaderMap, attempt: u32) -> Duration {
        let cap = Duration::from_millis(self.config.max_backoff_ms);
        if let Some(secs) = header_u64(headers, "retry-after") {
            return Duration::from_secs(secs).min(cap);
        }
        if header_u64(headers, "x-ratelimit-remaining") == Some(0)
            && let Some(wait) = self.server_wait(Utc::now())
        {
            return wait.min(cap);
        }
        self.backoff(attempt)
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// 403/429 responses that GitHub uses to signal throttling.
pub fn is_rate_limited(status: u16, headers: &HeaderMap) -> bool {
    status == 429
        || (status == 403
            && (header_u64(headers, "x-ratelimit-remaining") == Some(0)
                || headers.contains_key("retry-after")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            requests_per_hour: 100,
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let budget = RateBudget::new(&config());
        assert_eq!(budget.backoff(0), Duration::from_millis(100));
        assert_eq!(budget.backoff(2), Duration::from_millis(400));
        assert_eq!(budget.backoff(10), Duration::from_millis(1_000));
        assert_eq!(budget.backoff(200), Duration::from_millis(1_000));
    }

    #[test]
    fn retry_after_wins_and_is_capped() {
        let budget = RateBudget::new(&config());
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));
        assert_eq!(budget.retry_delay(&headers, 0), Duration::from_millis(1_000));
    }

    #[test]
    fn detects_secondary_rate_limits() {
        let mut headers = HeaderMap::new();
        assert!(is_rate_limited(429, &headers));
        assert!(!is_rate_limited(403, &headers));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert!(is_rate_limited(403, &headers));
    }

    #[tokio::test]
    async fn exhausted_server_budget_fails_fast() {
        let budget = RateBudget::new(&config());
        let reset = (Utc::now() + chrono::Duration::hours(1)).timestamp().to_string();
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_str(&reset).unwrap());
        budget.observe(&headers);

        let err = budget.acquire().await.unwrap_err();
        assert!(matches!(err, StorageError::RateLimit(_)));
    }

    #[tokio::test]
    async fn healthy_budget_acquires() {
        let budget = RateBudget::new(&config());
        let reset = (Utc::now() + chrono::Duration::hours(1)).timestamp().to_string();
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4999"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_str(&reset).unwrap());
        budget.observe(&headers);
        budget.acquire().await.unwrap();
    }
}
