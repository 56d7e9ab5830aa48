//! Per-host rate limiting for page fetches

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::time::Duration;
use tracing::trace;

/// Rate limiter keyed by host name
pub struct HostRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl HostRateLimiter {
    /// Create a limiter allowing `requests_per_second` requests to each host
    pub fn new(requests_per_second: f64) -> Self {
        let quota = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Quota::with_period(Duration::from_secs_f64(1.0 / requests_per_second))
        } else {
            None
        }
        .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)));

        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Wait until the next request to `host` is allowed
    pub async fn wait(&self, host: &str) {
        trace!("Rate limiting request to {}", host);
        self.limiter.until_key_ready(&host.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_same_host_is_spaced() {
        // 10 req/s = 100ms between requests
        let limiter = HostRateLimiter::new(10.0);

        let start = Instant::now();
        limiter.wait("example.com").await;
        limiter.wait("example.com").await;
        limiter.wait("example.com").await;

        // 3 requests need at least 2 intervals
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        let limiter = HostRateLimiter::new(1.0);

        let start = Instant::now();
        limiter.wait("a.example.com").await;
        limiter.wait("b.example.com").await;
        limiter.wait("c.example.com").await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
