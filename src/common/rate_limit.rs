//! Client-side request budget for exchange calls (GCRA via governor)

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// At most `requests` calls per `window`; clones share one budget
#[derive(Clone)]
pub struct RequestLimiter {
    limiter: Arc<DirectLimiter>,
    requests: u32,
    window: Duration,
}

impl RequestLimiter {
    pub fn new(requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        let period = (window / burst.get()).max(Duration::from_nanos(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            requests: burst.get(),
            window,
        }
    }

    /// Binance weights are per minute
    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(60))
    }

    /// Wait until the budget allows one more request
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a slot without waiting; false when the budget is spent
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for RequestLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimiter")
            .field("requests", &self.requests)
            .field("window", &self.window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_burst_is_capped() {
        let limiter = RequestLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_clones_share_budget() {
        let limiter = RequestLimiter::new(1, Duration::from_secs(60));
        let other = limiter.clone();
        assert!(limiter.try_acquire());
        assert!(!other.try_acquire());
    }

    #[test]
    fn test_acquire_pends_when_budget_spent() {
        let limiter = RequestLimiter::new(1, Duration::from_secs(60));

        let mut first = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_ready!(first.poll());

        let mut second = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_pending!(second.poll());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_replenishment() {
        let limiter = RequestLimiter::new(2, Duration::from_millis(200));
        let started = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        // Two from the burst, then one slot every 100ms
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
