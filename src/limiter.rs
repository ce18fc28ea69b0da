// Token-bucket rate limiter shared by all probe modules.
//
// One outbound operation costs one token; tokens refill continuously at the
// configured rate (fractional refill from monotonic time deltas). The bucket
// state sits behind a mutex that is never held while sleeping, so waiters
// don't block each other. A rate of zero or below disables limiting.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Clone)]
pub struct RateLimiter {
    rate: f64,
    inner: Arc<Mutex<Bucket>>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `rate` operations per second.
    /// Capacity equals the rate; the first token is free.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            inner: Arc::new(Mutex::new(Bucket {
                tokens: 1.0,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Reserve one token, suspending until one is available.
    pub async fn acquire(&self) {
        if self.rate <= 0.0 {
            return;
        }

        loop {
            let wait = {
                let mut bucket = self.inner.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.rate.max(1.0));
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            // Sleep outside the lock, then re-check: another waiter may have
            // taken the token that became available in the meantime.
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::new(1.0);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn n_acquires_take_at_least_n_minus_one_over_rate() {
        let limiter = RateLimiter::new(10.0);
        let start = Instant::now();
        for _ in 0..6 {
            limiter.acquire().await;
        }
        // First token is free, the remaining five refill at 10/s.
        assert!(
            start.elapsed() >= Duration::from_millis(480),
            "expected >= ~500ms, got {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn zero_rate_disables_limiting() {
        let limiter = RateLimiter::new(0.0);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_all_make_progress() {
        let limiter = RateLimiter::new(50.0);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
