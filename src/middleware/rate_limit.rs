//! Per-customer fixed-window rate limiter.
//!
//! Counters live in process memory (atomic increment-and-check in a
//! DashMap), deliberately decoupled from the usage log so limiter
//! correctness does not depend on log durability.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::GatewayError;

struct Window {
    started_at: Instant,
    count: AtomicU64,
}

pub struct RateLimiter {
    windows: DashMap<Uuid, Window>,
    /// Calls per window. 0 disables limiting entirely.
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    /// Count one call against the customer's window. Returns
    /// `RateLimited` with a retry-after hint no larger than the time left
    /// in the current window.
    pub fn check(&self, customer_id: Uuid) -> Result<(), GatewayError> {
        if self.limit == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let mut entry = self.windows.entry(customer_id).or_insert_with(|| Window {
            started_at: now,
            count: AtomicU64::new(0),
        });

        // Stale window: start a fresh one.
        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count.store(0, Ordering::SeqCst);
        }

        let count = entry.count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.limit {
            let elapsed = now.duration_since(entry.started_at);
            let remaining = self.window.saturating_sub(elapsed);
            return Err(GatewayError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced_on_next_call() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        let customer = Uuid::new_v4();

        for _ in 0..100 {
            limiter.check(customer).unwrap();
        }
        let err = limiter.check(customer).unwrap_err();
        match err {
            GatewayError::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs <= 60);
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_customers_are_isolated() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        limiter.check(a).unwrap();
        limiter.check(a).unwrap();
        assert!(limiter.check(a).is_err());
        // b still has a full window
        limiter.check(b).unwrap();
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        let customer = Uuid::new_v4();

        limiter.check(customer).unwrap();
        assert!(limiter.check(customer).is_err());
        std::thread::sleep(Duration::from_millis(25));
        limiter.check(customer).unwrap();
    }

    #[test]
    fn test_zero_limit_disables() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        let customer = Uuid::new_v4();
        for _ in 0..1000 {
            limiter.check(customer).unwrap();
        }
    }
}
