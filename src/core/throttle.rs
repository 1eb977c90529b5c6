//! Per-user token bucket shared by the recurring worker and transaction creation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Allows each user `capacity` items per `period`, refilled continuously.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<i64, Bucket>>,
}

impl RateLimiter {
    /// A limiter granting `capacity` items per `period` to every user.
    #[must_use]
    pub fn new(capacity: u32, period: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let period = period.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_per_sec: capacity / period,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one token for `user_id`.
    ///
    /// # Errors
    /// Returns how long to wait before a token will be available.
    pub fn try_acquire(&self, user_id: i64, now: Instant) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(user_id).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = elapsed
            .as_secs_f64()
            .mul_add(self.refill_per_sec, bucket.tokens)
            .min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defers_beyond_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.try_acquire(7, now).is_ok());
        }
        let wait = limiter.try_acquire(7, now).unwrap_err();
        assert!(wait > Duration::from_secs(19) && wait <= Duration::from_secs(20));
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.try_acquire(1, now).is_ok());
        assert!(limiter.try_acquire(1, now).is_err());
        assert!(limiter.try_acquire(2, now).is_ok());
    }

    #[test]
    fn test_refills_over_time() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.try_acquire(1, start).is_ok());
        assert!(limiter.try_acquire(1, start).is_ok());
        assert!(limiter.try_acquire(1, start).is_err());

        // One token every five seconds
        assert!(limiter.try_acquire(1, start + Duration::from_secs(5)).is_ok());
        assert!(limiter.try_acquire(1, start + Duration::from_secs(5)).is_err());

        // Never more than capacity, however long we wait
        let later = start + Duration::from_secs(3600);
        assert!(limiter.try_acquire(1, later).is_ok());
        assert!(limiter.try_acquire(1, later).is_ok());
        assert!(limiter.try_acquire(1, later).is_err());
    }
}
