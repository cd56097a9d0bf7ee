//! Token bucket primitive used by the rate-limit controller.

use std::time::Duration;

use tokio::time::Instant;

/// Refilling token bucket.
///
/// Not internally synchronised: the controller updates all buckets
/// under one short critical section so a call either takes a permit
/// from every applicable bucket or from none.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate_per_minute: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket allowing `rate` operations per minute, starting full.
    pub fn per_minute(rate: u32) -> Self {
        let rate = rate.max(1) as f64;
        Self {
            tokens: rate,
            capacity: rate,
            rate_per_minute: rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed > Duration::ZERO {
            self.tokens =
                (self.tokens + elapsed.as_secs_f64() * self.rate_per_minute / 60.0).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Whether a permit is available right now (after refill).
    pub fn available(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= 1.0
    }

    /// Consume one permit. Caller must have checked `available`.
    pub fn take(&mut self) {
        self.tokens -= 1.0;
    }

    /// Time until the next permit becomes available.
    pub fn next_available(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit * 60.0 / self.rate_per_minute)
    }

    /// Retune the refill rate, keeping accumulated tokens (clamped to
    /// the new capacity).
    pub fn set_rate_per_minute(&mut self, rate: f64) {
        let rate = rate.max(1.0);
        self.rate_per_minute = rate;
        self.capacity = rate;
        self.tokens = self.tokens.min(self.capacity);
    }

    pub fn rate_per_minute(&self) -> f64 {
        self.rate_per_minute
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bucket_starts_full_and_exhausts() {
        let mut bucket = TokenBucket::per_minute(3);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(bucket.available(now));
            bucket.take();
        }
        assert!(!bucket.available(now));
        assert!(bucket.next_available(now) > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_over_time() {
        let mut bucket = TokenBucket::per_minute(60); // one per second
        let now = Instant::now();
        for _ in 0..60 {
            bucket.take();
        }
        assert!(!bucket.available(now));

        tokio::time::advance(Duration::from_secs(2)).await;
        let later = Instant::now();
        assert!(bucket.available(later));
    }

    #[tokio::test(start_paused = true)]
    async fn retune_clamps_tokens() {
        let mut bucket = TokenBucket::per_minute(20);
        bucket.set_rate_per_minute(5.0);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(bucket.available(now));
            bucket.take();
        }
        assert!(!bucket.available(now));
    }
}
