use std::time::{Duration, Instant};

/// Token bucket guarding a single connection.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tokens: u32,
    max_tokens: u32,
    refill_interval: Duration,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new() -> Self {
        // 30 message burst, one token back every 200ms
        Self::new_with_limits(30, Duration::from_millis(200))
    }

    pub fn new_with_limits(max_tokens: u32, refill_interval: Duration) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_interval,
            last_refill: Instant::now(),
        }
    }

    pub fn check_rate_limit(&mut self) -> bool {
        self.refill_tokens();

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill_tokens(&mut self) {
        let interval_ms = self.refill_interval.as_millis().max(1);
        let elapsed_ms = self.last_refill.elapsed().as_millis();
        let earned = elapsed_ms / interval_ms;
        if earned == 0 {
            return;
        }

        let earned = u32::try_from(earned).unwrap_or(u32::MAX);
        self.tokens = self.tokens.saturating_add(earned).min(self.max_tokens);
        // Keep the remainder so partial intervals still count
        self.last_refill += self.refill_interval * earned;
    }

    pub fn remaining_tokens(&mut self) -> u32 {
        self.refill_tokens();
        self.tokens
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
