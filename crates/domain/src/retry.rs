//! Backoff strategies for reconnects and retried upstream calls.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How successive retry delays grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// base * 2^attempt, full jitter.
    #[default]
    Exponential,
    /// base * (attempt + 1).
    Linear,
    /// base * fib(attempt).
    Fibonacci,
    /// AWS-style decorrelated jitter: random(base, prev * 3).
    DecorrelatedJitter,
}

/// Stateful delay generator. `next_delay` advances the attempt counter;
/// `reset` rewinds after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: RetryStrategy,
    base: Duration,
    cap: Duration,
    attempt: u32,
    prev: Duration,
}

impl Backoff {
    pub fn new(strategy: RetryStrategy, base: Duration, cap: Duration) -> Self {
        Self {
            strategy,
            base,
            cap,
            attempt: 0,
            prev: base,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.prev = self.base;
    }

    /// Compute the delay for the current attempt and advance the counter.
    pub fn next_delay(&mut self) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let cap_ms = self.cap.as_millis() as u64;
        let mut rng = rand::thread_rng();

        let raw_ms = match self.strategy {
            RetryStrategy::Exponential => {
                let ceiling = base_ms
                    .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX))
                    .min(cap_ms);
                // Full jitter: uniform in [0, ceiling].
                rng.gen_range(0..=ceiling.max(1))
            }
            RetryStrategy::Linear => base_ms.saturating_mul(self.attempt as u64 + 1).min(cap_ms),
            RetryStrategy::Fibonacci => {
                base_ms.saturating_mul(fib(self.attempt)).min(cap_ms)
            }
            RetryStrategy::DecorrelatedJitter => {
                let prev_ms = self.prev.as_millis() as u64;
                let upper = prev_ms.saturating_mul(3).clamp(base_ms + 1, cap_ms.max(base_ms + 1));
                rng.gen_range(base_ms..=upper)
            }
        };

        self.attempt = self.attempt.saturating_add(1);
        self.prev = Duration::from_millis(raw_ms.min(cap_ms));
        self.prev
    }
}

fn fib(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}
