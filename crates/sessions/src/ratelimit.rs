//! Token-bucket rate limiting per (session, method class).
//!
//! Every call consumes one token from the session's global bucket and
//! one from its method-class bucket. Buckets refill continuously at
//! their per-minute rate. A failed check reports how long the caller
//! should wait before the next token is available.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use i3_domain::config::LimitsConfig;

/// Coarse grouping of API methods for rate limiting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodClass {
    Tell,
    Channel,
    Who,
    Mudlist,
    Other,
}

impl MethodClass {
    /// Classify a JSON-RPC method name.
    pub fn of(method: &str) -> MethodClass {
        match method {
            "tell" | "emoteto" => MethodClass::Tell,
            "channel_send" | "channel_emote" | "channel_targeted" => MethodClass::Channel,
            "who" | "finger" | "locate" => MethodClass::Who,
            "mudlist" | "channel_list" => MethodClass::Mudlist,
            _ => MethodClass::Other,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token bucket
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, per_min: u32, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec: per_min as f64 / 60.0,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Try to take one token. On failure returns the wait in ms until a
    /// token will be available.
    fn take(&mut self, now: Instant) -> Result<(), u64> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - self.tokens;
        Err((deficit / self.refill_per_sec * 1_000.0).ceil() as u64)
    }

    /// Peek without consuming: would a take succeed soon?
    fn remaining(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-session limiter map
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionBuckets {
    global: TokenBucket,
    classes: HashMap<MethodClass, TokenBucket>,
}

/// Rate-limiter state for every session, keyed by session id.
pub struct RateLimiterMap {
    limits: LimitsConfig,
    buckets: Mutex<HashMap<String, SessionBuckets>>,
}

impl RateLimiterMap {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn class_bucket(&self, class: MethodClass, now: Instant) -> Option<TokenBucket> {
        let per_min = match class {
            MethodClass::Tell => self.limits.tell_per_min,
            MethodClass::Channel => self.limits.channel_per_min,
            MethodClass::Who => self.limits.who_per_min,
            MethodClass::Mudlist => self.limits.mudlist_per_min,
            MethodClass::Other => return None,
        };
        Some(TokenBucket::new(per_min, per_min, now))
    }

    /// Check (and consume) one call for the given session and method.
    ///
    /// On rejection returns the suggested `retry_after_ms`. A rejection
    /// consumes nothing.
    pub fn check(&self, session_id: &str, method: &str) -> Result<(), u64> {
        let now = Instant::now();
        let class = MethodClass::of(method);
        let mut map = self.buckets.lock();
        let buckets = map.entry(session_id.to_string()).or_insert_with(|| {
            SessionBuckets {
                global: TokenBucket::new(
                    self.limits.global_per_min + self.limits.global_burst,
                    self.limits.global_per_min,
                    now,
                ),
                classes: HashMap::new(),
            }
        });

        // Check the class bucket first without consuming from global.
        if class != MethodClass::Other {
            if !buckets.classes.contains_key(&class) {
                if let Some(bucket) = self.class_bucket(class, now) {
                    buckets.classes.insert(class, bucket);
                }
            }
            if let Some(bucket) = buckets.classes.get_mut(&class) {
                if bucket.remaining(now) < 1.0 {
                    return Err(bucket.take(now).unwrap_err());
                }
            }
        }

        buckets.global.take(now)?;
        if let Some(bucket) = buckets.classes.get_mut(&class) {
            bucket
                .take(now)
                .expect("class bucket had a token a moment ago");
        }
        Ok(())
    }

    /// Tokens left in the class bucket — used for `rate_limit_warning`
    /// events when a session is close to the limit.
    pub fn remaining(&self, session_id: &str, method: &str) -> Option<u32> {
        let now = Instant::now();
        let class = MethodClass::of(method);
        let mut map = self.buckets.lock();
        let buckets = map.get_mut(session_id)?;
        match class {
            MethodClass::Other => Some(buckets.global.remaining(now) as u32),
            class => buckets
                .classes
                .get_mut(&class)
                .map(|b| b.remaining(now) as u32),
        }
    }

    /// Drop limiter state for a closed session.
    pub fn remove(&self, session_id: &str) {
        self.buckets.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> LimitsConfig {
        LimitsConfig::default()
    }

    #[test]
    fn classifies_methods() {
        assert_eq!(MethodClass::of("tell"), MethodClass::Tell);
        assert_eq!(MethodClass::of("emoteto"), MethodClass::Tell);
        assert_eq!(MethodClass::of("channel_send"), MethodClass::Channel);
        assert_eq!(MethodClass::of("who"), MethodClass::Who);
        assert_eq!(MethodClass::of("mudlist"), MethodClass::Mudlist);
        assert_eq!(MethodClass::of("ping"), MethodClass::Other);
    }

    #[test]
    fn thirty_first_tell_is_rejected() {
        let map = RateLimiterMap::new(limits());
        for i in 0..30 {
            assert!(map.check("s1", "tell").is_ok(), "tell {i} should pass");
        }
        let retry = map.check("s1", "tell").unwrap_err();
        assert!(retry > 0, "retry_after_ms must be positive");
        // Roughly one token period: 60s / 30 per min = 2s.
        assert!(retry <= 2_100, "retry_after_ms {retry} too large");
    }

    #[test]
    fn sessions_do_not_share_buckets() {
        let map = RateLimiterMap::new(limits());
        for _ in 0..30 {
            map.check("s1", "tell").unwrap();
        }
        assert!(map.check("s1", "tell").is_err());
        assert!(map.check("s2", "tell").is_ok());
    }

    #[test]
    fn rejection_consumes_nothing_from_global() {
        let map = RateLimiterMap::new(limits());
        for _ in 0..30 {
            map.check("s1", "tell").unwrap();
        }
        // Tell bucket is dry; the global bucket keeps serving pings.
        assert!(map.check("s1", "tell").is_err());
        assert!(map.check("s1", "ping").is_ok());
    }

    #[test]
    fn mudlist_has_its_own_small_budget() {
        let map = RateLimiterMap::new(limits());
        for _ in 0..5 {
            map.check("s1", "mudlist").unwrap();
        }
        assert!(map.check("s1", "mudlist").is_err());
        assert!(map.check("s1", "who").is_ok());
    }

    #[test]
    fn remove_resets_state() {
        let map = RateLimiterMap::new(limits());
        for _ in 0..5 {
            map.check("s1", "mudlist").unwrap();
        }
        assert!(map.check("s1", "mudlist").is_err());
        map.remove("s1");
        assert!(map.check("s1", "mudlist").is_ok());
    }
}
