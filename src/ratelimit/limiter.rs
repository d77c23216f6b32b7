//! Core rate limiter implementation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, trace};

use super::entry::RateLimitEntry;
use super::policy::RateLimitPolicy;
use crate::clock::{Clock, SystemClock};

/// Why an attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// A cooldown armed by an earlier overflow is still running.
    Blocked {
        /// Time left on the cooldown
        retry_after: Duration,
    },
    /// This attempt pushed the window past `max_attempts`.
    OverLimit {
        /// Time until attempts are accepted again
        retry_after: Duration,
    },
}

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The attempt was accepted.
    Allowed {
        /// Attempts left in the current window
        remaining: u32,
    },
    /// The attempt was rejected.
    Denied(DenyReason),
}

impl RateLimitDecision {
    /// Whether the attempt was accepted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }

    /// How long the caller should wait before trying again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitDecision::Allowed { .. } => None,
            RateLimitDecision::Denied(DenyReason::Blocked { retry_after })
            | RateLimitDecision::Denied(DenyReason::OverLimit { retry_after }) => {
                Some(*retry_after)
            }
        }
    }
}

/// Fixed-window rate limiter keyed by string.
///
/// The limiter is thread-safe and can be shared behind an `Arc`. Every check
/// runs as one transaction under the shard lock that owns the key, so
/// concurrent attempts on the same key never lose an increment.
pub struct RateLimiter<C: Clock = SystemClock> {
    /// Rate limit entries indexed by key
    entries: DashMap<String, RateLimitEntry>,
    clock: C,
}

impl RateLimiter<SystemClock> {
    /// Create a new rate limiter using the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a new rate limiter driven by `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Record an attempt for `key` and report whether it is allowed.
    pub fn is_allowed(&self, key: impl AsRef<str>, policy: &RateLimitPolicy) -> bool {
        self.check(key, policy).is_allowed()
    }

    /// Record an attempt for `key` and return the full decision.
    pub fn check(&self, key: impl AsRef<str>, policy: &RateLimitPolicy) -> RateLimitDecision {
        let key = key.as_ref();
        let now = self.clock.now_millis();

        trace!(
            key = %key,
            max_attempts = policy.max_attempts,
            window_ms = policy.window_ms,
            "Checking rate limit"
        );

        let decision = match self.entries.entry(key.to_owned()) {
            Entry::Vacant(vacant) => {
                let entry = RateLimitEntry::fresh(now, policy);
                let remaining = entry.remaining(policy);
                vacant.insert(entry);
                RateLimitDecision::Allowed { remaining }
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();

                if entry.is_blocked(now) {
                    RateLimitDecision::Denied(DenyReason::Blocked {
                        retry_after: entry.block_remaining(now),
                    })
                } else if !entry.is_window_live(now) {
                    *entry = RateLimitEntry::fresh(now, policy);
                    RateLimitDecision::Allowed {
                        remaining: entry.remaining(policy),
                    }
                } else if entry.record_attempt(now, policy) {
                    RateLimitDecision::Allowed {
                        remaining: entry.remaining(policy),
                    }
                } else {
                    let retry_after = if entry.is_blocked(now) {
                        entry.block_remaining(now)
                    } else {
                        entry.window_remaining(now)
                    };
                    RateLimitDecision::Denied(DenyReason::OverLimit { retry_after })
                }
            }
        };

        if let RateLimitDecision::Denied(reason) = decision {
            debug!(key = %key, reason = ?reason, "Rate limit exceeded");
        }

        decision
    }

    /// Attempts left for `key` in its current window. Does not record an attempt.
    pub fn remaining_attempts(&self, key: impl AsRef<str>, policy: &RateLimitPolicy) -> u32 {
        let now = self.clock.now_millis();
        match self.entries.get(key.as_ref()) {
            Some(entry) if entry.is_window_live(now) => entry.remaining(policy),
            _ => policy.max_attempts,
        }
    }

    /// Time left on the cooldown for `key`, zero if it is not blocked.
    pub fn block_time_remaining(&self, key: impl AsRef<str>) -> Duration {
        let now = self.clock.now_millis();
        self.entries
            .get(key.as_ref())
            .map(|entry| entry.block_remaining(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Snapshot of the entry for `key`.
    pub fn entry(&self, key: impl AsRef<str>) -> Option<RateLimitEntry> {
        self.entries.get(key.as_ref()).map(|e| e.value().clone())
    }

    /// Forget everything about `key`. Returns whether an entry existed.
    pub fn reset(&self, key: impl AsRef<str>) -> bool {
        self.entries.remove(key.as_ref()).is_some()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get the number of tracked keys.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for RateLimiter<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::LimitKey;
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    fn limiter() -> (RateLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new(START);
        (RateLimiter::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_first_attempt_creates_entry() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(3, 1_000);

        assert!(limiter.is_allowed("auth:a", &policy));
        assert_eq!(limiter.entry_count(), 1);

        let entry = limiter.entry("auth:a").unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.window_reset_at, START + 1_000);
        assert_eq!(limiter.remaining_attempts("auth:a", &policy), 2);
    }

    #[test]
    fn test_threshold_enforcement() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(5, 60_000);

        for i in 1..=5 {
            assert!(limiter.is_allowed("quiz:u1", &policy), "attempt {} should pass", i);
        }
        assert!(!limiter.is_allowed("quiz:u1", &policy));
        assert_eq!(limiter.remaining_attempts("quiz:u1", &policy), 0);
    }

    #[test]
    fn test_window_reset() {
        let (limiter, clock) = limiter();
        let policy = RateLimitPolicy::new(3, 1_000);

        assert!(limiter.is_allowed("k", &policy));
        assert!(limiter.is_allowed("k", &policy));

        clock.advance(Duration::from_millis(1_000));
        assert_eq!(limiter.remaining_attempts("k", &policy), 3);

        assert!(limiter.is_allowed("k", &policy));
        assert_eq!(limiter.entry("k").unwrap().count, 1);
        assert_eq!(limiter.remaining_attempts("k", &policy), 2);
    }

    #[test]
    fn test_overflow_without_block_recovers_on_next_window() {
        let (limiter, clock) = limiter();
        let policy = RateLimitPolicy::new(1, 1_000);

        assert!(limiter.is_allowed("k", &policy));
        let decision = limiter.check("k", &policy);
        assert_eq!(
            decision,
            RateLimitDecision::Denied(DenyReason::OverLimit {
                retry_after: Duration::from_millis(1_000)
            })
        );
        assert_eq!(limiter.block_time_remaining("k"), Duration::ZERO);

        clock.advance(Duration::from_millis(1_500));
        assert!(limiter.is_allowed("k", &policy));
    }

    #[test]
    fn test_auth_scenario_blocks_after_sixth_attempt() {
        let (limiter, clock) = limiter();
        let policy = RateLimitPolicy::AUTH_ATTEMPTS;
        let key = LimitKey::new("auth", "user@example.com");

        for _ in 0..5 {
            assert!(limiter.is_allowed(&key, &policy));
        }

        clock.advance(Duration::from_secs(60));
        let sixth = limiter.check(&key, &policy);
        assert!(!sixth.is_allowed());
        assert_eq!(
            limiter.entry(&key).unwrap().blocked_until,
            Some(START + 60_000 + 900_000)
        );

        // The block gates before the window check, even once the window lapses.
        clock.advance(Duration::from_secs(14 * 60));
        let seventh = limiter.check(&key, &policy);
        assert_eq!(
            seventh,
            RateLimitDecision::Denied(DenyReason::Blocked {
                retry_after: Duration::from_secs(60)
            })
        );
        assert_eq!(limiter.block_time_remaining(&key), Duration::from_secs(60));

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.block_time_remaining(&key), Duration::ZERO);
        assert!(limiter.is_allowed(&key, &policy));
        assert_eq!(limiter.remaining_attempts(&key, &policy), 4);
    }

    #[test]
    fn test_blocked_calls_do_not_extend_block() {
        let (limiter, clock) = limiter();
        let policy = RateLimitPolicy::new(1, 10_000).with_block_duration_ms(Some(2_000));

        assert!(limiter.is_allowed("k", &policy));
        assert!(!limiter.is_allowed("k", &policy));

        for _ in 0..5 {
            clock.advance(Duration::from_millis(300));
            assert!(!limiter.is_allowed("k", &policy));
        }
        assert_eq!(limiter.block_time_remaining("k"), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_max_attempts_is_degenerate_not_fatal() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(0, 1_000);

        assert!(limiter.is_allowed("k", &policy));
        assert!(!limiter.is_allowed("k", &policy));
        assert!(!limiter.is_allowed("k", &policy));
        assert_eq!(limiter.remaining_attempts("k", &policy), 0);
    }

    #[test]
    fn test_remaining_attempts_is_read_only() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(3, 1_000);

        assert_eq!(limiter.remaining_attempts("nobody", &policy), 3);
        assert_eq!(limiter.block_time_remaining("nobody"), Duration::ZERO);
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(1, 1_000);

        assert!(limiter.is_allowed("feedback:a", &policy));
        assert!(!limiter.is_allowed("feedback:a", &policy));
        assert!(limiter.is_allowed("feedback:b", &policy));
    }

    #[test]
    fn test_reset_and_clear() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(1, 1_000);

        limiter.is_allowed("a", &policy);
        limiter.is_allowed("a", &policy);
        limiter.is_allowed("b", &policy);

        assert!(limiter.reset("a"));
        assert!(!limiter.reset("a"));
        assert!(limiter.is_allowed("a", &policy));

        limiter.clear();
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_concurrent_attempts_on_one_key() {
        let limiter = Arc::new(RateLimiter::with_clock(ManualClock::new(START)));
        let policy = RateLimitPolicy::new(50, 60_000);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..25).filter(|_| limiter.is_allowed("shared", &policy)).count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
        assert_eq!(limiter.entry("shared").unwrap().count, 51);
    }
}
