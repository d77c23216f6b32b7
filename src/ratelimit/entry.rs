//! Per-key rate limit state.

use std::time::Duration;

use super::policy::RateLimitPolicy;
use crate::clock::until;

/// Attempt tracking for a single key.
///
/// The window is reset lazily: nothing sweeps entries in the background, the
/// next attempt after `window_reset_at` starts a fresh window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Attempts observed in the current window
    pub count: u32,
    /// Epoch millis at which the current window lapses
    pub window_reset_at: i64,
    /// Epoch millis until which every attempt is rejected
    pub blocked_until: Option<i64>,
}

impl RateLimitEntry {
    /// Start a fresh window at `now` containing one attempt.
    pub fn fresh(now: i64, policy: &RateLimitPolicy) -> Self {
        Self {
            count: 1,
            window_reset_at: now.saturating_add(policy.window_millis()),
            blocked_until: None,
        }
    }

    /// Whether the cooldown is still running at `now`.
    pub fn is_blocked(&self, now: i64) -> bool {
        matches!(self.blocked_until, Some(at) if now < at)
    }

    /// Whether `count` still describes the window containing `now`.
    pub fn is_window_live(&self, now: i64) -> bool {
        now < self.window_reset_at
    }

    /// Record one more attempt in the live window.
    ///
    /// Returns `true` if the attempt stays within `max_attempts`. On overflow
    /// the block is armed when the policy has one. The count saturates at
    /// `max_attempts + 1`.
    pub fn record_attempt(&mut self, now: i64, policy: &RateLimitPolicy) -> bool {
        let ceiling = policy.max_attempts.saturating_add(1);
        self.count = self.count.saturating_add(1).min(ceiling);

        if self.count > policy.max_attempts {
            if let Some(block) = policy.block_duration_millis() {
                self.blocked_until = Some(now.saturating_add(block));
            }
            return false;
        }

        true
    }

    /// Attempts left in the live window.
    pub fn remaining(&self, policy: &RateLimitPolicy) -> u32 {
        policy.max_attempts.saturating_sub(self.count)
    }

    /// Time left on the cooldown, zero if none.
    pub fn block_remaining(&self, now: i64) -> Duration {
        self.blocked_until
            .map(|at| until(at, now))
            .unwrap_or(Duration::ZERO)
    }

    /// Time until the current window lapses.
    pub fn window_remaining(&self, now: i64) -> Duration {
        until(self.window_reset_at, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: u32, block: Option<u64>) -> RateLimitPolicy {
        RateLimitPolicy::new(max, 1_000).with_block_duration_ms(block)
    }

    #[test]
    fn test_fresh_entry() {
        let entry = RateLimitEntry::fresh(500, &policy(3, None));
        assert_eq!(entry.count, 1);
        assert_eq!(entry.window_reset_at, 1_500);
        assert!(entry.blocked_until.is_none());
        assert!(entry.is_window_live(1_499));
        assert!(!entry.is_window_live(1_500));
    }

    #[test]
    fn test_record_attempt_within_limit() {
        let p = policy(3, None);
        let mut entry = RateLimitEntry::fresh(0, &p);

        assert!(entry.record_attempt(10, &p));
        assert!(entry.record_attempt(20, &p));
        assert_eq!(entry.remaining(&p), 0);
        assert!(!entry.record_attempt(30, &p));
    }

    #[test]
    fn test_overflow_arms_block() {
        let p = policy(1, Some(5_000));
        let mut entry = RateLimitEntry::fresh(0, &p);

        assert!(!entry.record_attempt(100, &p));
        assert_eq!(entry.blocked_until, Some(5_100));
        assert!(entry.is_blocked(5_099));
        assert!(!entry.is_blocked(5_100));
        assert_eq!(entry.block_remaining(5_000), Duration::from_millis(100));
    }

    #[test]
    fn test_count_saturates_past_limit() {
        let p = policy(2, None);
        let mut entry = RateLimitEntry::fresh(0, &p);

        for _ in 0..50 {
            entry.record_attempt(1, &p);
        }
        assert_eq!(entry.count, 3);
        assert_eq!(entry.remaining(&p), 0);
    }

    #[test]
    fn test_zero_max_attempts_denies_after_first() {
        let p = policy(0, None);
        let mut entry = RateLimitEntry::fresh(0, &p);
        assert!(!entry.record_attempt(1, &p));
        assert_eq!(entry.count, 1);
    }
}
