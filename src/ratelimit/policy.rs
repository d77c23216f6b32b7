//! Rate limit policies and named policy sets.
//!
//! A policy is passed to the limiter on every call, so one limiter instance
//! can serve several action classes. Named policies can be loaded from YAML
//! and are validated when loaded; the limiter itself never rejects a policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::clock::duration_millis;
use crate::error::{GuardrailError, Result};

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Limits applied to one action class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Attempts allowed per window
    pub max_attempts: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Cooldown applied once the window overflows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_duration_ms: Option<u64>,
}

impl RateLimitPolicy {
    /// 5 attempts per 15 minutes, then a 15 minute block.
    pub const AUTH_ATTEMPTS: Self = Self {
        max_attempts: 5,
        window_ms: 15 * MINUTE_MS,
        block_duration_ms: Some(15 * MINUTE_MS),
    };

    /// 100 submissions per hour.
    pub const QUIZ_SUBMISSIONS: Self = Self {
        max_attempts: 100,
        window_ms: HOUR_MS,
        block_duration_ms: None,
    };

    /// 3 feedback submissions per hour.
    pub const FEEDBACK_SUBMISSIONS: Self = Self {
        max_attempts: 3,
        window_ms: HOUR_MS,
        block_duration_ms: None,
    };

    /// 3 password resets per hour.
    pub const PASSWORD_RESET: Self = Self {
        max_attempts: 3,
        window_ms: HOUR_MS,
        block_duration_ms: None,
    };

    /// Create a policy without a cooldown.
    pub const fn new(max_attempts: u32, window_ms: u64) -> Self {
        Self {
            max_attempts,
            window_ms,
            block_duration_ms: None,
        }
    }

    /// Set or clear the cooldown.
    pub const fn with_block_duration_ms(mut self, block_duration_ms: Option<u64>) -> Self {
        self.block_duration_ms = block_duration_ms;
        self
    }

    /// Build a policy from durations. Millisecond counts saturate at `u64::MAX`.
    pub fn from_durations(max_attempts: u32, window: Duration, block: Option<Duration>) -> Self {
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            max_attempts,
            window_ms: millis(window),
            block_duration_ms: block.map(millis),
        }
    }

    /// The window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// The cooldown as a duration, if any.
    pub fn block_duration(&self) -> Option<Duration> {
        self.block_duration_ms.map(Duration::from_millis)
    }

    pub(crate) fn window_millis(&self) -> i64 {
        duration_millis(self.window())
    }

    /// A zero cooldown counts as no cooldown.
    pub(crate) fn block_duration_millis(&self) -> Option<i64> {
        self.block_duration()
            .filter(|d| !d.is_zero())
            .map(duration_millis)
    }

    /// Check the policy is usable. `name` is only used in the error.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(GuardrailError::Config(format!(
                "policy '{}': max_attempts must be greater than zero",
                name
            )));
        }
        if self.window_ms == 0 {
            return Err(GuardrailError::Config(format!(
                "policy '{}': window_ms must be greater than zero",
                name
            )));
        }
        if self.block_duration_ms == Some(0) {
            return Err(GuardrailError::Config(format!(
                "policy '{}': block_duration_ms must be greater than zero when set",
                name
            )));
        }
        Ok(())
    }
}

/// Well-known policy names.
pub mod names {
    pub const AUTH_ATTEMPTS: &str = "auth_attempts";
    pub const QUIZ_SUBMISSIONS: &str = "quiz_submissions";
    pub const FEEDBACK_SUBMISSIONS: &str = "feedback_submissions";
    pub const PASSWORD_RESET: &str = "password_reset";
}

/// A set of named policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    /// Map of policy name to policy
    #[serde(default)]
    pub policies: BTreeMap<String, RateLimitPolicy>,
}

impl PolicySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The predefined policies.
    pub fn builtin() -> Self {
        let mut set = Self::new();
        set.insert(names::AUTH_ATTEMPTS, RateLimitPolicy::AUTH_ATTEMPTS);
        set.insert(names::QUIZ_SUBMISSIONS, RateLimitPolicy::QUIZ_SUBMISSIONS);
        set.insert(names::FEEDBACK_SUBMISSIONS, RateLimitPolicy::FEEDBACK_SUBMISSIONS);
        set.insert(names::PASSWORD_RESET, RateLimitPolicy::PASSWORD_RESET);
        set
    }

    /// Add or replace a policy.
    pub fn insert(&mut self, name: &str, policy: RateLimitPolicy) {
        self.policies.insert(name.to_string(), policy);
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&RateLimitPolicy> {
        self.policies.get(name)
    }

    /// Load a policy set from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a policy set from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set: PolicySet = serde_yaml::from_str(yaml).map_err(|e| {
            GuardrailError::Config(format!("Failed to parse rate limit policies: {}", e))
        })?;

        for (name, policy) in &set.policies {
            policy.validate(name)?;
        }

        Ok(set)
    }

    /// Overlay `other` on top of this set; policies in `other` win.
    pub fn merged_with(mut self, other: PolicySet) -> Self {
        self.policies.extend(other.policies);
        self
    }

    /// Number of policies in the set.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_policies() {
        let set = PolicySet::builtin();
        assert_eq!(set.len(), 4);

        let auth = set.get(names::AUTH_ATTEMPTS).unwrap();
        assert_eq!(auth.max_attempts, 5);
        assert_eq!(auth.window(), Duration::from_secs(15 * 60));
        assert_eq!(auth.block_duration(), Some(Duration::from_secs(15 * 60)));

        let quiz = set.get(names::QUIZ_SUBMISSIONS).unwrap();
        assert_eq!(quiz.max_attempts, 100);
        assert_eq!(quiz.block_duration(), None);

        for policy in set.policies.values() {
            assert!(policy.validate("builtin").is_ok());
        }
    }

    #[test]
    fn test_parse_policy_file() {
        let yaml = r#"
policies:
  comment_posts:
    max_attempts: 10
    window_ms: 60000
  auth_attempts:
    max_attempts: 3
    window_ms: 600000
    block_duration_ms: 1800000
"#;
        let set = PolicySet::from_yaml(yaml).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("comment_posts"), Some(&RateLimitPolicy::new(10, 60_000)));
        assert_eq!(
            set.get("auth_attempts").unwrap().block_duration_ms,
            Some(1_800_000)
        );
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let yaml = r#"
policies:
  broken:
    max_attempts: 0
    window_ms: 1000
"#;
        let err = PolicySet::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, GuardrailError::Config(_)));
        assert!(err.to_string().contains("broken"));

        let yaml = r#"
policies:
  no_window:
    max_attempts: 2
    window_ms: 0
"#;
        assert!(PolicySet::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let err = PolicySet::from_yaml("policies: [1, 2").unwrap_err();
        assert!(matches!(err, GuardrailError::Config(_)));
    }

    #[test]
    fn test_merge_overrides_builtin() {
        let overrides = PolicySet::from_yaml(
            r#"
policies:
  feedback_submissions:
    max_attempts: 10
    window_ms: 3600000
"#,
        )
        .unwrap();

        let set = PolicySet::builtin().merged_with(overrides);
        assert_eq!(set.len(), 4);
        assert_eq!(set.get(names::FEEDBACK_SUBMISSIONS).unwrap().max_attempts, 10);
        assert_eq!(set.get(names::PASSWORD_RESET).unwrap().max_attempts, 3);
    }

    #[test]
    fn test_from_durations() {
        let policy = RateLimitPolicy::from_durations(
            5,
            Duration::from_secs(15 * 60),
            Some(Duration::from_secs(15 * 60)),
        );
        assert_eq!(policy, RateLimitPolicy::AUTH_ATTEMPTS);
    }

    #[test]
    fn test_from_durations_saturates() {
        let policy = RateLimitPolicy::from_durations(1, Duration::MAX, Some(Duration::MAX));
        assert_eq!(policy.window_ms, u64::MAX);
        assert_eq!(policy.block_duration_ms, Some(u64::MAX));
        assert_eq!(policy.window_millis(), i64::MAX);
    }

    #[test]
    fn test_zero_block_duration_means_no_block() {
        let policy = RateLimitPolicy::new(1, 1_000).with_block_duration_ms(Some(0));
        assert_eq!(policy.block_duration_millis(), None);
        assert!(policy.validate("p").is_err());
    }
}
