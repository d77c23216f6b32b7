//! Rate limit key construction.

/// A key naming the action being limited and who is performing it.
///
/// Rendered as `action:subject`, e.g. `auth:user@example.com`. The action is
/// everything before the first `:`, so subjects may contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey {
    key: String,
    action_len: usize,
}

impl LimitKey {
    /// Create a new key from an action and a subject.
    pub fn new(action: &str, subject: &str) -> Self {
        Self {
            key: format!("{}:{}", action, subject),
            action_len: action.len(),
        }
    }

    /// The action class (auth, quiz, feedback...).
    pub fn action(&self) -> &str {
        &self.key[..self.action_len]
    }

    /// The entity performing the action.
    pub fn subject(&self) -> &str {
        &self.key[self.action_len + 1..]
    }

    /// The string the limiter indexes by.
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for LimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

impl AsRef<str> for LimitKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}
