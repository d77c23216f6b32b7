//! The JSON envelope stored for every cache entry.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached value with its timestamps.
///
/// Serialized as `{"value": ..., "storedAt": ms, "expiresAt": ms | null}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,
    /// Epoch millis of the write
    pub stored_at: i64,
    /// Epoch millis from which the entry is expired, `None` for never
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl<T> CacheEntry<T> {
    /// Wrap `value` with its timestamps.
    pub fn new(value: T, stored_at: i64, expires_at: Option<i64>) -> Self {
        Self {
            value,
            stored_at,
            expires_at,
        }
    }

    /// An entry is expired from its expiry instant onwards.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

impl<T: Serialize> CacheEntry<T> {
    /// Encode the envelope.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    /// Decode an envelope, failing if `value` does not fit `T`.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Envelope with the value left untyped, for scans that only care about
/// timestamps.
pub type RawEntry = CacheEntry<Value>;

/// What a scan makes of a stored string without knowing the value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredState {
    /// An envelope that has not expired.
    Live,
    /// JSON whose `expiresAt` has passed.
    Expired,
    /// Valid JSON that is not an envelope. Sweeps leave it alone.
    Foreign,
    /// Not JSON at all.
    Corrupt,
}

impl StoredState {
    /// Classify `raw` at `now`.
    pub fn classify(raw: &str, now: i64) -> Self {
        let Ok(json) = serde_json::from_str::<Value>(raw) else {
            return StoredState::Corrupt;
        };
        if matches!(json.get("expiresAt").and_then(Value::as_i64), Some(at) if now >= at) {
            return StoredState::Expired;
        }
        match serde_json::from_value::<RawEntry>(json) {
            Ok(_) => StoredState::Live,
            Err(_) => StoredState::Foreign,
        }
    }

    /// Whether a sweep removes entries in this state.
    pub fn is_stale(&self) -> bool {
        matches!(self, StoredState::Expired | StoredState::Corrupt)
    }
}
