//! Application-level cache helpers.
//!
//! Each helper fixes a key namespace and a TTL tier on top of
//! [`ExpiringCache`], so call sites never spell out prefixes or durations.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use super::expiring::{CacheReport, ExpiringCache, WriteOutcome};
use super::store::KeyValueStore;
use crate::clock::{Clock, SystemClock};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a class of data may be served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// Rarely changing data such as settings: one year.
    Static,
    /// Content that changes daily: one day.
    Dynamic,
    /// Responses from remote APIs: five minutes.
    ApiResponse,
}

impl CacheTier {
    /// Lifetime of entries in this tier.
    pub fn ttl(&self) -> Duration {
        match self {
            CacheTier::Static => DAY * 365,
            CacheTier::Dynamic => DAY,
            CacheTier::ApiResponse => MINUTE * 5,
        }
    }
}

/// Logical groups of cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// `quiz-data-{bundle}`
    QuizData,
    /// `user-stats-{user}`
    UserStats,
    /// `leaderboard-data`
    Leaderboard,
    /// `app-settings`
    Settings,
}

impl Namespace {
    /// Every namespace.
    pub const ALL: [Namespace; 4] = [
        Namespace::QuizData,
        Namespace::UserStats,
        Namespace::Leaderboard,
        Namespace::Settings,
    ];

    /// Namespaces removed by [`AppCache::clear_all`]. Settings survive.
    pub const VOLATILE: [Namespace; 3] = [
        Namespace::QuizData,
        Namespace::UserStats,
        Namespace::Leaderboard,
    ];

    /// Key prefix for keyed namespaces, or the full key for singletons.
    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::QuizData => "quiz-data-",
            Namespace::UserStats => "user-stats-",
            Namespace::Leaderboard => "leaderboard-data",
            Namespace::Settings => "app-settings",
        }
    }

    /// Tier deciding the namespace's TTL.
    pub fn tier(&self) -> CacheTier {
        match self {
            Namespace::QuizData => CacheTier::Dynamic,
            Namespace::UserStats | Namespace::Leaderboard => CacheTier::ApiResponse,
            Namespace::Settings => CacheTier::Static,
        }
    }

    fn is_singleton(&self) -> bool {
        matches!(self, Namespace::Leaderboard | Namespace::Settings)
    }

    /// Whether `key` belongs to this namespace.
    pub fn matches(&self, key: &str) -> bool {
        if self.is_singleton() {
            key == self.prefix()
        } else {
            key.starts_with(self.prefix())
        }
    }

    /// The namespace owning `key`, if any.
    pub fn of(key: &str) -> Option<Namespace> {
        Self::ALL.into_iter().find(|ns| ns.matches(key))
    }

    /// Name accepted by [`FromStr`] and printed by `Display`.
    pub fn name(&self) -> &'static str {
        match self {
            Namespace::QuizData => "quiz-data",
            Namespace::UserStats => "user-stats",
            Namespace::Leaderboard => "leaderboard",
            Namespace::Settings => "settings",
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix(), id)
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ns| ns.name() == s)
            .ok_or_else(|| {
                format!(
                    "unknown namespace '{}', expected one of: quiz-data, user-stats, leaderboard, settings",
                    s
                )
            })
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Observed network conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    /// 2G-class links
    Slow,
    Normal,
    Offline,
}

impl ConnectionQuality {
    /// Map an effective connection type (`slow-2g`, `2g`, `3g`, `4g`...).
    pub fn from_effective_type(effective_type: &str, online: bool) -> Self {
        if !online {
            ConnectionQuality::Offline
        } else if matches!(effective_type, "slow-2g" | "2g") {
            ConnectionQuality::Slow
        } else {
            ConnectionQuality::Normal
        }
    }

    /// Whether cached data should be served in preference to the network.
    pub fn should_prefer_cache(&self) -> bool {
        matches!(self, ConnectionQuality::Slow | ConnectionQuality::Offline)
    }

    /// TTL to use for freshly fetched data under these conditions.
    pub fn optimal_ttl(&self) -> Duration {
        match self {
            ConnectionQuality::Slow => CacheTier::Dynamic.ttl() * 2,
            _ => CacheTier::ApiResponse.ttl(),
        }
    }
}

/// Typed helpers over an [`ExpiringCache`].
pub struct AppCache<S: KeyValueStore, C: Clock = SystemClock> {
    cache: ExpiringCache<S, C>,
}

impl<S: KeyValueStore, C: Clock> AppCache<S, C> {
    /// Wrap `cache`.
    pub fn new(cache: ExpiringCache<S, C>) -> Self {
        Self { cache }
    }

    /// The wrapped cache.
    pub fn inner(&self) -> &ExpiringCache<S, C> {
        &self.cache
    }

    /// Store a quiz bundle for a day.
    pub fn cache_quiz_data<T: Serialize + ?Sized>(&self, bundle_id: &str, data: &T) -> WriteOutcome {
        self.put(Namespace::QuizData, bundle_id, data)
    }

    /// Read a quiz bundle.
    pub fn cached_quiz_data<T: DeserializeOwned>(&self, bundle_id: &str) -> Option<T> {
        self.cache.get(&Namespace::QuizData.key(bundle_id))
    }

    /// Store a user's stats for five minutes.
    pub fn cache_user_stats<T: Serialize + ?Sized>(&self, user_id: &str, stats: &T) -> WriteOutcome {
        self.put(Namespace::UserStats, user_id, stats)
    }

    /// Read a user's stats.
    pub fn cached_user_stats<T: DeserializeOwned>(&self, user_id: &str) -> Option<T> {
        self.cache.get(&Namespace::UserStats.key(user_id))
    }

    /// Store the leaderboard for five minutes.
    pub fn cache_leaderboard<T: Serialize + ?Sized>(&self, data: &T) -> WriteOutcome {
        self.put(Namespace::Leaderboard, "", data)
    }

    /// Read the leaderboard.
    pub fn cached_leaderboard<T: DeserializeOwned>(&self) -> Option<T> {
        self.cache.get(Namespace::Leaderboard.prefix())
    }

    /// Store app settings for a year.
    pub fn cache_settings<T: Serialize + ?Sized>(&self, settings: &T) -> WriteOutcome {
        self.put(Namespace::Settings, "", settings)
    }

    /// Read app settings.
    pub fn cached_settings<T: DeserializeOwned>(&self) -> Option<T> {
        self.cache.get(Namespace::Settings.prefix())
    }

    /// Remove every entry in `namespace`.
    pub fn clear_namespace(&self, namespace: Namespace) -> usize {
        self.cache.clear_matching(|key| namespace.matches(key))
    }

    /// Remove quiz data, user stats and the leaderboard. Settings are kept.
    pub fn clear_all(&self) -> usize {
        self.cache
            .clear_matching(|key| Namespace::VOLATILE.iter().any(|ns| ns.matches(key)))
    }

    /// Scan one namespace.
    pub fn inspect_namespace(&self, namespace: Namespace) -> CacheReport {
        self.cache.inspect_matching(|key| namespace.matches(key))
    }

    fn put<T: Serialize + ?Sized>(&self, namespace: Namespace, id: &str, value: &T) -> WriteOutcome {
        self.cache
            .set(&namespace.key(id), value, Some(namespace.tier().ttl()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::ManualClock;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn app() -> (AppCache<Arc<MemoryStore>, ManualClock>, Arc<MemoryStore>, ManualClock) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(1_700_000_000_000);
        let cache = ExpiringCache::with_clock(Arc::clone(&store), clock.clone());
        (AppCache::new(cache), store, clock)
    }

    #[test]
    fn test_tier_durations() {
        assert_eq!(CacheTier::Static.ttl(), Duration::from_secs(365 * 86_400));
        assert_eq!(CacheTier::Dynamic.ttl(), Duration::from_secs(86_400));
        assert_eq!(CacheTier::ApiResponse.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_namespace_matching() {
        assert_eq!(Namespace::of("quiz-data-easy"), Some(Namespace::QuizData));
        assert_eq!(Namespace::of("user-stats-7"), Some(Namespace::UserStats));
        assert_eq!(Namespace::of("leaderboard-data"), Some(Namespace::Leaderboard));
        assert_eq!(Namespace::of("leaderboard-data-old"), None);
        assert_eq!(Namespace::of("app-settings"), Some(Namespace::Settings));
        assert_eq!(Namespace::of("something-else"), None);
    }

    #[test]
    fn test_namespace_parse() {
        assert_eq!("quiz-data".parse::<Namespace>(), Ok(Namespace::QuizData));
        assert_eq!("settings".parse::<Namespace>(), Ok(Namespace::Settings));
        assert!("quiz".parse::<Namespace>().is_err());
    }

    #[test]
    fn test_quiz_data_uses_dynamic_tier() {
        let (app, store, clock) = app();
        let data = json!({"questions": [1, 2, 3]});

        assert!(app.cache_quiz_data("easy", &data).is_stored());
        assert!(store.get("quiz-data-easy").is_some());
        assert_eq!(app.cached_quiz_data::<Value>("easy"), Some(data));

        clock.advance(CacheTier::Dynamic.ttl());
        assert_eq!(app.cached_quiz_data::<Value>("easy"), None);
    }

    #[test]
    fn test_user_stats_and_leaderboard_use_api_tier() {
        let (app, _, clock) = app();

        app.cache_user_stats("u1", &json!({"score": 10}));
        app.cache_leaderboard(&vec!["ann", "bob"]);

        clock.advance(Duration::from_secs(299));
        assert_eq!(app.cached_user_stats::<Value>("u1"), Some(json!({"score": 10})));
        assert_eq!(
            app.cached_leaderboard::<Vec<String>>(),
            Some(vec!["ann".to_string(), "bob".to_string()])
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(app.cached_user_stats::<Value>("u1"), None);
        assert_eq!(app.cached_leaderboard::<Vec<String>>(), None);
    }

    #[test]
    fn test_clear_all_keeps_settings() {
        let (app, store, _) = app();

        app.cache_quiz_data("easy", &1);
        app.cache_user_stats("u1", &2);
        app.cache_leaderboard(&3);
        app.cache_settings(&json!({"theme": "dark"}));
        store.set("unrelated", "kept").unwrap();

        assert_eq!(app.clear_all(), 3);

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["app-settings".to_string(), "unrelated".to_string()]);
        assert_eq!(app.cached_settings::<Value>(), Some(json!({"theme": "dark"})));
    }

    #[test]
    fn test_clear_single_namespace() {
        let (app, _, _) = app();

        app.cache_quiz_data("easy", &1);
        app.cache_quiz_data("hard", &2);
        app.cache_user_stats("u1", &3);

        assert_eq!(app.inspect_namespace(Namespace::QuizData).live, 2);
        assert_eq!(app.clear_namespace(Namespace::QuizData), 2);
        assert_eq!(app.cached_user_stats::<i32>("u1"), Some(3));
    }

    #[test]
    fn test_connection_quality() {
        let slow = ConnectionQuality::from_effective_type("2g", true);
        assert_eq!(slow, ConnectionQuality::Slow);
        assert!(slow.should_prefer_cache());
        assert_eq!(slow.optimal_ttl(), Duration::from_secs(2 * 86_400));

        let normal = ConnectionQuality::from_effective_type("4g", true);
        assert!(!normal.should_prefer_cache());
        assert_eq!(normal.optimal_ttl(), Duration::from_secs(300));

        let offline = ConnectionQuality::from_effective_type("4g", false);
        assert!(offline.should_prefer_cache());
    }
}
