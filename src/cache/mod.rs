//! Session Cache: the router's only process-wide mutable state.
//!
//! Two bounded LRUs live here: `modelCache` maps a session-partitioned
//! identity key to a resolved `provider,model`, and `sessionProjectCache`
//! maps a session id to a project folder name for the file-based
//! session↔project resolution path. Both are capacity 1000, no TTL.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::types::{IdentityKind, ScenarioType};

/// Capacity shared by both sub-caches.
pub const CACHE_CAPACITY: usize = 1000;

/// Point-in-time view of the cache's hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Successful lookups.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries dropped by LRU capacity pressure.
    pub evictions: u64,
    /// Current number of entries in `modelCache`.
    pub size: usize,
}

impl CacheMetrics {
    /// `hits / (hits + misses)`, or `0.0` when there have been no lookups yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A `CacheMetrics` snapshot plus a tally of how many requests settled on
/// each [`ScenarioType`], so an
/// operator can see what the priority chain is actually doing in a live
/// session without attaching a debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterMetrics {
    /// The Session Cache's hit/miss/eviction/size snapshot.
    pub cache: CacheMetrics,
    /// Number of requests that settled on each scenario, since the last reset.
    pub scenario_counts: HashMap<ScenarioType, u64>,
}

/// Builds the `"{sessionId}:{kind}:{projectId}:{identityId}"` cache key.
/// The `kind` namespace keeps an agent id from colliding with a workflow id
/// that happens to share the same UUID; the `projectId` namespace means the
/// same identity resolves independently per project.
pub fn model_cache_key(
    session_id: &str,
    kind: IdentityKind,
    project_id: &str,
    identity_id: &str,
) -> String {
    format!("{session_id}:{kind}:{project_id}:{identity_id}")
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// One atomic counter per [`ScenarioType`] variant, indexed by `ScenarioType::ALL`'s order.
#[derive(Default)]
struct ScenarioCounters([AtomicU64; 5]);

impl ScenarioCounters {
    fn index_of(scenario: ScenarioType) -> usize {
        ScenarioType::ALL
            .iter()
            .position(|s| *s == scenario)
            .expect("ScenarioType::ALL covers every variant")
    }

    fn increment(&self, scenario: ScenarioType) {
        self.0[Self::index_of(scenario)].fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HashMap<ScenarioType, u64> {
        ScenarioType::ALL
            .iter()
            .map(|s| (*s, self.0[Self::index_of(*s)].load(Ordering::Relaxed)))
            .collect()
    }

    fn reset(&self) {
        for counter in &self.0 {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// The session-scoped LRU cache of identity→model resolutions.
///
/// Both sub-caches are guarded by a coarse `parking_lot::Mutex`: `lru`'s
/// internals aren't lock-free, and reads don't need to be either, since
/// redundant concurrent misses resolving the same key are idempotent.
pub struct SessionCache {
    model_cache: Mutex<LruCache<String, String>>,
    session_project_cache: Mutex<LruCache<String, String>>,
    /// `sessionId -> previous request's input_tokens`, consulted by the
    /// Router's long-context rule: a session that just sent
    /// a long-context request stays in long-context mode for one extra
    /// request even if that next request is individually smaller. Same
    /// bound and eviction policy as the other two sub-caches.
    previous_tokens_cache: Mutex<LruCache<String, u64>>,
    counters: Counters,
    scenario_counters: ScenarioCounters,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    /// Builds a cache with both sub-caches at the mandated capacity.
    pub fn new() -> Self {
        let cap = NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is nonzero");
        Self {
            model_cache: Mutex::new(LruCache::new(cap)),
            session_project_cache: Mutex::new(LruCache::new(cap)),
            previous_tokens_cache: Mutex::new(LruCache::new(cap)),
            counters: Counters::default(),
            scenario_counters: ScenarioCounters::default(),
        }
    }

    /// Looks up `key` in `modelCache`, promoting it to MRU on a hit and
    /// bumping the hit/miss counter. Never panics: any internal
    /// inconsistency is impossible to construct via the public API, so
    /// there is nothing here to catch-and-log, unlike the reference
    /// implementation's map-operation try/catch (our map can't fail).
    pub fn get(&self, key: &str) -> Option<String> {
        let mut cache = self.model_cache.lock();
        match cache.get(key) {
            Some(v) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or updates `key`. If this insertion causes an eviction, the
    /// eviction counter is bumped.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let mut cache = self.model_cache.lock();
        let is_new_key = !cache.contains(&key);
        let was_at_capacity = cache.len() >= CACHE_CAPACITY;
        cache.put(key, value.into());
        if is_new_key && was_at_capacity {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Removes `key`, if present.
    pub fn delete(&self, key: &str) {
        self.model_cache.lock().pop(key);
    }

    /// Current number of entries in `modelCache`.
    pub fn size(&self) -> usize {
        self.model_cache.lock().len()
    }

    /// A snapshot of the hit/miss/eviction counters plus current size.
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            size: self.size(),
        }
    }

    /// Clears both sub-caches and resets the counters. Exposed for test
    /// isolation, since this and the scenario counters are the crate's only
    /// process-wide mutable state.
    pub fn reset(&self) {
        self.model_cache.lock().clear();
        self.session_project_cache.lock().clear();
        self.previous_tokens_cache.lock().clear();
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.evictions.store(0, Ordering::Relaxed);
        self.scenario_counters.reset();
    }

    /// Bumps the tally for `scenario`. Called by the Router exactly once per
    /// request, at the point the priority chain settles.
    pub fn record_scenario(&self, scenario: ScenarioType) {
        self.scenario_counters.increment(scenario);
    }

    /// A snapshot combining [`Self::metrics`] with the per-scenario tally.
    pub fn router_metrics(&self) -> RouterMetrics {
        RouterMetrics {
            cache: self.metrics(),
            scenario_counts: self.scenario_counters.snapshot(),
        }
    }

    /// The previous request's `input_tokens` for `session_id`, if any.
    pub fn previous_input_tokens(&self, session_id: &str) -> Option<u64> {
        self.previous_tokens_cache.lock().get(session_id).copied()
    }

    /// Records `input_tokens` as the most recent token count seen for
    /// `session_id`, for the next request's long-context check.
    pub fn set_previous_input_tokens(&self, session_id: impl Into<String>, input_tokens: u64) {
        self.previous_tokens_cache
            .lock()
            .put(session_id.into(), input_tokens);
    }

    /// Looks up the project folder cached for `session_id`. An empty string
    /// means "searched, not found" and is itself a cache hit.
    pub fn get_session_project(&self, session_id: &str) -> Option<String> {
        self.session_project_cache.lock().get(session_id).cloned()
    }

    /// Caches `folder` (possibly empty) as the project folder for `session_id`.
    pub fn set_session_project(&self, session_id: impl Into<String>, folder: impl Into<String>) {
        self.session_project_cache
            .lock()
            .put(session_id.into(), folder.into());
    }
}

/// Logs and swallows a cache operation failure, returning `None` so the
/// router treats it as a miss. Kept as a named helper, even though this
/// crate's `SessionCache` methods are themselves infallible, so a future
/// backing store that can fail has one place to report through.
pub fn log_cache_failure(context: &str, err: impl std::fmt::Display) {
    warn!(context, %err, "session cache operation failed, treating as miss");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_hits() {
        let cache = SessionCache::new();
        cache.set("s1:agent:p1:a1", "anthropic,claude-sonnet-4");
        assert_eq!(
            cache.get("s1:agent:p1:a1").as_deref(),
            Some("anthropic,claude-sonnet-4")
        );
        assert_eq!(cache.metrics().hits, 1);
    }

    #[test]
    fn miss_increments_miss_counter() {
        let cache = SessionCache::new();
        assert!(cache.get("missing").is_none());
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn capacity_pressure_evicts_exactly_one_lru_entry() {
        let cache = SessionCache::new();
        for i in 0..CACHE_CAPACITY {
            cache.set(format!("k{i}"), "v");
        }
        assert_eq!(cache.size(), CACHE_CAPACITY);

        cache.set("overflow", "v");
        assert_eq!(cache.size(), CACHE_CAPACITY);
        assert_eq!(cache.metrics().evictions, 1);
        // k0 was least-recently-used and should be gone.
        assert!(cache.get("k0").is_none());
    }

    #[test]
    fn reset_clears_entries_and_counters() {
        let cache = SessionCache::new();
        cache.set("a", "b");
        cache.get("a");
        cache.get("missing");
        cache.reset();
        assert_eq!(cache.size(), 0);
        let m = cache.metrics();
        assert_eq!((m.hits, m.misses, m.evictions), (0, 0, 0));
    }

    #[test]
    fn model_cache_key_namespaces_by_kind_and_project() {
        let k1 = model_cache_key("s1", IdentityKind::Agent, "p1", "id1");
        let k2 = model_cache_key("s1", IdentityKind::Workflow, "p1", "id1");
        assert_ne!(k1, k2);
    }

    #[test]
    fn session_project_cache_distinguishes_not_found_from_unset() {
        let cache = SessionCache::new();
        assert!(cache.get_session_project("s1").is_none());
        cache.set_session_project("s1", "");
        assert_eq!(cache.get_session_project("s1").as_deref(), Some(""));
    }

    #[test]
    fn scenario_counts_tally_independently_and_reset_together() {
        let cache = SessionCache::new();
        cache.record_scenario(ScenarioType::Default);
        cache.record_scenario(ScenarioType::Default);
        cache.record_scenario(ScenarioType::WebSearch);

        let metrics = cache.router_metrics();
        assert_eq!(metrics.scenario_counts[&ScenarioType::Default], 2);
        assert_eq!(metrics.scenario_counts[&ScenarioType::WebSearch], 1);
        assert_eq!(metrics.scenario_counts[&ScenarioType::Think], 0);

        cache.reset();
        let metrics = cache.router_metrics();
        assert!(metrics.scenario_counts.values().all(|&v| v == 0));
    }
}
