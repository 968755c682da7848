//! Hierarchical scope cache (§4.1): pipeline ⊃ module ⊃ task ⊃ step.
//!
//! A single generic `ScopeCache` type backs all four nesting levels; the
//! scope names are just constructor helpers that pick sensible default TTL
//! and janitor intervals (the behaviour is otherwise identical, mirroring
//! how the teacher crate's checkpoint store is one type reused across
//! lifetimes rather than four near-identical ones).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::error::{EngineError, Result};

type AnyValue = Arc<dyn Any + Send + Sync>;

struct Entry {
    value: AnyValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(t) if t <= Instant::now())
    }
}

/// Recommended default TTL / janitor interval per scope, per §4.1.
#[derive(Debug, Clone, Copy)]
pub struct ScopeDefaults {
    pub default_ttl: Option<Duration>,
    pub janitor_interval: Option<Duration>,
}

impl ScopeDefaults {
    pub const PIPELINE: Self = Self {
        default_ttl: Some(Duration::from_secs(24 * 3600)),
        janitor_interval: Some(Duration::from_secs(3600)),
    };
    pub const MODULE: Self = Self {
        default_ttl: Some(Duration::from_secs(3600)),
        janitor_interval: Some(Duration::from_secs(600)),
    };
    pub const TASK: Self = Self {
        default_ttl: Some(Duration::from_secs(1800)),
        janitor_interval: Some(Duration::from_secs(300)),
    };
    pub const STEP: Self = Self {
        default_ttl: Some(Duration::from_secs(300)),
        janitor_interval: Some(Duration::from_secs(60)),
    };
}

/// A hierarchical key→value store with read-through parent lookup and
/// write-local semantics: "narrower scopes override broader scopes" without
/// ever copying the parent's data.
pub struct ScopeCache {
    parent: Option<Arc<ScopeCache>>,
    store: DashMap<String, Entry>,
    default_ttl: Option<Duration>,
    janitor: std::sync::Mutex<Option<(Arc<AtomicBool>, JoinHandle<()>)>>,
}

impl ScopeCache {
    pub fn new(parent: Option<Arc<ScopeCache>>, default_ttl: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            parent,
            store: DashMap::new(),
            default_ttl,
            janitor: std::sync::Mutex::new(None),
        })
    }

    pub fn new_pipeline() -> Arc<Self> {
        Self::new(None, ScopeDefaults::PIPELINE.default_ttl)
    }

    pub fn new_module(parent: Arc<ScopeCache>) -> Arc<Self> {
        Self::new(Some(parent), ScopeDefaults::MODULE.default_ttl)
    }

    pub fn new_task(parent: Arc<ScopeCache>) -> Arc<Self> {
        Self::new(Some(parent), ScopeDefaults::TASK.default_ttl)
    }

    pub fn new_step(parent: Arc<ScopeCache>) -> Arc<Self> {
        Self::new(Some(parent), ScopeDefaults::STEP.default_ttl)
    }

    /// Start a background janitor that evicts expired local entries on
    /// `interval`. Stops when the returned handle is dropped or `stop()` is
    /// called explicitly.
    pub fn start_janitor(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.janitor.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if stop_clone.load(Ordering::Relaxed) {
                    break;
                }
                this.store.retain(|_, entry| !entry.is_expired());
            }
        });
        *guard = Some((stop, handle));
    }

    pub fn stop_janitor(&self) {
        if let Some((stop, handle)) = self.janitor.lock().unwrap().take() {
            stop.store(true, Ordering::Relaxed);
            handle.abort();
        }
    }

    fn local_get(&self, key: &str) -> Option<AnyValue> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        // Expired: evict lazily, then report a miss for this scope.
        self.store.remove(key);
        None
    }

    /// Read-through `Get`: local value if present and unexpired, else the
    /// parent's value by the same rule, else a miss.
    pub fn get(&self, key: &str) -> Option<AnyValue> {
        if let Some(v) = self.local_get(key) {
            return Some(v);
        }
        self.parent.as_ref().and_then(|p| p.get(key))
    }

    pub fn get_typed<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.downcast_ref::<T>().cloned())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_typed::<String>(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get_typed::<i64>(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_typed::<bool>(key)
    }

    pub fn get_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get_typed::<DateTime<Utc>>(key)
    }

    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let expires_at = self.default_ttl.map(|ttl| Instant::now() + ttl);
        self.store.insert(
            key.into(),
            Entry {
                value: Arc::new(value),
                expires_at,
            },
        );
    }

    pub fn set_with_ttl<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
        ttl: Duration,
    ) {
        self.store.insert(
            key.into(),
            Entry {
                value: Arc::new(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.store.remove(key);
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Local keys only — never the parent's.
    pub fn keys(&self) -> Vec<String> {
        self.store
            .iter()
            .filter(|e| !e.value().is_expired())
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn range(&self, mut f: impl FnMut(&str, &AnyValue)) {
        for entry in self.store.iter() {
            if !entry.value().is_expired() {
                f(entry.key(), &entry.value().value);
            }
        }
    }

    pub fn count(&self) -> usize {
        self.keys().len()
    }

    pub fn flush(&self) {
        self.store.clear();
    }

    /// Read-through lookup; on a miss, sets `value` locally and returns it.
    pub fn get_or_set<T: Clone + Any + Send + Sync + 'static>(
        &self,
        key: &str,
        value: T,
    ) -> (T, bool) {
        if let Some(existing) = self.get_typed::<T>(key) {
            return (existing, true);
        }
        self.set(key.to_string(), value.clone());
        (value, false)
    }

    pub fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        self.apply_delta(key, delta)
    }

    pub fn decrement(&self, key: &str, delta: i64) -> Result<i64> {
        self.apply_delta(key, -delta)
    }

    fn apply_delta(&self, key: &str, delta: i64) -> Result<i64> {
        let expires_at = self.default_ttl.map(|ttl| Instant::now() + ttl);
        // DashMap's per-shard lock makes this a single atomic read-modify-write
        // from the caller's point of view, without a manual CAS retry loop.
        let mut slot = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Arc::new(0i64),
                expires_at,
            });
        if slot.is_expired() {
            slot.value = Arc::new(0i64);
            slot.expires_at = expires_at;
        }
        let current = *slot
            .value
            .downcast_ref::<i64>()
            .ok_or_else(|| EngineError::TypeMismatch {
                key: key.to_string(),
                expected: "integer",
            })?;
        let next = current + delta;
        slot.value = Arc::new(next);
        Ok(next)
    }
}

impl Drop for ScopeCache {
    fn drop(&mut self) {
        self.stop_janitor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_locality_parent_is_unaffected_by_child_writes() {
        let parent = ScopeCache::new_pipeline();
        parent.set("k", "p".to_string());

        let child = ScopeCache::new_module(parent.clone());
        child.set("k", "m".to_string());

        assert_eq!(parent.get_string("k"), Some("p".to_string()));
        assert_eq!(child.get_string("k"), Some("m".to_string()));
    }

    #[test]
    fn read_through_falls_back_to_parent_on_miss() {
        let parent = ScopeCache::new_pipeline();
        parent.set("k", "p".to_string());

        let module = ScopeCache::new_module(parent.clone());
        let task = ScopeCache::new_task(module.clone());
        let step = ScopeCache::new_step(task.clone());

        assert_eq!(step.get_string("k"), Some("p".to_string()));

        task.set("t", "t".to_string());
        assert_eq!(step.get_string("t"), Some("t".to_string()));
    }

    #[test]
    fn hierarchical_override_scenario_from_spec() {
        let pipeline = ScopeCache::new_pipeline();
        pipeline.set("k", "p".to_string());

        let module = ScopeCache::new_module(pipeline.clone());
        module.set("k", "m".to_string());

        let task = ScopeCache::new_task(module.clone());
        task.set("t", "t".to_string());

        let step = ScopeCache::new_step(task.clone());

        assert_eq!(step.get_string("k"), Some("m".to_string()));
        assert_eq!(step.get_string("t"), Some("t".to_string()));

        module.delete("k");
        assert_eq!(step.get_string("k"), Some("p".to_string()));

        assert_eq!(pipeline.keys(), vec!["k".to_string()]);
        assert_eq!(module.keys(), Vec::<String>::new());
        assert_eq!(task.keys(), vec!["t".to_string()]);
    }

    #[test]
    fn type_mismatch_getters_return_none_not_panic() {
        let cache = ScopeCache::new_pipeline();
        cache.set("k", "not an int".to_string());
        assert_eq!(cache.get_int("k"), None);
        assert_eq!(cache.get_bool("k"), None);
    }

    #[test]
    fn increment_and_decrement_round_trip() {
        let cache = ScopeCache::new_pipeline();
        assert_eq!(cache.increment("counter", 1).unwrap(), 1);
        assert_eq!(cache.increment("counter", 4).unwrap(), 5);
        assert_eq!(cache.decrement("counter", 2).unwrap(), 3);
    }

    #[test]
    fn increment_on_non_integer_is_a_type_mismatch() {
        let cache = ScopeCache::new_pipeline();
        cache.set("k", "x".to_string());
        let err = cache.increment("k", 1).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
    }

    #[test]
    fn get_or_set_reports_whether_it_already_existed() {
        let cache = ScopeCache::new_pipeline();
        let (v1, existed1) = cache.get_or_set("k", 10i64);
        assert_eq!((v1, existed1), (10, false));

        let (v2, existed2) = cache.get_or_set("k", 99i64);
        assert_eq!((v2, existed2), (10, true));
    }

    #[test]
    fn expiry_is_monotonic_within_a_scope() {
        let cache = ScopeCache::new(None, None);
        cache.set_with_ttl("k", "v".to_string(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get_string("k"), None);
        // still a miss, not resurrected, even if queried again
        assert_eq!(cache.get_string("k"), None);
    }

    #[tokio::test]
    async fn janitor_evicts_expired_entries_in_the_background() {
        let cache = ScopeCache::new(None, None);
        cache.set_with_ttl("k", "v".to_string(), Duration::from_millis(5));
        cache.start_janitor(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(60)).await;
        // bypass get()'s own lazy eviction to prove the janitor did it
        assert_eq!(cache.store.len(), 0);
        cache.stop_janitor();
    }

    #[test]
    fn flush_clears_only_the_local_scope() {
        let parent = ScopeCache::new_pipeline();
        parent.set("k", "p".to_string());
        let child = ScopeCache::new_module(parent.clone());
        child.set("k2", "c".to_string());

        child.flush();
        assert_eq!(child.count(), 0);
        assert_eq!(parent.get_string("k"), Some("p".to_string()));
    }
}
