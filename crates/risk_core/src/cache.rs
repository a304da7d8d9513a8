//! In-memory bundle cache
//!
//! Holds at most one global occurrence bundle, one severity bundle and a
//! bounded set of per-user bundles. When the user set is full the least
//! recently accessed entry is evicted. Only present bundles are cached;
//! a scope with no artifact is looked up again on the next request.

use crate::bundle::{OccurrenceBundle, Scope, SeverityBundle};
use crate::records::UserId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct CachedUser {
    bundle: Arc<OccurrenceBundle>,
    last_accessed: u64,
    access_count: u64,
}

#[derive(Debug, Default)]
struct Inner {
    global: Option<Arc<OccurrenceBundle>>,
    severity: Option<Arc<SeverityBundle>>,
    users: HashMap<UserId, CachedUser>,
    clock: u64,
    stats: CacheStats,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn record(&mut self, hit: bool) {
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .users
            .iter()
            .min_by_key(|(_, c)| c.last_accessed)
            .map(|(id, _)| *id)
        {
            self.users.remove(&oldest);
            self.stats.evictions += 1;
            debug!(user_id = oldest, "evicted least recently used user bundle");
        }
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub cached_users: usize,
}

#[derive(Debug)]
pub struct BundleCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl BundleCache {
    /// `capacity` bounds the per-user entries; zero disables user caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn global(&self) -> Option<Arc<OccurrenceBundle>> {
        let mut inner = self.inner.lock();
        let found = inner.global.clone();
        inner.record(found.is_some());
        found
    }

    pub fn put_global(&self, bundle: Arc<OccurrenceBundle>) {
        self.inner.lock().global = Some(bundle);
    }

    pub fn severity(&self) -> Option<Arc<SeverityBundle>> {
        let mut inner = self.inner.lock();
        let found = inner.severity.clone();
        inner.record(found.is_some());
        found
    }

    pub fn put_severity(&self, bundle: Arc<SeverityBundle>) {
        self.inner.lock().severity = Some(bundle);
    }

    pub fn user(&self, user_id: UserId) -> Option<Arc<OccurrenceBundle>> {
        let mut inner = self.inner.lock();
        let now = inner.tick();
        let found = inner.users.get_mut(&user_id).map(|entry| {
            entry.last_accessed = now;
            entry.access_count += 1;
            Arc::clone(&entry.bundle)
        });
        inner.record(found.is_some());
        found
    }

    pub fn put_user(&self, user_id: UserId, bundle: Arc<OccurrenceBundle>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if !inner.users.contains_key(&user_id) && inner.users.len() >= self.capacity {
            inner.evict_oldest();
        }
        let now = inner.tick();
        inner.users.insert(
            user_id,
            CachedUser {
                bundle,
                last_accessed: now,
                access_count: 0,
            },
        );
    }

    /// Drop whatever is cached for one scope, typically after retraining it.
    pub fn invalidate(&self, scope: Scope) {
        let mut inner = self.inner.lock();
        match scope {
            Scope::Global => inner.global = None,
            Scope::GlobalSeverity => inner.severity = None,
            Scope::User(id) => {
                inner.users.remove(&id);
            }
        }
        debug!(scope = %scope, "cache entry invalidated");
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.global = None;
        inner.severity = None;
        inner.users.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            cached_users: inner.users.len(),
            ..inner.stats
        }
    }

    /// How many times a cached user bundle has been served.
    pub fn access_count(&self, user_id: UserId) -> Option<u64> {
        self.inner.lock().users.get(&user_id).map(|c| c.access_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleMetrics, ModelBundle};
    use crate::features::FeatureRow;
    use crate::linear::SolverParams;
    use crate::metrics::SeverityMetrics;
    use crate::model::{OccurrenceModel, Pipeline};
    use chrono::NaiveDate;

    fn occurrence(scope: Scope) -> Arc<OccurrenceBundle> {
        let columns = vec!["stress_level".to_string()];
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows: Vec<FeatureRow> = (0..4)
            .map(|i| FeatureRow {
                user_id: 1,
                date,
                values: vec![Some(i as f64)],
            })
            .collect();
        let labels = [false, false, true, true];
        let pipeline =
            Pipeline::fit_classifier(&columns, &rows, &labels, SolverParams::default(), false);
        let metrics = BundleMetrics::Severity(SeverityMetrics {
            n_samples: 4,
            n_train: 4,
            n_test: 0,
            mae_intensity: None,
            feature_schema_version: "v1".into(),
            label_shift_days: 1,
        });
        Arc::new(ModelBundle::new(
            scope,
            OccurrenceModel::Raw(pipeline),
            metrics,
            columns,
            "v1",
        ))
    }

    #[test]
    fn least_recently_used_user_is_evicted() {
        let cache = BundleCache::new(2);
        cache.put_user(1, occurrence(Scope::User(1)));
        cache.put_user(2, occurrence(Scope::User(2)));
        assert!(cache.user(1).is_some());
        cache.put_user(3, occurrence(Scope::User(3)));

        assert!(cache.user(2).is_none());
        assert!(cache.user(1).is_some());
        assert!(cache.user(3).is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.access_count(1), Some(2));
    }

    #[test]
    fn invalidate_drops_only_that_scope() {
        let cache = BundleCache::new(4);
        cache.put_global(occurrence(Scope::Global));
        cache.put_user(5, occurrence(Scope::User(5)));

        cache.invalidate(Scope::User(5));
        assert!(cache.user(5).is_none());
        assert!(cache.global().is_some());

        cache.invalidate(Scope::Global);
        assert!(cache.global().is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[test]
    fn zero_capacity_never_caches_users() {
        let cache = BundleCache::new(0);
        cache.put_user(1, occurrence(Scope::User(1)));
        assert!(cache.user(1).is_none());
        assert_eq!(cache.stats().cached_users, 0);
    }
}
