//! Per-connection cache of server-side prepared plans.
//!
//! Maps SQL text to the name of the plan registered for it on one session,
//! so preparing the same SQL twice on a connection reuses the existing plan.
//! Plan and cursor names come from monotonic counters created with the
//! connection and valid for its lifetime.

use std::num::NonZeroUsize;

use lru::LruCache;

/// O(1) LRU cache: SQL text → plan name.
pub struct PlanCache {
    cache: LruCache<String, String>,
}

impl PlanCache {
    /// Create a new plan cache with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
        }
    }

    /// Plan name registered for `sql`; marks it as recently used.
    pub fn get(&mut self, sql: &str) -> Option<String> {
        self.cache.get(sql).cloned()
    }

    #[inline]
    pub fn contains(&self, sql: &str) -> bool {
        self.cache.contains(sql)
    }

    /// Record the plan registered for `sql`.
    ///
    /// Returns the name of a plan that is no longer referenced: the evicted
    /// least-recently-used entry, or the previous plan for the same SQL when
    /// it was registered under a different name.
    pub fn insert(&mut self, sql: String, name: String) -> Option<String> {
        match self.cache.push(sql.clone(), name) {
            Some((old_sql, old_name)) if old_sql != sql => Some(old_name),
            Some((_, old_name)) => {
                let replaced = self.cache.peek(&sql).is_some_and(|n| *n != old_name);
                replaced.then_some(old_name)
            }
            None => None,
        }
    }

    pub fn remove(&mut self, sql: &str) -> Option<String> {
        self.cache.pop(sql)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Forget every plan. The server side is not touched.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Monotonic generator for connection-scoped names.
#[derive(Debug)]
pub struct NameGenerator {
    prefix: &'static str,
    next_id: u64,
}

impl NameGenerator {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, next_id: 0 }
    }

    pub fn next_name(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        format!("{}_{}", self.prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic_operations() {
        let mut cache = PlanCache::new(10);
        assert!(cache.is_empty());

        assert_eq!(cache.insert("SELECT 1".to_string(), "p1".to_string()), None);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("SELECT 1"));
        assert_eq!(cache.get("SELECT 1"), Some("p1".to_string()));
        assert_eq!(cache.get("SELECT 2"), None);

        assert_eq!(cache.remove("SELECT 1"), Some("p1".to_string()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = PlanCache::new(2);
        cache.insert("q1".to_string(), "s1".to_string());
        cache.insert("q2".to_string(), "s2".to_string());

        // Touch q1 so q2 becomes least recently used
        cache.get("q1");

        let evicted = cache.insert("q3".to_string(), "s3".to_string());
        assert_eq!(evicted, Some("s2".to_string()));
        assert!(cache.contains("q1"));
        assert!(!cache.contains("q2"));
        assert!(cache.contains("q3"));
    }

    #[test]
    fn test_cache_rename_reports_old_plan() {
        let mut cache = PlanCache::new(4);
        cache.insert("q1".to_string(), "s1".to_string());
        assert_eq!(
            cache.insert("q1".to_string(), "custom".to_string()),
            Some("s1".to_string())
        );
        assert_eq!(cache.insert("q1".to_string(), "custom".to_string()), None);
        assert_eq!(cache.get("q1"), Some("custom".to_string()));
    }

    #[test]
    fn test_unique_names() {
        let mut names = NameGenerator::new("__pq_plan");
        let all: Vec<String> = (0..10).map(|_| names.next_name()).collect();

        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 10);
        assert_eq!(all[0], "__pq_plan_0");
        assert_eq!(all[9], "__pq_plan_9");
    }
}
