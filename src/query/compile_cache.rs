//! Compiled-query cache.
//!
//! Caches the native `tree_sitter::Query` compile step, keyed by
//! `(language, query source)`, so repeated requests for the same query
//! string against the same grammar skip recompilation. Bounded by
//! `QueryConfig::cache_size` with a `cache_ttl_ms` expiry, the same
//! size-plus-TTL shape the teacher uses for its document IR cache, backed
//! by the same `lru` crate.
//!
//! Distinct from [`crate::query::regex_cache::RegexCache`], which is
//! per-request and never persisted (§9 design notes); this cache is
//! process-lifetime and shared across requests.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tree_sitter::{Language, Query};

struct Entry {
    query: Arc<Query>,
    inserted_at: Instant,
}

pub struct QueryCompileCache {
    inner: Mutex<LruCache<(String, String), Entry>>,
    ttl: Duration,
}

impl QueryCompileCache {
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap())),
            ttl: Duration::from_millis(ttl_ms),
        }
    }

    /// Returns the cached compiled query for `(language_tag, source)` if
    /// present and unexpired, otherwise compiles, caches, and returns it.
    pub fn get_or_compile(
        &self,
        language_tag: &str,
        source: &str,
        grammar: &Language,
    ) -> Result<(Arc<Query>, bool), String> {
        let key = (language_tag.to_string(), source.to_string());
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Ok((entry.query.clone(), true));
            }
            inner.pop(&key);
        }
        drop(inner);

        let query = Arc::new(Query::new(grammar, source).map_err(|e| e.to_string())?);
        self.inner.lock().put(
            key,
            Entry {
                query: query.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok((query, false))
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn javascript() -> Language {
        tree_sitter_javascript::LANGUAGE.into()
    }

    #[test]
    fn second_lookup_for_same_key_is_a_cache_hit() {
        let cache = QueryCompileCache::new(4, 60_000);
        let grammar = javascript();

        let (_, hit) = cache.get_or_compile("javascript", "((identifier) @id)", &grammar).unwrap();
        assert!(!hit);
        let (_, hit) = cache.get_or_compile("javascript", "((identifier) @id)", &grammar).unwrap();
        assert!(hit);
    }

    #[test]
    fn expired_entry_is_recompiled() {
        let cache = QueryCompileCache::new(4, 1);
        let grammar = javascript();

        let (_, hit) = cache.get_or_compile("javascript", "((identifier) @id)", &grammar).unwrap();
        assert!(!hit);
        std::thread::sleep(Duration::from_millis(5));
        let (_, hit) = cache.get_or_compile("javascript", "((identifier) @id)", &grammar).unwrap();
        assert!(!hit);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = QueryCompileCache::new(1, 60_000);
        let grammar = javascript();

        cache.get_or_compile("javascript", "((identifier) @a)", &grammar).unwrap();
        cache.get_or_compile("javascript", "((identifier) @b)", &grammar).unwrap();
        assert_eq!(cache.len(), 1);
        let (_, hit) = cache.get_or_compile("javascript", "((identifier) @a)", &grammar).unwrap();
        assert!(!hit);
    }

    #[test]
    fn invalid_query_is_not_cached() {
        let cache = QueryCompileCache::new(4, 60_000);
        let grammar = javascript();
        assert!(cache.get_or_compile("javascript", "(not valid", &grammar).is_err());
        assert_eq!(cache.len(), 0);
    }
}
