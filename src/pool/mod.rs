//! Parser Pool (C2, §4.2).
//!
//! A bounded per-language stack of idle parsers plus a set of active
//! (checked-out) parsers tagged with their acquisition time, so a periodic
//! reaper can reclaim parsers whose caller never released them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::grammar::{GrammarRegistry, Language};

struct PooledParser {
    parser: tree_sitter::Parser,
}

/// Checked-out parser. Carries its acquisition timestamp so `release`/the
/// reaper can account for it; returned to the pool on [`ParserPool::release`].
pub struct PooledHandle {
    id: Uuid,
    language: Language,
    parser: Option<tree_sitter::Parser>,
    acquired_at: Instant,
}

impl PooledHandle {
    pub fn parser_mut(&mut self) -> &mut tree_sitter::Parser {
        self.parser.as_mut().expect("parser taken before release")
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PoolStats {
    pub idle_count: usize,
    pub active_count: usize,
    pub pool_max: usize,
    pub reaped_total: u64,
}

struct PerLanguagePool {
    idle: Vec<PooledParser>,
}

/// C2: bounded idle stacks keyed by language, plus an active-set used for
/// leak detection and health checks.
pub struct ParserPool {
    grammar: Arc<GrammarRegistry>,
    idle: Mutex<HashMap<Language, PerLanguagePool>>,
    active: DashMap<Uuid, (Language, Instant)>,
    pool_max: usize,
    acquire_timeout: Duration,
    reaped_total: AtomicUsize,
}

impl ParserPool {
    pub fn new(grammar: Arc<GrammarRegistry>, pool_max: usize, acquire_timeout: Duration) -> Self {
        Self {
            grammar,
            idle: Mutex::new(HashMap::new()),
            active: DashMap::new(),
            pool_max,
            acquire_timeout,
            reaped_total: AtomicUsize::new(0),
        }
    }

    fn fresh_parser(&self, lang: Language) -> Result<tree_sitter::Parser, ServiceError> {
        let handle = self.grammar.get(lang)?;
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&handle)
            .map_err(|e| ServiceError::Internal(format!("failed to set grammar: {e}")))?;
        Ok(parser)
    }

    /// Pops an idle parser for `lang` if one exists, otherwise allocates a
    /// fresh one, and registers it in the active set.
    pub fn acquire(&self, lang: Language) -> Result<PooledHandle, ServiceError> {
        let parser = {
            let mut idle = self.idle.lock();
            idle.get_mut(&lang).and_then(|p| p.idle.pop())
        };

        let parser = match parser {
            Some(pooled) => pooled.parser,
            None => self.fresh_parser(lang)?,
        };

        let id = Uuid::new_v4();
        let acquired_at = Instant::now();
        self.active.insert(id, (lang, acquired_at));

        Ok(PooledHandle {
            id,
            language: lang,
            parser: Some(parser),
            acquired_at,
        })
    }

    /// Removes `handle` from the active set; pushes it back onto the idle
    /// stack unless the stack is already at `pool_max`, in which case the
    /// parser is dropped.
    pub fn release(&self, mut handle: PooledHandle) {
        self.active.remove(&handle.id);
        let Some(parser) = handle.parser.take() else {
            return;
        };

        let mut idle = self.idle.lock();
        let per_lang = idle.entry(handle.language).or_insert_with(|| PerLanguagePool {
            idle: Vec::new(),
        });
        if per_lang.idle.len() < self.pool_max {
            per_lang.idle.push(PooledParser { parser });
        } else {
            debug!(language = %handle.language, "parser pool at capacity, dropping parser");
        }
    }

    pub fn warmup(&self, langs: &[Language]) -> Result<(), ServiceError> {
        for &lang in langs {
            let handle = self.acquire(lang)?;
            self.release(handle);
        }
        Ok(())
    }

    /// Forces every idle parser out and clears the active set's bookkeeping.
    /// The parsers themselves are dropped; any callers still holding a
    /// [`PooledHandle`] simply never return it to the pool.
    pub fn emergency_cleanup(&self) {
        self.idle.lock().clear();
        self.active.clear();
        debug!("parser pool emergency cleanup: idle and active sets cleared");
    }

    /// Drops idle entries beyond half of `pool_max`, run by the periodic reaper.
    pub fn shrink_idle(&self) {
        let mut idle = self.idle.lock();
        let target = self.pool_max / 2;
        for pool in idle.values_mut() {
            if pool.idle.len() > target {
                pool.idle.truncate(target);
            }
        }
    }

    /// Forcibly reclaims active entries whose checkout has exceeded the
    /// configured acquire timeout, treating them as lost (§4.2 leak policy).
    pub fn reap_leaked(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .active
            .iter()
            .filter(|e| now.duration_since(e.value().1) > self.acquire_timeout)
            .map(|e| *e.key())
            .collect();

        for id in &expired {
            self.active.remove(id);
        }
        if !expired.is_empty() {
            warn!(count = expired.len(), "reaped leaked parser checkouts");
            self.reaped_total
                .fetch_add(expired.len(), Ordering::Relaxed);
        }
        expired.len()
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock();
        PoolStats {
            idle_count: idle.values().map(|p| p.idle.len()).sum(),
            active_count: self.active.len(),
            pool_max: self.pool_max,
            reaped_total: self.reaped_total.load(Ordering::Relaxed) as u64,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.active.len() <= 2 * self.pool_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool() -> ParserPool {
        ParserPool::new(Arc::new(GrammarRegistry::new()), 4, Duration::from_millis(50))
    }

    #[test]
    fn acquire_then_release_returns_to_idle_stack() {
        let pool = pool();
        let handle = pool.acquire(Language::Javascript).unwrap();
        assert_eq!(pool.stats().active_count, 1);

        pool.release(handle);
        assert_eq!(pool.stats().active_count, 0);
        assert_eq!(pool.stats().idle_count, 1);
    }

    #[test]
    fn idle_stack_does_not_exceed_pool_max() {
        let pool = pool();
        let handles: Vec<_> = (0..6)
            .map(|_| pool.acquire(Language::Python).unwrap())
            .collect();
        for h in handles {
            pool.release(h);
        }
        assert!(pool.stats().idle_count <= 4);
    }

    #[test]
    fn reap_leaked_reclaims_expired_checkouts() {
        let pool = pool();
        let handle = pool.acquire(Language::Rust).unwrap();
        std::mem::forget(handle);
        std::thread::sleep(Duration::from_millis(60));

        let reaped = pool.reap_leaked();
        assert_eq!(reaped, 1);
        assert_eq!(pool.stats().active_count, 0);
    }

    #[test]
    fn is_healthy_false_when_active_exceeds_twice_pool_max() {
        let pool = pool();
        let handles: Vec<_> = (0..9)
            .map(|_| pool.acquire(Language::Go).unwrap())
            .collect();
        assert!(!pool.is_healthy());
        drop(handles);
    }
}
