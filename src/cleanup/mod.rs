//! Resource Cleaner (C5, §4.5).
//!
//! Three escalating strategies, driven by [`crate::memory::MemoryMonitor`]
//! and dispatched through a flat `match` over [`Strategy`] rather than a
//! trait-object registry (open question 4 in the design notes).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::grammar::GrammarRegistry;
use crate::memory::MemoryMonitor;
use crate::pool::ParserPool;
use crate::tree::TreeManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Basic,
    Aggressive,
    Emergency,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupOutcome {
    pub strategy: Strategy,
    pub before_mb: f64,
    pub after_mb: f64,
    pub duration_ms: u64,
    pub success: bool,
}

const HISTORY_CAP: usize = 64;

/// C5: serializes cleanup passes (at most one in flight) and keeps a bounded
/// outcome history for the health check.
pub struct ResourceCleaner {
    grammar: Arc<GrammarRegistry>,
    pool: Arc<ParserPool>,
    trees: Arc<TreeManager>,
    memory: Arc<MemoryMonitor>,
    in_flight: AtomicBool,
    history: Mutex<VecDeque<CleanupOutcome>>,
}

impl ResourceCleaner {
    pub fn new(
        grammar: Arc<GrammarRegistry>,
        pool: Arc<ParserPool>,
        trees: Arc<TreeManager>,
        memory: Arc<MemoryMonitor>,
    ) -> Self {
        Self {
            grammar,
            pool,
            trees,
            memory,
            in_flight: AtomicBool::new(false),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
        }
    }

    /// Runs `strategy`. If a cleanup is already in flight, short-circuits
    /// with a failed, zero-effect outcome rather than queuing (§4.5).
    pub fn run(&self, strategy: Strategy) -> CleanupOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(?strategy, "cleanup already in flight, short-circuiting");
            return CleanupOutcome {
                strategy,
                before_mb: 0.0,
                after_mb: 0.0,
                duration_ms: 0,
                success: false,
            };
        }

        let start = Instant::now();
        let before_mb = self.memory.check_memory().rss_mb;

        match strategy {
            Strategy::Basic => {
                self.force_gc_round();
                std::thread::sleep(Duration::from_millis(50));
            }
            Strategy::Aggressive => {
                self.pool.shrink_idle();
                self.pool.reap_leaked();
                for _ in 0..2 {
                    self.force_gc_round();
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
            Strategy::Emergency => {
                self.grammar.clear_cache();
                self.trees.bulk_destroy();
                self.pool.emergency_cleanup();
                for _ in 0..5 {
                    self.force_gc_round();
                    std::thread::sleep(Duration::from_millis(200));
                }
            }
        }

        let after_mb = self.memory.check_memory().rss_mb;
        let duration_ms = start.elapsed().as_millis() as u64;
        let success = after_mb <= before_mb;

        self.memory.mark_cleanup();
        self.in_flight.store(false, Ordering::SeqCst);

        let outcome = CleanupOutcome {
            strategy,
            before_mb,
            after_mb,
            duration_ms,
            success,
        };
        info!(?strategy, before_mb, after_mb, duration_ms, success, "cleanup pass complete");
        self.record(outcome.clone());
        outcome
    }

    fn force_gc_round(&self) {
        self.memory.mark_force_gc();
    }

    fn record(&self, outcome: CleanupOutcome) {
        let mut history = self.history.lock();
        if history.len() >= HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(outcome);
    }

    /// Failure rate > 30% over > 10 recorded runs makes the cleaner unhealthy (§4.5).
    pub fn is_healthy(&self) -> bool {
        let history = self.history.lock();
        if history.len() <= 10 {
            return true;
        }
        let failures = history.iter().filter(|o| !o.success).count();
        (failures as f64 / history.len() as f64) <= 0.3
    }

    pub fn history(&self) -> Vec<CleanupOutcome> {
        self.history.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Profile, QueryConfig};

    fn cleaner() -> ResourceCleaner {
        let config = Arc::new(QueryConfig::for_profile(Profile::Test));
        let grammar = Arc::new(GrammarRegistry::new());
        let pool = Arc::new(ParserPool::new(
            grammar.clone(),
            config.parser_pool_max_idle,
            Duration::from_millis(config.parser_acquire_timeout_ms),
        ));
        let trees = Arc::new(TreeManager::new());
        let memory = Arc::new(MemoryMonitor::new(config));
        ResourceCleaner::new(grammar, pool, trees, memory)
    }

    #[test]
    fn basic_strategy_runs_and_records_history() {
        let cleaner = cleaner();
        let outcome = cleaner.run(Strategy::Basic);
        assert_eq!(outcome.strategy, Strategy::Basic);
        assert_eq!(cleaner.history().len(), 1);
    }

    #[test]
    fn concurrent_run_short_circuits() {
        let cleaner = cleaner();
        cleaner.in_flight.store(true, Ordering::SeqCst);
        let outcome = cleaner.run(Strategy::Basic);
        assert!(!outcome.success);
        assert_eq!(outcome.after_mb, 0.0);
    }

    #[test]
    fn healthy_with_few_recorded_runs() {
        let cleaner = cleaner();
        cleaner.run(Strategy::Basic);
        assert!(cleaner.is_healthy());
    }
}
