//! Memory Monitor (C4, §4.4).
//!
//! Samples process memory on a configurable cadence, keeps a bounded history
//! ring, and classifies the current level/trend against thresholds pulled
//! from [`QueryConfig`] — never hard-coded.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};
use tracing::debug;

use crate::config::QueryConfig;

/// Delta, in MB, above which three consecutive samples are no longer `stable` (§4.4).
const TREND_THRESHOLD_MB: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLevel {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTrend {
    Stable,
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryStatus {
    pub level: MemoryLevel,
    pub heap_used_mb: f64,
    pub heap_total_mb: f64,
    pub rss_mb: f64,
    pub external_mb: f64,
    pub trend: MemoryTrend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeakRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub current: MemoryStatus,
    pub sample_count: usize,
    pub last_cleanup_ago_ms: Option<u64>,
    pub last_force_gc_ago_ms: Option<u64>,
}

struct Sample {
    rss_mb: f64,
    at: std::time::Instant,
}

struct Inner {
    history: VecDeque<Sample>,
    history_size: usize,
    last_cleanup: Option<std::time::Instant>,
    last_force_gc: Option<std::time::Instant>,
    system: System,
    pid: Pid,
}

/// C4: samples RSS via `sysinfo`, classifies level/trend from config thresholds.
pub struct MemoryMonitor {
    config: Arc<QueryConfig>,
    inner: Mutex<Inner>,
}

impl MemoryMonitor {
    pub fn new(config: Arc<QueryConfig>) -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        system.refresh_process(pid);

        Self {
            inner: Mutex::new(Inner {
                history: VecDeque::with_capacity(config.memory_history_size),
                history_size: config.memory_history_size,
                last_cleanup: None,
                last_force_gc: None,
                system,
                pid,
            }),
            config,
        }
    }

    /// Takes a fresh sample, appends it to the bounded history, and returns
    /// the resulting status.
    pub fn check_memory(&self) -> MemoryStatus {
        let mut inner = self.inner.lock();
        inner.system.refresh_process(inner.pid);
        let rss_mb = inner
            .system
            .process(inner.pid)
            .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        while inner.history.len() >= inner.history_size {
            inner.history.pop_front();
        }
        inner.history.push_back(Sample {
            rss_mb,
            at: std::time::Instant::now(),
        });

        let trend = Self::classify_trend(&inner.history);
        let level = if rss_mb >= self.config.memory_critical_mb {
            MemoryLevel::Critical
        } else if rss_mb >= self.config.memory_warning_mb {
            MemoryLevel::Warning
        } else {
            MemoryLevel::Normal
        };

        if level != MemoryLevel::Normal {
            debug!(rss_mb, ?level, ?trend, "memory sample above normal");
        }

        MemoryStatus {
            level,
            heap_used_mb: rss_mb,
            heap_total_mb: rss_mb,
            rss_mb,
            external_mb: 0.0,
            trend,
        }
    }

    fn classify_trend(history: &VecDeque<Sample>) -> MemoryTrend {
        if history.len() < 3 {
            return MemoryTrend::Stable;
        }
        let n = history.len();
        let s0 = history[n - 3].rss_mb;
        let s2 = history[n - 1].rss_mb;
        let delta = s2 - s0;
        if delta > TREND_THRESHOLD_MB {
            MemoryTrend::Increasing
        } else if delta < -TREND_THRESHOLD_MB {
            MemoryTrend::Decreasing
        } else {
            MemoryTrend::Stable
        }
    }

    pub fn should_cleanup(&self) -> bool {
        let status = self.check_memory();
        status.level != MemoryLevel::Normal
    }

    pub fn should_force_gc(&self) -> bool {
        let status = self.check_memory();
        status.level == MemoryLevel::Critical || status.trend == MemoryTrend::Increasing
    }

    pub fn mark_cleanup(&self) {
        self.inner.lock().last_cleanup = Some(std::time::Instant::now());
    }

    pub fn mark_force_gc(&self) {
        self.inner.lock().last_force_gc = Some(std::time::Instant::now());
    }

    pub fn stats(&self) -> MemoryStats {
        let current = self.check_memory();
        let inner = self.inner.lock();
        MemoryStats {
            current,
            sample_count: inner.history.len(),
            last_cleanup_ago_ms: inner.last_cleanup.map(|t| t.elapsed().as_millis() as u64),
            last_force_gc_ago_ms: inner.last_force_gc.map(|t| t.elapsed().as_millis() as u64),
        }
    }

    /// Weighted leak-risk score, bucketed `low`/`medium`/`high` at 40/70 (§4.4).
    pub fn leak_risk_estimate(&self) -> (u32, LeakRisk) {
        let status = self.check_memory();
        let inner = self.inner.lock();

        let mut score = 0u32;
        if status.trend == MemoryTrend::Increasing {
            score += 30;
        }
        if status.level == MemoryLevel::Critical {
            score += 30;
        } else if status.level == MemoryLevel::Warning {
            score += 15;
        }

        if let Some(peak) = inner.history.iter().map(|s| s.rss_mb).fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        }) {
            if (peak - status.rss_mb).abs() < TREND_THRESHOLD_MB {
                score += 15;
            }
        }

        if inner.history.len() >= 4 {
            let mid = inner.history.len() / 2;
            let older: f64 = inner.history.iter().take(mid).map(|s| s.rss_mb).sum::<f64>() / mid as f64;
            let recent: f64 = inner.history.iter().skip(mid).map(|s| s.rss_mb).sum::<f64>()
                / (inner.history.len() - mid) as f64;
            if older > 0.0 && recent >= older * 1.2 {
                score += 25;
            }
        }

        let bucket = if score >= 70 {
            LeakRisk::High
        } else if score >= 40 {
            LeakRisk::Medium
        } else {
            LeakRisk::Low
        };
        (score, bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Profile, QueryConfig};

    fn monitor() -> MemoryMonitor {
        MemoryMonitor::new(Arc::new(QueryConfig::for_profile(Profile::Test)))
    }

    #[test]
    fn stable_trend_within_three_samples_under_threshold() {
        let history: VecDeque<Sample> = [100.0, 105.0, 108.0]
            .iter()
            .map(|v| Sample {
                rss_mb: *v,
                at: std::time::Instant::now(),
            })
            .collect();
        assert_eq!(MemoryMonitor::classify_trend(&history), MemoryTrend::Stable);
    }

    #[test]
    fn increasing_trend_when_delta_exceeds_threshold() {
        let history: VecDeque<Sample> = [100.0, 110.0, 130.0]
            .iter()
            .map(|v| Sample {
                rss_mb: *v,
                at: std::time::Instant::now(),
            })
            .collect();
        assert_eq!(
            MemoryMonitor::classify_trend(&history),
            MemoryTrend::Increasing
        );
    }

    #[test]
    fn fewer_than_three_samples_is_always_stable() {
        let history: VecDeque<Sample> = [100.0, 500.0]
            .iter()
            .map(|v| Sample {
                rss_mb: *v,
                at: std::time::Instant::now(),
            })
            .collect();
        assert_eq!(MemoryMonitor::classify_trend(&history), MemoryTrend::Stable);
    }

    #[test]
    fn check_memory_reports_normal_for_fresh_process_under_test_thresholds() {
        let monitor = monitor();
        let status = monitor.check_memory();
        assert!(status.rss_mb >= 0.0);
        assert_eq!(status.level, MemoryLevel::Normal);
    }

    #[test]
    fn leak_risk_starts_low() {
        let monitor = monitor();
        let (_, bucket) = monitor.leak_risk_estimate();
        assert_eq!(bucket, LeakRisk::Low);
    }
}
