//! Process-wide query policy (§3 Query Config, §6 Configuration surface).
//!
//! Resolved once at startup from an environment profile, with individual
//! `QUERY_*` environment variables able to override any field. Mutable only
//! through [`ConfigManager`], mirroring the teacher's `ServerConfig::from_args`
//! precedence of explicit flags over environment over hard-coded defaults.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::query::types::{DirectiveKind, PredicateKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Production,
    Development,
    Test,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Profile::Production),
            "development" | "dev" => Ok(Profile::Development),
            "test" => Ok(Profile::Test),
            other => Err(format!("unknown profile: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub predicates_enabled: bool,
    pub directives_enabled: bool,
    pub max_predicates_per_query: usize,
    pub max_directives_per_query: usize,
    pub allowed_predicates: HashSet<PredicateKind>,
    pub allowed_directives: HashSet<DirectiveKind>,
    pub caching_enabled: bool,
    pub cache_size: usize,
    pub cache_ttl_ms: u64,
    pub optimization_enabled: bool,

    /// Resident memory, in MB, at/above which [`crate::memory::MemoryMonitor`]
    /// reports `warning`.
    pub memory_warning_mb: f64,
    /// Resident memory, in MB, at/above which it reports `critical`.
    pub memory_critical_mb: f64,
    /// Sampling cadence for the background memory sampler.
    pub memory_sample_interval_ms: u64,
    /// Number of samples retained in the memory history ring.
    pub memory_history_size: usize,
    /// Pool-size bound enforced by the Parser Pool (C2), also used by the
    /// Memory Monitor's health estimate.
    pub parser_pool_max_idle: usize,
    /// Active-parser checkout timeout before the reaper forcibly reclaims it.
    pub parser_acquire_timeout_ms: u64,
    /// Maximum accepted `code` length, in bytes (§6 "code length <= max").
    pub max_code_length: usize,
}

/// Hard cap on `query` + `queries` per request, independent of profile (§6, §4.12).
pub const MAX_QUERIES_PER_REQUEST: usize = 10;

impl QueryConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let all_predicates: HashSet<PredicateKind> = PredicateKind::ALL.iter().copied().collect();
        let all_directives: HashSet<DirectiveKind> = DirectiveKind::ALL.iter().copied().collect();

        match profile {
            Profile::Production => QueryConfig {
                predicates_enabled: true,
                directives_enabled: true,
                max_predicates_per_query: 20,
                max_directives_per_query: 10,
                allowed_predicates: all_predicates,
                allowed_directives: all_directives,
                caching_enabled: true,
                cache_size: 256,
                cache_ttl_ms: 60_000,
                optimization_enabled: true,
                memory_warning_mb: 512.0,
                memory_critical_mb: 768.0,
                memory_sample_interval_ms: 30_000,
                memory_history_size: 20,
                parser_pool_max_idle: 16,
                parser_acquire_timeout_ms: 30_000,
                max_code_length: 1_000_000,
            },
            Profile::Development => QueryConfig {
                predicates_enabled: true,
                directives_enabled: true,
                max_predicates_per_query: 50,
                max_directives_per_query: 25,
                allowed_predicates: all_predicates,
                allowed_directives: all_directives,
                caching_enabled: false,
                cache_size: 32,
                cache_ttl_ms: 5_000,
                optimization_enabled: true,
                memory_warning_mb: 1024.0,
                memory_critical_mb: 1536.0,
                memory_sample_interval_ms: 10_000,
                memory_history_size: 20,
                parser_pool_max_idle: 8,
                parser_acquire_timeout_ms: 60_000,
                max_code_length: 2_000_000,
            },
            Profile::Test => QueryConfig {
                predicates_enabled: true,
                directives_enabled: true,
                max_predicates_per_query: 100,
                max_directives_per_query: 100,
                allowed_predicates: all_predicates,
                allowed_directives: all_directives,
                caching_enabled: false,
                cache_size: 8,
                cache_ttl_ms: 1_000,
                optimization_enabled: false,
                memory_warning_mb: 2048.0,
                memory_critical_mb: 4096.0,
                memory_sample_interval_ms: 1_000,
                memory_history_size: 5,
                parser_pool_max_idle: 4,
                parser_acquire_timeout_ms: 5_000,
                max_code_length: 500_000,
            },
        }
    }

    /// Applies `QUERY_*` environment overrides on top of a profile's defaults.
    pub fn from_env(profile: Profile) -> Self {
        let mut config = Self::for_profile(profile);

        if let Ok(v) = std::env::var("QUERY_MAX_PREDICATES_PER_QUERY") {
            if let Ok(n) = v.parse() {
                config.max_predicates_per_query = n;
            }
        }
        if let Ok(v) = std::env::var("QUERY_MAX_DIRECTIVES_PER_QUERY") {
            if let Ok(n) = v.parse() {
                config.max_directives_per_query = n;
            }
        }
        if let Ok(v) = std::env::var("QUERY_CACHING_ENABLED") {
            if let Ok(b) = v.parse() {
                config.caching_enabled = b;
            }
        }
        if let Ok(v) = std::env::var("QUERY_CACHE_SIZE") {
            if let Ok(n) = v.parse() {
                config.cache_size = n;
            }
        }
        if let Ok(v) = std::env::var("QUERY_OPTIMIZATION_ENABLED") {
            if let Ok(b) = v.parse() {
                config.optimization_enabled = b;
            }
        }
        if let Ok(v) = std::env::var("QUERY_MEMORY_WARNING_MB") {
            if let Ok(n) = v.parse() {
                config.memory_warning_mb = n;
            }
        }
        if let Ok(v) = std::env::var("QUERY_MEMORY_CRITICAL_MB") {
            if let Ok(n) = v.parse() {
                config.memory_critical_mb = n;
            }
        }
        if let Ok(v) = std::env::var("QUERY_PARSER_POOL_MAX_IDLE") {
            if let Ok(n) = v.parse() {
                config.parser_pool_max_idle = n;
            }
        }
        if let Ok(v) = std::env::var("QUERY_MAX_CODE_LENGTH") {
            if let Ok(n) = v.parse() {
                config.max_code_length = n;
            }
        }

        config
    }

    /// Resolves the profile from `APP_ENV` (falls back to `development`).
    pub fn from_environment_profile() -> Self {
        let profile = std::env::var("APP_ENV")
            .ok()
            .and_then(|v| Profile::from_str(&v).ok())
            .unwrap_or(Profile::Development);
        Self::from_env(profile)
    }
}

/// Process-wide, mutable-only-through-this-handle configuration snapshot.
///
/// Readers clone the `Arc<QueryConfig>` once per request so a config change
/// mid-request never produces a torn read (§5 "readers use a consistent
/// snapshot per request").
#[derive(Debug, Clone)]
pub struct ConfigManager {
    inner: Arc<RwLock<Arc<QueryConfig>>>,
}

impl ConfigManager {
    pub fn new(config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn snapshot(&self) -> Arc<QueryConfig> {
        self.inner.read().clone()
    }

    pub fn update(&self, config: QueryConfig) {
        *self.inner.write() = Arc::new(config);
    }
}
