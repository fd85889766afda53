//! Service Coordinator (C12, §4.12).
//!
//! The only component that touches every other one: validates a request,
//! gates on memory pressure, brackets a parser/tree checkout around the
//! query pipeline (C11, once per query), and aggregates the per-query
//! results into the wire response shapes (§6).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cleanup::{ResourceCleaner, Strategy};
use crate::config::{ConfigManager, QueryConfig, MAX_QUERIES_PER_REQUEST};
use crate::error::ServiceError;
use crate::grammar::{GrammarRegistry, Language, RegistryStatus};
use crate::memory::{MemoryLevel, MemoryMonitor, MemoryStats};
use crate::pool::{ParserPool, PoolStats};
use crate::query::compile_cache::QueryCompileCache;
use crate::query::executor;
use crate::query::types::{Directive, EnhancedMatch, PerformanceMetrics, Predicate, Position, QueryFeatures};
use crate::query::validator::ValidationResult;
use crate::tree::TreeManager;

#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub queries: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct MatchResult {
    pub capture_name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub text: String,
    pub start_position: Position,
    pub end_position: Position,
}

impl From<EnhancedMatch> for MatchResult {
    fn from(m: EnhancedMatch) -> Self {
        Self {
            capture_name: m.capture_name,
            node_type: m.node_type,
            text: m.original_text,
            start_position: m.start,
            end_position: m.end,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ParseResponse {
    pub success: bool,
    pub matches: Vec<MatchResult>,
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdvancedParseRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub queries: Option<Vec<String>>,
    #[serde(default, rename = "enableAdvancedFeatures")]
    pub enable_advanced_features: bool,
    #[serde(default, rename = "processDirectives")]
    pub process_directives: bool,
    #[serde(default, rename = "includeMetadata")]
    pub include_metadata: bool,
    #[serde(default, rename = "maxResults")]
    pub max_results: Option<usize>,
    #[serde(default, rename = "timeout")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct AdvancedMatchResult {
    pub capture_name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub text: String,
    pub processed_text: String,
    pub start_position: Position,
    pub end_position: Position,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct PredicateSummary {
    pub name: String,
    pub capture_name: String,
}

impl From<&Predicate> for PredicateSummary {
    fn from(p: &Predicate) -> Self {
        Self {
            name: p.surface_name(),
            capture_name: p.capture_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DirectiveSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_name: Option<String>,
}

impl From<&Directive> for DirectiveSummary {
    fn from(d: &Directive) -> Self {
        Self {
            name: d.kind.as_str().to_string(),
            capture_name: d.capture_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdvancedParseResponse {
    pub success: bool,
    pub matches: Vec<AdvancedMatchResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub predicates: Vec<PredicateSummary>,
    pub directives: Vec<DirectiveSummary>,
    #[serde(rename = "queryFeatures")]
    pub query_features: QueryFeatures,
    #[serde(rename = "validationResults")]
    pub validation_results: ValidationResult,
    pub performance: PerformanceMetrics,
}

#[derive(Debug, Serialize)]
pub struct ActiveResources {
    pub trees: usize,
    pub parsers: usize,
}

#[derive(Debug, Serialize)]
pub struct ServiceStats {
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub active_resources: ActiveResources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Warning,
    Error,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthState,
    pub memory: MemoryStats,
    pub parser_pool: PoolStats,
    pub language_manager: RegistryStatus,
    pub service: ServiceStats,
}

/// Every surviving match across a multi-query request, plus the merged
/// diagnostics that feed both wire response shapes.
struct Aggregated {
    matches: Vec<EnhancedMatch>,
    errors: Vec<String>,
    warnings: Vec<String>,
    predicates: Vec<Predicate>,
    directives: Vec<Directive>,
    query_features: QueryFeatures,
    validation: ValidationResult,
    performance: PerformanceMetrics,
    success: bool,
}

fn gather_queries(query: Option<String>, queries: Option<Vec<String>>) -> Result<Vec<String>, ServiceError> {
    let mut all = Vec::new();
    if let Some(q) = query {
        all.push(q);
    }
    if let Some(mut qs) = queries {
        all.append(&mut qs);
    }
    if all.is_empty() {
        return Err(ServiceError::Validation(
            "at least one of `query` or `queries` is required".to_string(),
        ));
    }
    if all.len() > MAX_QUERIES_PER_REQUEST {
        return Err(ServiceError::Validation(format!(
            "total query count {} exceeds maximum {MAX_QUERIES_PER_REQUEST}",
            all.len()
        )));
    }
    Ok(all)
}

/// Deduplicates by `(capture_name, start, end, text)`, merges diagnostics
/// in query order, and derives the top-level `success` flag (§9 Open
/// Question, §4.12: at least one query succeeded and no query errored).
fn aggregate(results: Vec<executor::ExecutionResult>, memory_usage_mb: f64) -> Aggregated {
    // Empty code runs zero queries (§4.12 step 4, §8 S7) and is vacuously
    // successful; otherwise at least one query must have succeeded and none
    // may have errored.
    let success = results.is_empty()
        || (results.iter().any(|r| r.success) && results.iter().all(|r| r.errors.is_empty()));

    let mut seen = HashSet::new();
    let mut matches = Vec::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut predicates = Vec::new();
    let mut directives = Vec::new();
    let mut query_features = QueryFeatures::default();
    let mut validation = ValidationResult {
        is_valid: true,
        errors: Vec::new(),
        warnings: Vec::new(),
        suggestions: Vec::new(),
    };
    let mut performance = PerformanceMetrics::default();

    for r in results {
        for m in r.matches {
            let key = (m.capture_name.clone(), m.start, m.end, m.original_text.clone());
            if seen.insert(key) {
                matches.push(m);
            }
        }
        errors.extend(r.errors);
        warnings.extend(r.warnings);
        predicates.extend(r.predicates);
        directives.extend(r.directives);

        query_features.has_predicates |= r.query_features.has_predicates;
        query_features.has_directives |= r.query_features.has_directives;
        query_features.has_anchors |= r.query_features.has_anchors;
        query_features.has_alternations |= r.query_features.has_alternations;
        query_features.has_quantifiers |= r.query_features.has_quantifiers;
        query_features.has_wildcards |= r.query_features.has_wildcards;
        query_features.predicate_count += r.query_features.predicate_count;
        query_features.directive_count += r.query_features.directive_count;

        validation.is_valid &= r.validation.is_valid;
        validation.errors.extend(r.validation.errors);
        validation.warnings.extend(r.validation.warnings);
        validation.suggestions.extend(r.validation.suggestions);

        performance.parse_time_ms = performance.parse_time_ms.max(r.performance.parse_time_ms);
        performance.query_time_ms += r.performance.query_time_ms;
        performance.total_time_ms += r.performance.total_time_ms;
        performance.match_count += r.performance.match_count;
        performance.predicates_processed += r.performance.predicates_processed;
        performance.directives_applied += r.performance.directives_applied;
    }
    query_features.classify();
    performance.memory_usage_mb = memory_usage_mb;

    Aggregated {
        matches,
        errors,
        warnings,
        predicates,
        directives,
        query_features,
        validation,
        performance,
        success,
    }
}

/// C12: the single entry point the HTTP layer calls into.
pub struct Coordinator {
    grammar: Arc<GrammarRegistry>,
    pool: Arc<ParserPool>,
    trees: Arc<TreeManager>,
    memory: Arc<MemoryMonitor>,
    cleaner: Arc<ResourceCleaner>,
    query_cache: Arc<QueryCompileCache>,
    config: ConfigManager,
    request_count: AtomicU64,
    error_count: AtomicU64,
}

impl Coordinator {
    pub fn new(config: ConfigManager) -> Self {
        let snapshot = config.snapshot();
        let grammar = Arc::new(GrammarRegistry::new());
        let pool = Arc::new(ParserPool::new(
            grammar.clone(),
            snapshot.parser_pool_max_idle,
            Duration::from_millis(snapshot.parser_acquire_timeout_ms),
        ));
        let trees = Arc::new(TreeManager::new());
        let query_cache = Arc::new(QueryCompileCache::new(snapshot.cache_size, snapshot.cache_ttl_ms));
        let memory = Arc::new(MemoryMonitor::new(snapshot));
        let cleaner = Arc::new(ResourceCleaner::new(
            grammar.clone(),
            pool.clone(),
            trees.clone(),
            memory.clone(),
        ));

        Self {
            grammar,
            pool,
            trees,
            memory,
            cleaner,
            query_cache,
            config,
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn grammar(&self) -> &Arc<GrammarRegistry> {
        &self.grammar
    }

    pub fn pool(&self) -> &Arc<ParserPool> {
        &self.pool
    }

    pub fn memory(&self) -> &Arc<MemoryMonitor> {
        &self.memory
    }

    pub fn cleaner(&self) -> &Arc<ResourceCleaner> {
        &self.cleaner
    }

    pub fn process_request(&self, req: ParseRequest) -> Result<ParseResponse, ServiceError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let queries = gather_queries(req.query, req.queries);
        let result = queries.and_then(|qs| self.execute_queries(&req.language, &req.code, qs, None));

        match result {
            Ok((results, mem_mb)) => {
                let agg = aggregate(results, mem_mb);
                Ok(ParseResponse {
                    success: agg.success,
                    matches: agg.matches.into_iter().map(MatchResult::from).collect(),
                    errors: agg.errors,
                })
            }
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn process_advanced_request(&self, req: AdvancedParseRequest) -> Result<AdvancedParseResponse, ServiceError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let mut override_config = (*self.config.snapshot()).clone();
        if !req.enable_advanced_features {
            override_config.predicates_enabled = false;
            override_config.directives_enabled = false;
        } else if !req.process_directives {
            override_config.directives_enabled = false;
        }

        let queries = gather_queries(req.query, req.queries);
        let result = queries.and_then(|qs| {
            self.execute_queries(&req.language, &req.code, qs, Some((override_config, req.timeout_ms)))
        });

        match result {
            Ok((results, mem_mb)) => {
                let mut agg = aggregate(results, mem_mb);
                if let Some(max) = req.max_results {
                    agg.matches.truncate(max);
                }
                let predicates = agg.predicates.iter().map(PredicateSummary::from).collect();
                let directives = agg.directives.iter().map(DirectiveSummary::from).collect();
                let matches = agg
                    .matches
                    .into_iter()
                    .map(|m| AdvancedMatchResult {
                        capture_name: m.capture_name,
                        node_type: m.node_type,
                        text: m.original_text,
                        processed_text: m.processed_text,
                        start_position: m.start,
                        end_position: m.end,
                        metadata: if req.include_metadata { m.metadata } else { HashMap::new() },
                    })
                    .collect();

                Ok(AdvancedParseResponse {
                    success: agg.success,
                    matches,
                    errors: agg.errors,
                    warnings: agg.warnings,
                    predicates,
                    directives,
                    query_features: agg.query_features,
                    validation_results: agg.validation,
                    performance: agg.performance,
                })
            }
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Validates the request, gates on memory pressure, and brackets a
    /// parser/tree checkout around one C11 run per query. The checkout is
    /// released on every exit path once acquired (§8 invariant 1). Empty
    /// `code` is a valid request (§6: "code a string (may be empty)") and
    /// short-circuits to an empty successful result without ever acquiring
    /// a parser or tree (§4.12 step 4, §8 S7).
    fn execute_queries(
        &self,
        language: &str,
        code: &str,
        queries: Vec<String>,
        advanced: Option<(QueryConfig, Option<u64>)>,
    ) -> Result<(Vec<executor::ExecutionResult>, f64), ServiceError> {
        let config = match &advanced {
            Some((c, _)) => Arc::new(c.clone()),
            None => self.config.snapshot(),
        };
        if code.len() > config.max_code_length {
            return Err(ServiceError::Validation(format!(
                "code length {} exceeds maximum {}",
                code.len(),
                config.max_code_length
            )));
        }

        let lang: Language = language.parse()?;
        if !self.grammar.is_supported(lang) {
            return Err(ServiceError::UnsupportedLanguage(language.to_string()));
        }

        if self.memory.check_memory().level == MemoryLevel::Critical {
            self.cleaner.run(Strategy::Emergency);
            if self.memory.check_memory().level == MemoryLevel::Critical {
                return Err(ServiceError::Memory(
                    "service is under critical memory pressure".to_string(),
                ));
            }
        }

        if code.is_empty() {
            return Ok((Vec::new(), self.memory.check_memory().rss_mb));
        }

        let grammar_handle = self.grammar.get(lang)?;
        let mut handle = self.pool.acquire(lang)?;

        let parse_start = Instant::now();
        let tree_result = self.trees.create_tree(handle.parser_mut(), code);
        let parse_time_ms = parse_start.elapsed().as_millis() as u64;

        let tree = match tree_result {
            Ok(t) => t,
            Err(e) => {
                self.pool.release(handle);
                return Err(e);
            }
        };

        let timeout = advanced.and_then(|(_, t)| t).map(Duration::from_millis);
        let budget_start = Instant::now();
        let mut results = Vec::with_capacity(queries.len());
        let mut skipped = 0usize;
        for q in &queries {
            if let Some(limit) = timeout {
                if budget_start.elapsed() >= limit {
                    skipped += 1;
                    continue;
                }
            }
            results.push(executor::execute(
                q,
                &tree,
                &grammar_handle,
                language,
                &config,
                Some(&self.query_cache),
                parse_time_ms,
            ));
        }

        self.trees.destroy_tree(tree);
        self.pool.release(handle);

        if skipped > 0 {
            if let Some(last) = results.last_mut() {
                last.warnings
                    .push(format!("request timeout reached, {skipped} of {} queries skipped", queries.len()));
            }
        }

        let mem_mb = self.memory.check_memory().rss_mb;
        Ok((results, mem_mb))
    }

    pub fn stats(&self) -> ServiceStats {
        let request_count = self.request_count.load(Ordering::Relaxed);
        let error_count = self.error_count.load(Ordering::Relaxed);
        let error_rate = if request_count == 0 {
            0.0
        } else {
            error_count as f64 / request_count as f64
        };
        ServiceStats {
            request_count,
            error_count,
            error_rate,
            active_resources: ActiveResources {
                trees: self.trees.active_count(),
                parsers: self.pool.stats().active_count,
            },
        }
    }

    pub fn health(&self) -> HealthResponse {
        let memory = self.memory.stats();
        let parser_pool = self.pool.stats();
        let language_manager = self.grammar.status();
        let service = self.stats();

        let status = if memory.current.level == MemoryLevel::Critical || !self.cleaner.is_healthy() {
            HealthState::Error
        } else if memory.current.level == MemoryLevel::Warning || !self.pool.is_healthy() {
            HealthState::Warning
        } else {
            HealthState::Healthy
        };

        HealthResponse {
            status,
            memory,
            parser_pool,
            language_manager,
            service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    fn coordinator() -> Coordinator {
        Coordinator::new(ConfigManager::new(QueryConfig::for_profile(Profile::Test)))
    }

    #[test]
    fn basic_request_returns_matches_for_simple_query() {
        let coordinator = coordinator();
        let req = ParseRequest {
            language: "javascript".to_string(),
            code: "function foo() {}".to_string(),
            query: Some("((identifier) @id)".to_string()),
            queries: None,
        };
        let response = coordinator.process_request(req).unwrap();
        assert!(response.success);
        assert!(response.matches.iter().any(|m| m.text == "foo"));
        assert_eq!(coordinator.trees.active_count(), 0);
    }

    #[test]
    fn empty_code_succeeds_with_no_matches_without_acquiring_a_parser() {
        let coordinator = coordinator();
        let req = ParseRequest {
            language: "javascript".to_string(),
            code: String::new(),
            query: Some("((identifier) @id)".to_string()),
            queries: None,
        };
        let response = coordinator.process_request(req).unwrap();
        assert!(response.success);
        assert!(response.matches.is_empty());
        assert!(response.errors.is_empty());
        assert_eq!(coordinator.pool.stats().active_count, 0);
        assert_eq!(coordinator.trees.active_count(), 0);
    }

    #[test]
    fn unsupported_language_is_rejected() {
        let coordinator = coordinator();
        let req = ParseRequest {
            language: "cobol".to_string(),
            code: "x".to_string(),
            query: Some("((identifier) @id)".to_string()),
            queries: None,
        };
        let err = coordinator.process_request(req).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedLanguage");
    }

    #[test]
    fn too_many_queries_is_rejected() {
        let coordinator = coordinator();
        let req = ParseRequest {
            language: "javascript".to_string(),
            code: "let a = 1;".to_string(),
            query: None,
            queries: Some(vec!["((identifier) @id)".to_string(); MAX_QUERIES_PER_REQUEST + 1]),
        };
        let err = coordinator.process_request(req).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn oversized_code_is_rejected() {
        let coordinator = coordinator();
        let req = ParseRequest {
            language: "javascript".to_string(),
            code: "a".repeat(coordinator.config.snapshot().max_code_length + 1),
            query: Some("((identifier) @id)".to_string()),
            queries: None,
        };
        let err = coordinator.process_request(req).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn advanced_request_respects_max_results_truncation() {
        let coordinator = coordinator();
        let req = AdvancedParseRequest {
            language: "javascript".to_string(),
            code: "let a = 1; let b = 2; let c = 3;".to_string(),
            query: Some("((identifier) @id)".to_string()),
            queries: None,
            enable_advanced_features: true,
            process_directives: true,
            include_metadata: true,
            max_results: Some(1),
            timeout_ms: None,
        };
        let response = coordinator.process_advanced_request(req).unwrap();
        assert_eq!(response.matches.len(), 1);
    }

    #[test]
    fn stats_track_request_and_error_counts() {
        let coordinator = coordinator();
        let _ = coordinator.process_request(ParseRequest {
            language: "cobol".to_string(),
            code: "x".to_string(),
            query: Some("((identifier) @id)".to_string()),
            queries: None,
        });
        let stats = coordinator.stats();
        assert_eq!(stats.request_count, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.error_rate, 1.0);
    }

    #[test]
    fn health_starts_healthy() {
        let coordinator = coordinator();
        assert_eq!(coordinator.health().status, HealthState::Healthy);
    }
}
