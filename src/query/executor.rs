//! Query Executor (C11, §4.11).
//!
//! Orchestrates C6 → C7 → C8 → native tree-sitter compile/execute → C9 → C10
//! against a single syntax tree, attaching performance metrics.

use std::collections::HashMap;
use std::time::Instant;

use regex::Regex;
use tree_sitter::{Query, QueryCursor};

use crate::config::QueryConfig;
use crate::query::compile_cache::QueryCompileCache;
use crate::query::regex_cache::RegexCache;
use crate::query::types::{
    Directive, DirectiveOutcome, EnhancedMatch, Position, Predicate, PredicateKind, PerformanceMetrics, QueryFeatures,
};
use crate::query::validator::{self, ValidationResult};
use crate::query::{directives, optimizer, parser, predicates};
use crate::tree::SyntaxTree;

pub struct ExecutionResult {
    pub success: bool,
    pub matches: Vec<EnhancedMatch>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub predicates: Vec<Predicate>,
    pub directives: Vec<Directive>,
    pub query_features: QueryFeatures,
    pub validation: ValidationResult,
    pub performance: PerformanceMetrics,
}

pub fn execute(
    source: &str,
    tree: &SyntaxTree,
    grammar: &tree_sitter::Language,
    language_tag: &str,
    config: &QueryConfig,
    cache: Option<&QueryCompileCache>,
    parse_time_ms: u64,
) -> ExecutionResult {
    let total_start = Instant::now();
    let query_start = Instant::now();

    let parsed = parser::parse(source);

    // Open question 3: validate before the native compile.
    let validation = validator::validate(source, &parsed.query, config, &parsed.warnings);
    if !validation.is_valid {
        return ExecutionResult {
            success: false,
            matches: Vec::new(),
            errors: validation.errors.clone(),
            warnings: validation.warnings.clone(),
            predicates: parsed.query.predicates,
            directives: parsed.query.directives,
            query_features: parsed.query.features,
            validation,
            performance: finalize_metrics(parse_time_ms, query_start, total_start, 0, 0, 0),
        };
    }

    // §4.11 step 3: a match/not-match predicate whose pattern never compiles
    // short-circuits the whole query rather than silently matching without it.
    let has_invalid_regex_predicate = parsed
        .query
        .predicates
        .iter()
        .any(|p| p.kind == PredicateKind::Match && Regex::new(p.value.as_single().unwrap_or_default()).is_err());
    if has_invalid_regex_predicate {
        return ExecutionResult {
            success: false,
            matches: Vec::new(),
            errors: vec!["Invalid regex pattern".to_string()],
            warnings: validation.warnings.clone(),
            predicates: parsed.query.predicates,
            directives: parsed.query.directives,
            query_features: parsed.query.features,
            validation,
            performance: finalize_metrics(parse_time_ms, query_start, total_start, 0, 0, 0),
        };
    }

    let optimized = if config.optimization_enabled {
        optimizer::optimize(&parsed.query, config)
    } else {
        parsed.query
    };

    let compiled = if config.caching_enabled {
        cache
            .expect("caching_enabled requires a compile cache")
            .get_or_compile(language_tag, &optimized.original_source, grammar)
            .map(|(q, hit)| (q, hit))
    } else {
        Query::new(grammar, &optimized.original_source)
            .map(|q| (std::sync::Arc::new(q), false))
            .map_err(|e| e.to_string())
    };

    let (query, cache_hit) = match compiled {
        Ok(pair) => pair,
        Err(e) => {
            return ExecutionResult {
                success: false,
                matches: Vec::new(),
                errors: vec![format!("query compile error: {e}")],
                warnings: validation.warnings.clone(),
                predicates: optimized.predicates,
                directives: optimized.directives,
                query_features: optimized.features,
                validation,
                performance: finalize_metrics(parse_time_ms, query_start, total_start, 0, 0, 0),
            };
        }
    };
    crate::metrics::metrics().record_query_cache_lookup(cache_hit);

    let mut matches = materialize_matches(&query, tree);
    let match_count = matches.len();

    let mut regex_cache = RegexCache::new();
    let mut predicates_processed = 0usize;
    if config.predicates_enabled && !optimized.predicates.is_empty() {
        let output = predicates::apply(matches, &optimized.predicates, &mut regex_cache);
        matches = output.matches;
        predicates_processed = output.outcomes.len();
    }

    let mut directive_outcomes: Vec<DirectiveOutcome> = Vec::new();
    let mut directives_applied = 0usize;
    let mut directive_error = false;
    if config.directives_enabled && !optimized.directives.is_empty() {
        let output = directives::apply(matches, &optimized.directives, &mut regex_cache);
        matches = output.matches;
        directives_applied = output.outcomes.len();
        directive_error = output.had_error;
        directive_outcomes = output.outcomes;
    }

    for m in matches.iter_mut() {
        m.directive_outcomes = directive_outcomes.clone();
    }

    let errors: Vec<String> = directive_outcomes
        .iter()
        .filter_map(|o| o.error.clone())
        .collect();

    ExecutionResult {
        success: !directive_error,
        matches,
        errors,
        warnings: validation.warnings.clone(),
        predicates: optimized.predicates,
        directives: optimized.directives,
        query_features: optimized.features,
        validation,
        performance: finalize_metrics(
            parse_time_ms,
            query_start,
            total_start,
            match_count,
            predicates_processed,
            directives_applied,
        ),
    }
}

fn materialize_matches(query: &Query, tree: &SyntaxTree) -> Vec<EnhancedMatch> {
    let capture_names = query.capture_names();
    let mut cursor = QueryCursor::new();
    let source_bytes = tree.source().as_bytes();
    let mut result = Vec::new();

    let mut query_matches = cursor.matches(query, tree.root_node(), source_bytes);
    let mut native_match_index = 0usize;
    while let Some(m) = query_matches.next() {
        for capture in m.captures {
            let name = capture_names
                .get(capture.index as usize)
                .copied()
                .unwrap_or("")
                .to_string();
            let node = capture.node;
            let text = node.utf8_text(source_bytes).unwrap_or("").to_string();
            result.push(EnhancedMatch {
                capture_name: name,
                node_type: node.kind().to_string(),
                original_text: text.clone(),
                processed_text: text,
                start: Position::new(node.start_position().row, node.start_position().column),
                end: Position::new(node.end_position().row, node.end_position().column),
                metadata: HashMap::new(),
                predicate_outcomes: Vec::new(),
                directive_outcomes: Vec::new(),
                adjacent_nodes: Vec::new(),
                native_match_index,
            });
        }
        native_match_index += 1;
    }
    result
}

fn finalize_metrics(
    parse_time_ms: u64,
    query_start: Instant,
    total_start: Instant,
    match_count: usize,
    predicates_processed: usize,
    directives_applied: usize,
) -> PerformanceMetrics {
    // §4.11: query_time is floored at 1ms so metrics never read zero for a
    // measurable operation.
    let query_time_ms = query_start.elapsed().as_millis().max(1) as u64;
    let total_time_ms = parse_time_ms + total_start.elapsed().as_millis() as u64;
    PerformanceMetrics {
        parse_time_ms,
        query_time_ms,
        total_time_ms,
        memory_usage_mb: 0.0,
        match_count,
        predicates_processed,
        directives_applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Profile, QueryConfig};
    use crate::tree::TreeManager;

    fn javascript() -> tree_sitter::Language {
        tree_sitter_javascript::LANGUAGE.into()
    }

    fn tree_for(code: &str) -> SyntaxTree {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&javascript()).unwrap();
        TreeManager::new().create_tree(&mut parser, code).unwrap()
    }

    #[test]
    fn invalid_regex_in_match_predicate_short_circuits() {
        let grammar = javascript();
        let tree = tree_for("function foo() {}");
        let config = QueryConfig::for_profile(Profile::Test);
        let result = execute(
            r#"((identifier) @id (#match? @id "[invalid"))"#,
            &tree,
            &grammar,
            "javascript",
            &config,
            None,
            0,
        );
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Invalid regex pattern".to_string()]);
        assert!(result.matches.is_empty());
    }

    #[test]
    fn valid_query_executes_successfully() {
        let grammar = javascript();
        let tree = tree_for("function foo() {}");
        let config = QueryConfig::for_profile(Profile::Test);
        let result = execute("((identifier) @id)", &tree, &grammar, "javascript", &config, None, 0);
        assert!(result.success);
        assert!(result.matches.iter().any(|m| m.original_text == "foo"));
    }
}
