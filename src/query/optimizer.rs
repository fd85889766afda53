//! Query Optimizer (C8, §4.8).
//!
//! Pure, idempotent, order-preserving rewrites over a [`ParsedQuery`]. Never
//! invents captures, drops predicates/directives, or reorders them — their
//! visible order is part of contract semantics.

use regex::Regex;
use std::collections::HashMap;

use crate::config::QueryConfig;
use crate::query::types::{Directive, DirectiveKind, ParsedQuery, Predicate, PredicateKind, PredicateValue, Quantifier};

pub fn optimize(query: &ParsedQuery, config: &QueryConfig) -> ParsedQuery {
    if !config.optimization_enabled {
        return query.clone();
    }

    let predicates = fuse_equality(&query.predicates);
    let directives = merge_strips(&query.directives);
    let predicates = regex_peephole(predicates);
    let original_source = substitute_wildcards(&query.original_source);

    let mut rewritten = ParsedQuery {
        original_source,
        patterns: query.patterns.clone(),
        predicates,
        directives,
        features: query.features,
    };
    rewritten.features.has_predicates = !rewritten.predicates.is_empty();
    rewritten.features.has_directives = !rewritten.directives.is_empty();
    rewritten.features.predicate_count = rewritten.predicates.len();
    rewritten.features.directive_count = rewritten.directives.len();
    rewritten.features.classify();
    rewritten
}

/// Groups non-negated `eq` predicates by capture; groups of 3+ collapse into
/// a single `any-of`, values kept in first-appearance order. All other
/// predicates pass through untouched, in their original relative order.
fn fuse_equality(predicates: &[Predicate]) -> Vec<Predicate> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, p) in predicates.iter().enumerate() {
        if p.kind == PredicateKind::Eq && !p.negated && p.quantifier == Quantifier::All {
            groups.entry(p.capture_name.clone()).or_default().push(i);
        }
    }

    let fusable: HashMap<String, Vec<usize>> = groups
        .into_iter()
        .filter(|(_, indices)| indices.len() >= 3)
        .collect();

    let mut emitted_fusion_for: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut result = Vec::with_capacity(predicates.len());

    for (i, p) in predicates.iter().enumerate() {
        if let Some(indices) = fusable.get(&p.capture_name) {
            if indices.contains(&i) {
                if emitted_fusion_for.insert(p.capture_name.clone()) {
                    let values: Vec<String> = indices
                        .iter()
                        .filter_map(|&j| predicates[j].value.as_single().map(str::to_string))
                        .collect();
                    result.push(Predicate {
                        kind: PredicateKind::AnyOf,
                        capture_name: p.capture_name.clone(),
                        value: PredicateValue::List(values),
                        negated: false,
                        quantifier: Quantifier::All,
                        position: p.position,
                    });
                }
                continue;
            }
        }
        result.push(p.clone());
    }
    result
}

/// Groups `strip` directives by capture, joining their patterns with `|`
/// into a single directive per capture, preserving first-appearance order.
fn merge_strips(directives: &[Directive]) -> Vec<Directive> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, d) in directives.iter().enumerate() {
        if d.kind == DirectiveKind::Strip {
            if let Some(capture) = &d.capture_name {
                groups.entry(capture.clone()).or_default().push(i);
            }
        }
    }
    let mergeable: HashMap<String, Vec<usize>> =
        groups.into_iter().filter(|(_, idx)| idx.len() >= 2).collect();

    let mut emitted: HashMap<String, bool> = HashMap::new();
    let mut result = Vec::with_capacity(directives.len());

    for (i, d) in directives.iter().enumerate() {
        if let Some(capture) = &d.capture_name {
            if let Some(indices) = mergeable.get(capture) {
                if indices.contains(&i) {
                    if !emitted.get(capture).copied().unwrap_or(false) {
                        let patterns: Vec<String> = indices
                            .iter()
                            .filter_map(|&j| directives[j].parameters.first().cloned())
                            .collect();
                        result.push(Directive {
                            kind: DirectiveKind::Strip,
                            capture_name: Some(capture.clone()),
                            parameters: vec![patterns.join("|")],
                            position: d.position,
                        });
                        emitted.insert(capture.clone(), true);
                    }
                    continue;
                }
            }
        }
        result.push(d.clone());
    }
    result
}

/// Folds obviously-safe regex simplifications in match-family predicates.
fn regex_peephole(predicates: Vec<Predicate>) -> Vec<Predicate> {
    predicates
        .into_iter()
        .map(|mut p| {
            if p.kind == PredicateKind::Match {
                if let PredicateValue::Single(pattern) = &p.value {
                    p.value = PredicateValue::Single(simplify_regex(pattern));
                }
            }
            p
        })
        .collect()
}

fn simplify_regex(pattern: &str) -> String {
    let mut out = pattern
        .replace("[a-zA-Z]", "[A-Za-z]")
        .replace("[0-9]", r"\d");

    // (x) without an alternation becomes a non-capturing group.
    let group_re = Regex::new(r"\(([^|()]+)\)").expect("static regex is valid");
    out = group_re.replace_all(&out, "(?:$1)").to_string();
    out
}

/// Replaces a bare wildcard pattern `(_)` with `(identifier)` where it is
/// clearly being used as a capture target rather than a required wildcard —
/// i.e. immediately followed by `@capture`. Disabled entirely when
/// optimization is off (checked by the caller).
fn substitute_wildcards(source: &str) -> String {
    Regex::new(r"\(_\)(\s*@[A-Za-z_][A-Za-z0-9_]*)")
        .expect("static regex is valid")
        .replace_all(source, "(identifier)$1")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Profile, QueryConfig};
    use crate::query::parser::parse;

    fn enabled_config() -> QueryConfig {
        let mut c = QueryConfig::for_profile(Profile::Test);
        c.optimization_enabled = true;
        c
    }

    #[test]
    fn fuses_three_or_more_equality_predicates_into_any_of() {
        let config = enabled_config();
        let output = parse(
            r#"((identifier) @id (#eq? @id "a") (#eq? @id "b") (#eq? @id "c"))"#,
        );
        let optimized = optimize(&output.query, &config);
        assert_eq!(optimized.predicates.len(), 1);
        assert_eq!(optimized.predicates[0].kind, PredicateKind::AnyOf);
        assert_eq!(
            optimized.predicates[0].value.as_list(),
            Some(&["a".to_string(), "b".to_string(), "c".to_string()][..])
        );
    }

    #[test]
    fn leaves_two_equality_predicates_unfused() {
        let config = enabled_config();
        let output = parse(r#"((identifier) @id (#eq? @id "a") (#eq? @id "b"))"#);
        let optimized = optimize(&output.query, &config);
        assert_eq!(optimized.predicates.len(), 2);
    }

    #[test]
    fn merges_strip_directives_for_same_capture() {
        let config = enabled_config();
        let output = parse(r#"((identifier) @id (#strip! @id "^foo") (#strip! @id "bar$"))"#);
        let optimized = optimize(&output.query, &config);
        assert_eq!(optimized.directives.len(), 1);
        assert_eq!(optimized.directives[0].parameters[0], "^foo|bar$");
    }

    #[test]
    fn disabled_optimization_returns_query_unchanged() {
        let mut config = QueryConfig::for_profile(Profile::Test);
        config.optimization_enabled = false;
        let output = parse(r#"((identifier) @id (#eq? @id "a") (#eq? @id "b") (#eq? @id "c"))"#);
        let optimized = optimize(&output.query, &config);
        assert_eq!(optimized.predicates.len(), 3);
    }
}
