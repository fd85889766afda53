//! Query Validator (C7, §4.7).
//!
//! Structural, policy, semantic, and performance checks over a query
//! source plus its already-parsed predicates/directives. Never mutates the
//! parsed query; only reports.

use regex::Regex;
use std::collections::HashSet;

use crate::config::QueryConfig;
use crate::query::types::{Directive, DirectiveKind, ParsedQuery, Predicate, PredicateKind, PredicateValue};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

pub fn validate(source: &str, query: &ParsedQuery, config: &QueryConfig, parse_warnings: &[String]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings: Vec<String> = parse_warnings.to_vec();
    let mut suggestions = Vec::new();

    check_structural(source, &mut errors);
    check_policy(query, config, &mut errors);
    check_semantic(&query.predicates, &query.directives, &mut errors, &mut warnings);
    check_performance(source, &mut warnings, &mut suggestions);

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        suggestions,
    }
}

fn check_structural(source: &str, errors: &mut Vec<String>) {
    let mut parens = 0i32;
    let mut brackets = 0i32;
    let mut braces = 0i32;
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for c in source.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '(' if !in_single && !in_double => parens += 1,
            ')' if !in_single && !in_double => parens -= 1,
            '[' if !in_single && !in_double => brackets += 1,
            ']' if !in_single && !in_double => brackets -= 1,
            '{' if !in_single && !in_double => braces += 1,
            '}' if !in_single && !in_double => braces -= 1,
            _ => {}
        }
    }

    if parens != 0 {
        errors.push("unbalanced parentheses in query source".to_string());
    }
    if brackets != 0 {
        errors.push("unbalanced square brackets in query source".to_string());
    }
    if braces != 0 {
        errors.push("unbalanced braces in query source".to_string());
    }
    if in_single || in_double {
        errors.push("unterminated quote in query source".to_string());
    }

    let capture_name_re = Regex::new(r"@[A-Za-z_][A-Za-z0-9_]*").expect("static regex is valid");
    for bad in Regex::new(r"@\S+")
        .expect("static regex is valid")
        .find_iter(source)
        .filter(|m| !capture_name_re.is_match(m.as_str()))
    {
        errors.push(format!("malformed capture name '{}'", bad.as_str()));
    }
}

fn check_policy(query: &ParsedQuery, config: &QueryConfig, errors: &mut Vec<String>) {
    if query.predicates.len() > config.max_predicates_per_query {
        errors.push(format!(
            "predicate count {} exceeds maximum {}",
            query.predicates.len(),
            config.max_predicates_per_query
        ));
    }
    if query.directives.len() > config.max_directives_per_query {
        errors.push(format!(
            "directive count {} exceeds maximum {}",
            query.directives.len(),
            config.max_directives_per_query
        ));
    }

    for predicate in &query.predicates {
        if !config.allowed_predicates.contains(&predicate.kind) {
            errors.push(format!("predicate kind '{}' is not allowed", predicate.kind.as_str()));
        }
        if predicate.capture_name.is_empty() {
            errors.push(format!(
                "predicate '{}' at {}:{} has no capture reference",
                predicate.surface_name(),
                predicate.position.row,
                predicate.position.column
            ));
        }
    }

    for directive in &query.directives {
        if !config.allowed_directives.contains(&directive.kind) {
            errors.push(format!("directive kind '{}' is not allowed", directive.kind.as_str()));
        }
        if directive.kind != DirectiveKind::SelectAdjacent && directive.capture_name.is_none() {
            errors.push(format!(
                "directive '{}' at {}:{} has no capture reference",
                directive.kind.as_str(),
                directive.position.row,
                directive.position.column
            ));
        }
    }
}

fn check_semantic(
    predicates: &[Predicate],
    directives: &[Directive],
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    for predicate in predicates {
        match predicate.kind {
            PredicateKind::AnyOf => {
                if predicate.value.as_list().is_none() {
                    errors.push("any-of predicate requires an array value".to_string());
                }
            }
            PredicateKind::Match => {
                if let Some(pattern) = predicate.value.as_single() {
                    if Regex::new(pattern).is_err() {
                        errors.push(format!("invalid regex '{pattern}' in match predicate"));
                    }
                }
            }
            PredicateKind::Eq | PredicateKind::Is => {
                if matches!(predicate.value, PredicateValue::List(_)) {
                    errors.push(format!(
                        "predicate '{}' expects a scalar value, not an array",
                        predicate.kind.as_str()
                    ));
                }
            }
        }
    }

    let mut seen_pairs = HashSet::new();
    for predicate in predicates {
        let key = (predicate.kind, predicate.capture_name.clone());
        if !seen_pairs.insert(key) {
            warnings.push(format!(
                "duplicate predicate '{}' for capture '{}'",
                predicate.kind.as_str(),
                predicate.capture_name
            ));
        }
    }

    let mut strip_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for directive in directives {
        if directive.kind == DirectiveKind::Strip {
            if let Some(pattern) = directive.parameters.first() {
                if Regex::new(pattern).is_err() {
                    errors.push(format!("invalid regex '{pattern}' in strip directive"));
                }
            }
            if let Some(capture) = &directive.capture_name {
                *strip_counts.entry(capture.clone()).or_insert(0) += 1;
            }
        }
    }
    for (capture, count) in strip_counts {
        if count > 1 {
            warnings.push(format!("multiple strip directives target capture '{capture}'"));
        }
    }
}

fn check_performance(source: &str, warnings: &mut Vec<String>, suggestions: &mut Vec<String>) {
    let wildcard_count = source.matches("(_)").count();
    if wildcard_count > 5 {
        warnings.push(format!("{wildcard_count} wildcards may degrade match performance"));
        suggestions.push("consider narrowing wildcard patterns to specific node types".to_string());
    }

    let alternation_count = source.matches('[').count();
    if alternation_count > 3 {
        warnings.push(format!("{alternation_count} top-level alternations may degrade match performance"));
    }

    let adjacent_quantifiers = Regex::new(r"[+*?][+*?]")
        .expect("static regex is valid")
        .find_iter(source)
        .count();
    if adjacent_quantifiers > 0 {
        warnings.push("adjacent quantifiers detected; this is likely unintentional".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Profile, QueryConfig};
    use crate::query::parser::parse;

    #[test]
    fn balanced_query_has_no_structural_errors() {
        let config = QueryConfig::for_profile(Profile::Test);
        let output = parse(r#"((identifier) @id (#eq? @id "test"))"#);
        let result = validate(&output.query.original_source, &output.query, &config, &output.warnings);
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn unbalanced_parens_are_rejected() {
        let config = QueryConfig::for_profile(Profile::Test);
        let output = parse("((identifier) @id");
        let result = validate(&output.query.original_source, &output.query, &config, &output.warnings);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("parentheses")));
    }

    #[test]
    fn predicate_count_over_max_is_rejected() {
        let mut config = QueryConfig::for_profile(Profile::Test);
        config.max_predicates_per_query = 0;
        let output = parse(r#"((identifier) @id (#eq? @id "test"))"#);
        let result = validate(&output.query.original_source, &output.query, &config, &output.warnings);
        assert!(!result.is_valid);
    }

    #[test]
    fn duplicate_predicate_pair_produces_warning() {
        let config = QueryConfig::for_profile(Profile::Test);
        let output = parse(r#"((identifier) @id (#eq? @id "a") (#eq? @id "b"))"#);
        let result = validate(&output.query.original_source, &output.query, &config, &output.warnings);
        assert!(result.warnings.iter().any(|w| w.contains("duplicate predicate")));
    }
}
