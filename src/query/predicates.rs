//! Predicate Processor (C9, §4.9).
//!
//! Filters an Enhanced Match stream against a predicate list. A quantified
//! predicate (`any-` prefix) is evaluated across every node a pattern's
//! quantifier bound to the same capture within one native match — grouped
//! here by `(native_match_index, capture_name)` — rather than row by row;
//! unquantified (`all`, the default) predicates degenerate to the same
//! per-row check when a capture binds exactly one node per match, which is
//! the common case exercised by spec scenario S2.

use std::collections::HashMap;

use crate::query::regex_cache::RegexCache;
use crate::query::types::{EnhancedMatch, Predicate, PredicateKind, PredicateOutcome, PredicateValue, Quantifier};

const FUNCTION_NODE_TYPES: &[&str] = &["function", "function_definition", "method", "method_definition"];
const STRING_NODE_TYPES: &[&str] = &["string", "string_literal", "template_string"];
const NUMBER_NODE_TYPES: &[&str] = &["number", "number_literal", "integer", "float"];

const RESERVED_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "return", "function", "fn", "class", "const", "let", "var",
    "public", "private", "protected", "static", "import", "export", "async", "await", "try",
    "catch", "finally", "throw", "new", "this", "super", "null", "nil", "none", "true", "false",
    "break", "continue", "switch", "case", "default", "do", "typeof", "instanceof", "def", "elif",
    "pass", "yield", "lambda", "with", "as", "from", "package", "interface", "implements",
    "extends", "enum", "struct", "impl", "trait", "mod", "use", "pub", "match", "loop", "in",
    "where", "type", "namespace", "using", "void", "int", "string", "bool", "float", "double",
    "char", "long", "short", "byte", "goto", "defer", "func", "chan", "select", "range",
];

pub struct ProcessorOutput {
    pub matches: Vec<EnhancedMatch>,
    pub outcomes: Vec<PredicateOutcome>,
}

pub fn apply(matches: Vec<EnhancedMatch>, predicates: &[Predicate], regex_cache: &mut RegexCache) -> ProcessorOutput {
    if predicates.is_empty() {
        return ProcessorOutput {
            matches,
            outcomes: Vec::new(),
        };
    }

    let mut outcomes = Vec::new();
    // retained[i] stays true unless some predicate targeting matches[i]'s capture fails.
    let mut retained = vec![true; matches.len()];
    let mut per_row_outcomes: Vec<Vec<PredicateOutcome>> = vec![Vec::new(); matches.len()];

    for (predicate_index, predicate) in predicates.iter().enumerate() {
        let mut groups: HashMap<(usize, &str), Vec<usize>> = HashMap::new();
        for (i, m) in matches.iter().enumerate() {
            if m.capture_name == predicate.capture_name {
                groups
                    .entry((m.native_match_index, m.capture_name.as_str()))
                    .or_default()
                    .push(i);
            }
        }

        for indices in groups.values() {
            let mut row_results = Vec::with_capacity(indices.len());
            let mut regex_error: Option<String> = None;

            for &i in indices {
                match evaluate_single(predicate, &matches[i], regex_cache) {
                    Ok(pass) => row_results.push(pass),
                    Err(e) => {
                        regex_error = Some(e);
                        row_results.push(false);
                    }
                }
            }

            let group_pass = match predicate.quantifier {
                Quantifier::All => row_results.iter().all(|b| *b),
                Quantifier::Any => row_results.iter().any(|b| *b),
            };

            for &i in indices {
                let outcome = PredicateOutcome {
                    predicate_index,
                    passed: group_pass,
                    error: regex_error.clone(),
                };
                per_row_outcomes[i].push(outcome.clone());
                outcomes.push(outcome);
                if !group_pass {
                    retained[i] = false;
                }
            }
        }
    }

    let filtered = matches
        .into_iter()
        .zip(retained)
        .zip(per_row_outcomes)
        .filter_map(|((mut m, keep), row_outcomes)| {
            keep.then(|| {
                m.predicate_outcomes = row_outcomes;
                m
            })
        })
        .collect();

    ProcessorOutput {
        matches: filtered,
        outcomes,
    }
}

fn evaluate_single(predicate: &Predicate, m: &EnhancedMatch, regex_cache: &mut RegexCache) -> Result<bool, String> {
    let raw = match predicate.kind {
        PredicateKind::Eq => {
            let value = predicate.value.as_single().unwrap_or_default();
            m.original_text == value
        }
        PredicateKind::Match => {
            let pattern = predicate.value.as_single().unwrap_or_default();
            let regex = regex_cache.get_or_compile(pattern)?;
            regex.is_match(&m.original_text)
        }
        PredicateKind::AnyOf => match &predicate.value {
            PredicateValue::List(values) => values.iter().any(|v| v == &m.original_text),
            PredicateValue::Single(_) => false,
        },
        PredicateKind::Is => evaluate_is(predicate.value.as_single().unwrap_or_default(), m),
    };
    Ok(if predicate.negated { !raw } else { raw })
}

fn evaluate_is(kind: &str, m: &EnhancedMatch) -> bool {
    match kind {
        "identifier" => m.node_type == "identifier",
        "function" => FUNCTION_NODE_TYPES.contains(&m.node_type.as_str()),
        "string" => STRING_NODE_TYPES.contains(&m.node_type.as_str()),
        "number" => NUMBER_NODE_TYPES.contains(&m.node_type.as_str()),
        "keyword" => RESERVED_KEYWORDS.contains(&m.original_text.as_str()),
        other => m.metadata.contains_key(other) || m.node_type == other,
    }
}
