//! Query Parser (C6, §4.6).
//!
//! Tokenizes a query source string into three syntactic streams in a single
//! pass: patterns (S-expressions, used only to surface captures), predicates
//! (`#<ident>?<args>`), and directives (`#<ident>!<args>`). Items that turn
//! out malformed in a way the source spells out explicitly (a missing
//! `any-of` array) are dropped; the drop reason is returned as a warning for
//! C7 to surface, not silently swallowed. A `match`/`not-match` predicate
//! with an invalid regex literal is kept through parsing — the executor
//! (§4.11 step 3) short-circuits on it instead, since dropping it silently
//! here would let the rest of the query match successfully.

use regex::Regex;

use crate::query::types::{
    Directive, DirectiveKind, ParsedQuery, Pattern, Position, Predicate, PredicateKind,
    PredicateValue, Quantifier, QueryFeatures,
};

/// Result of C6: the parsed query plus any warnings produced while dropping
/// malformed predicate/directive items.
pub struct ParseOutput {
    pub query: ParsedQuery,
    pub warnings: Vec<String>,
}

pub fn parse(source: &str) -> ParseOutput {
    let mut warnings = Vec::new();
    let patterns = parse_patterns(source);
    let predicates = parse_predicates(source, &mut warnings);
    let directives = parse_directives(source, &mut warnings);
    let features = synthesize_features(source, &predicates, &directives);

    ParseOutput {
        query: ParsedQuery {
            original_source: source.to_string(),
            patterns,
            predicates,
            directives,
            features,
        },
        warnings,
    }
}

fn parse_patterns(source: &str) -> Vec<Pattern> {
    let capture_re = capture_regex();
    source
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with(';') && trimmed.contains('(')
        })
        .map(|line| Pattern {
            text: line.to_string(),
            captures: capture_re
                .captures_iter(line)
                .map(|c| c[1].to_string())
                .collect(),
        })
        .collect()
}

fn capture_regex() -> Regex {
    Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)").expect("static capture regex is valid")
}

/// One `(#ident?args)` or `(#ident!args)` occurrence found by scanning for `#`.
struct RawItem {
    terminator: char,
    ident: String,
    args_raw: String,
    position: Position,
}

fn scan_items(source: &str, terminator: char) -> Vec<RawItem> {
    let mut items = Vec::new();
    let bytes: Vec<char> = source.chars().collect();
    let mut row = 0usize;
    let mut col = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        if c == '\n' {
            row += 1;
            col = 0;
            i += 1;
            continue;
        }
        if c == '#' && i > 0 && bytes[i - 1] == '(' {
            let start_row = row;
            let start_col = col - 1; // position of the enclosing '('
            let mut j = i + 1;
            let mut ident = String::new();
            while j < bytes.len() && (bytes[j].is_alphanumeric() || bytes[j] == '-' || bytes[j] == '_') {
                ident.push(bytes[j]);
                j += 1;
            }
            if j < bytes.len() && bytes[j] == terminator {
                // Collect args up to the matching close paren for the '(' that preceded '#'.
                let mut depth = 1i32;
                let mut k = j + 1;
                let args_start = k;
                while k < bytes.len() && depth > 0 {
                    match bytes[k] {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        k += 1;
                    }
                }
                let args_raw: String = bytes[args_start..k].iter().collect();
                items.push(RawItem {
                    terminator,
                    ident,
                    args_raw,
                    position: Position::new(start_row, start_col),
                });
                let consumed = &bytes[i..k.min(bytes.len())];
                col += consumed.iter().filter(|ch| **ch != '\n').count();
                i = k;
                continue;
            }
        }
        col += 1;
        i += 1;
    }
    items
}

#[derive(Debug, Clone)]
enum ArgToken {
    Capture(String),
    Scalar(String),
    Array(Vec<String>),
}

fn tokenize_args(args: &str) -> Vec<ArgToken> {
    let chars: Vec<char> = args.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => {
                i += 1;
            }
            '@' => {
                let mut j = i + 1;
                while j < chars.len()
                    && (chars[j].is_alphanumeric() || chars[j] == '_')
                {
                    j += 1;
                }
                tokens.push(ArgToken::Capture(chars[i + 1..j].iter().collect()));
                i = j;
            }
            '"' | '\'' => {
                let quote = chars[i];
                let mut j = i + 1;
                let mut value = String::new();
                while j < chars.len() && chars[j] != quote {
                    if chars[j] == '\\' && j + 1 < chars.len() {
                        value.push(chars[j + 1]);
                        j += 2;
                    } else {
                        value.push(chars[j]);
                        j += 1;
                    }
                }
                tokens.push(ArgToken::Scalar(value));
                i = j + 1;
            }
            '[' => {
                let mut depth = 1i32;
                let mut j = i + 1;
                let start = j;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '[' => depth += 1,
                        ']' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        j += 1;
                    }
                }
                let inner: String = chars[start..j].iter().collect();
                let items = inner
                    .split(',')
                    .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                tokens.push(ArgToken::Array(items));
                i = (j + 1).min(chars.len());
            }
            _ => {
                let mut j = i;
                while j < chars.len() && !chars[j].is_whitespace() && chars[j] != ')' {
                    j += 1;
                }
                let word: String = chars[i..j].iter().collect();
                if !word.is_empty() {
                    tokens.push(ArgToken::Scalar(word));
                }
                i = j.max(i + 1);
            }
        }
    }
    tokens
}

fn parse_predicates(source: &str, warnings: &mut Vec<String>) -> Vec<Predicate> {
    scan_items(source, '?')
        .into_iter()
        .filter_map(|item| {
            let (negated, quantifier, bare) = split_prefix(&item.ident);
            let Some(kind) = PredicateKind::from_bare(&bare) else {
                warnings.push(format!(
                    "unknown predicate kind '{}' at {}:{} dropped",
                    item.ident, item.position.row, item.position.column
                ));
                return None;
            };

            let tokens = tokenize_args(&item.args_raw);
            let capture_name = tokens.iter().find_map(|t| match t {
                ArgToken::Capture(c) => Some(c.clone()),
                _ => None,
            });

            let value = tokens.iter().find_map(|t| match t {
                ArgToken::Array(items) => Some(PredicateValue::List(items.clone())),
                ArgToken::Scalar(s) => Some(PredicateValue::Single(s.clone())),
                ArgToken::Capture(_) => None,
            });

            if kind == PredicateKind::AnyOf && !matches!(value, Some(PredicateValue::List(_))) {
                warnings.push(format!(
                    "any-of predicate missing array argument at {}:{} dropped",
                    item.position.row, item.position.column
                ));
                return None;
            }

            Some(Predicate {
                kind,
                capture_name: capture_name.unwrap_or_default(),
                value: value.unwrap_or_else(|| PredicateValue::Single(String::new())),
                negated,
                quantifier,
                position: item.position,
            })
        })
        .collect()
}

fn split_prefix(ident: &str) -> (bool, Quantifier, String) {
    if let Some(rest) = ident.strip_prefix("not-") {
        (true, Quantifier::All, rest.to_string())
    } else if let Some(rest) = ident.strip_prefix("any-") {
        (false, Quantifier::Any, rest.to_string())
    } else {
        (false, Quantifier::All, ident.to_string())
    }
}

fn parse_directives(source: &str, warnings: &mut Vec<String>) -> Vec<Directive> {
    scan_items(source, '!')
        .into_iter()
        .filter_map(|item| {
            let Some(kind) = DirectiveKind::from_str(&item.ident) else {
                warnings.push(format!(
                    "unknown directive kind '{}' at {}:{} dropped",
                    item.ident, item.position.row, item.position.column
                ));
                return None;
            };

            let tokens = tokenize_args(&item.args_raw);

            if kind == DirectiveKind::SelectAdjacent {
                let parameters: Vec<String> = tokens
                    .iter()
                    .filter_map(|t| match t {
                        ArgToken::Capture(c) => Some(c.clone()),
                        _ => None,
                    })
                    .collect();
                return Some(Directive {
                    kind,
                    capture_name: None,
                    parameters,
                    position: item.position,
                });
            }

            let mut capture_name = None;
            let mut parameters = Vec::new();
            for token in tokens {
                match token {
                    ArgToken::Capture(c) if capture_name.is_none() => capture_name = Some(c),
                    ArgToken::Capture(c) => parameters.push(format!("@{c}")),
                    ArgToken::Scalar(s) => parameters.push(s),
                    ArgToken::Array(items) => parameters.extend(items),
                }
            }

            if kind == DirectiveKind::Strip {
                if let Some(pattern) = parameters.first() {
                    if Regex::new(pattern).is_err() {
                        warnings.push(format!(
                            "invalid regex literal '{pattern}' at {}:{} dropped",
                            item.position.row, item.position.column
                        ));
                        return None;
                    }
                }
            }

            Some(Directive {
                kind,
                capture_name,
                parameters,
                position: item.position,
            })
        })
        .collect()
}

fn synthesize_features(
    source: &str,
    predicates: &[Predicate],
    directives: &[Directive],
) -> QueryFeatures {
    let mut features = QueryFeatures {
        has_predicates: !predicates.is_empty(),
        has_directives: !directives.is_empty(),
        has_anchors: source.contains('.'),
        has_alternations: source.contains('['),
        has_quantifiers: source.contains('+') || source.contains('*') || source.contains('?'),
        has_wildcards: source.contains("(_)"),
        predicate_count: predicates.len(),
        directive_count: directives.len(),
        complexity: None,
    };
    features.classify();
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_equality_predicate() {
        let output = parse(r#"((identifier) @id (#eq? @id "test"))"#);
        assert_eq!(output.query.predicates.len(), 1);
        let p = &output.query.predicates[0];
        assert_eq!(p.kind, PredicateKind::Eq);
        assert_eq!(p.capture_name, "id");
        assert_eq!(p.value.as_single(), Some("test"));
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn parses_not_prefixed_predicate() {
        let output = parse(r#"((identifier) @id (#not-eq? @id "test"))"#);
        let p = &output.query.predicates[0];
        assert!(p.negated);
        assert_eq!(p.surface_name(), "not-eq");
    }

    #[test]
    fn parses_any_of_array_argument() {
        let output = parse(r#"((identifier) @id (#any-of? @id ["a", "b", "c"]))"#);
        let p = &output.query.predicates[0];
        assert_eq!(p.kind, PredicateKind::AnyOf);
        assert_eq!(p.value.as_list(), Some(&["a".to_string(), "b".to_string(), "c".to_string()][..]));
    }

    #[test]
    fn drops_any_of_missing_array_with_warning() {
        let output = parse(r#"((identifier) @id (#any-of? @id "a"))"#);
        assert!(output.query.predicates.is_empty());
        assert_eq!(output.warnings.len(), 1);
    }

    #[test]
    fn keeps_match_predicate_with_invalid_regex_for_the_executor_to_reject() {
        let output = parse(r#"((identifier) @id (#match? @id "[invalid"))"#);
        assert_eq!(output.query.predicates.len(), 1);
        assert_eq!(output.query.predicates[0].kind, PredicateKind::Match);
    }

    #[test]
    fn parses_set_directive_with_capture_and_parameters() {
        let output = parse(r#"((identifier) @id (#set! @id "category" "variable"))"#);
        let d = &output.query.directives[0];
        assert_eq!(d.kind, DirectiveKind::Set);
        assert_eq!(d.capture_name.as_deref(), Some("id"));
        assert_eq!(d.parameters, vec!["category".to_string(), "variable".to_string()]);
    }

    #[test]
    fn parses_select_adjacent_with_two_captures_as_parameters() {
        let output = parse(r#"((a) @x (b) @y (#select-adjacent! @x @y))"#);
        let d = &output.query.directives[0];
        assert_eq!(d.kind, DirectiveKind::SelectAdjacent);
        assert!(d.capture_name.is_none());
        assert_eq!(d.parameters, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn comment_lines_are_excluded_from_patterns() {
        let output = parse("; a comment\n(identifier) @id");
        assert_eq!(output.query.patterns.len(), 1);
        assert_eq!(output.query.patterns[0].captures, vec!["id".to_string()]);
    }
}
