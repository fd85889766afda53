//! Data model shared by the query pipeline (§3, §4.6-§4.11).

use std::collections::HashMap;

/// Zero-based `(row, column)` position in UTF-16 code units, opaque and
/// preserved verbatim from the native library (§3 Position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PredicateKind {
    Eq,
    Match,
    AnyOf,
    Is,
}

impl PredicateKind {
    pub const ALL: [PredicateKind; 4] = [
        PredicateKind::Eq,
        PredicateKind::Match,
        PredicateKind::AnyOf,
        PredicateKind::Is,
    ];

    /// Parses the bare predicate identifier (without `not-`/`any-` prefix).
    pub fn from_bare(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(PredicateKind::Eq),
            "match" => Some(PredicateKind::Match),
            "any-of" => Some(PredicateKind::AnyOf),
            "is" => Some(PredicateKind::Is),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredicateKind::Eq => "eq",
            PredicateKind::Match => "match",
            PredicateKind::AnyOf => "any-of",
            PredicateKind::Is => "is",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    /// Default: every node bound to the capture name in a match must satisfy.
    All,
    /// `any-` prefixed surface name: at least one bound node must satisfy.
    Any,
}

impl Default for Quantifier {
    fn default() -> Self {
        Quantifier::All
    }
}

/// A single string value, or an ordered list for `any-of` (§3 Predicate).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum PredicateValue {
    Single(String),
    List(Vec<String>),
}

impl PredicateValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            PredicateValue::Single(s) => Some(s),
            PredicateValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            PredicateValue::List(v) => Some(v),
            PredicateValue::Single(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub kind: PredicateKind,
    pub capture_name: String,
    pub value: PredicateValue,
    pub negated: bool,
    pub quantifier: Quantifier,
    pub position: Position,
}

impl Predicate {
    /// The surface name as it would appear written back out, e.g. `not-eq`, `any-match`.
    pub fn surface_name(&self) -> String {
        let prefix = match (self.negated, self.quantifier) {
            (true, _) => "not-",
            (false, Quantifier::Any) => "any-",
            (false, Quantifier::All) => "",
        };
        format!("{prefix}{}", self.kind.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectiveKind {
    Set,
    Strip,
    SelectAdjacent,
}

impl DirectiveKind {
    pub const ALL: [DirectiveKind; 3] = [
        DirectiveKind::Set,
        DirectiveKind::Strip,
        DirectiveKind::SelectAdjacent,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "set" => Some(DirectiveKind::Set),
            "strip" => Some(DirectiveKind::Strip),
            "select-adjacent" => Some(DirectiveKind::SelectAdjacent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveKind::Set => "set",
            DirectiveKind::Strip => "strip",
            DirectiveKind::SelectAdjacent => "select-adjacent",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// `None` only for `select-adjacent`, which has no single target capture.
    pub capture_name: Option<String>,
    pub parameters: Vec<String>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub text: String,
    pub captures: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct QueryFeatures {
    pub has_predicates: bool,
    pub has_directives: bool,
    pub has_anchors: bool,
    pub has_alternations: bool,
    pub has_quantifiers: bool,
    pub has_wildcards: bool,
    pub predicate_count: usize,
    pub directive_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
}

impl QueryFeatures {
    pub fn feature_count(&self) -> usize {
        [
            self.has_predicates,
            self.has_directives,
            self.has_anchors,
            self.has_alternations,
            self.has_quantifiers,
            self.has_wildcards,
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }

    pub fn classify(&mut self) {
        let features = self.feature_count();
        self.complexity = Some(
            if features >= 4 || self.predicate_count > 5 || self.directive_count > 3 {
                Complexity::Complex
            } else if features >= 2 || self.predicate_count > 2 || self.directive_count > 1 {
                Complexity::Moderate
            } else {
                Complexity::Simple
            },
        );
    }
}

/// `{ original_source, patterns[], predicates[], directives[], features }` (§3 Parsed Query).
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub original_source: String,
    pub patterns: Vec<Pattern>,
    pub predicates: Vec<Predicate>,
    pub directives: Vec<Directive>,
    pub features: QueryFeatures,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PredicateOutcome {
    pub predicate_index: usize,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DirectiveOutcome {
    pub directive_index: usize,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Produced by C11 from native captures; mutated by C10; immutable after
/// the pipeline returns (§3 Enhanced Match).
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnhancedMatch {
    pub capture_name: String,
    pub node_type: String,
    pub original_text: String,
    pub processed_text: String,
    pub start: Position,
    pub end: Position,
    pub metadata: HashMap<String, String>,
    pub predicate_outcomes: Vec<PredicateOutcome>,
    pub directive_outcomes: Vec<DirectiveOutcome>,
    pub adjacent_nodes: Vec<String>,
    /// Index of the native `tree_sitter::QueryMatch` this row came from.
    /// Needed to evaluate a quantified predicate across every node a
    /// pattern's quantifier bound to the same capture within one match.
    #[serde(skip)]
    pub native_match_index: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PerformanceMetrics {
    pub parse_time_ms: u64,
    pub query_time_ms: u64,
    pub total_time_ms: u64,
    pub memory_usage_mb: f64,
    pub match_count: usize,
    pub predicates_processed: usize,
    pub directives_applied: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_name_combines_negation_and_quantifier() {
        let mut p = Predicate {
            kind: PredicateKind::Eq,
            capture_name: "id".into(),
            value: PredicateValue::Single("x".into()),
            negated: true,
            quantifier: Quantifier::All,
            position: Position::default(),
        };
        assert_eq!(p.surface_name(), "not-eq");
        p.negated = false;
        p.quantifier = Quantifier::Any;
        assert_eq!(p.surface_name(), "any-eq");
        p.quantifier = Quantifier::All;
        assert_eq!(p.surface_name(), "eq");
    }

    #[test]
    fn complexity_classification_thresholds() {
        let mut f = QueryFeatures::default();
        f.classify();
        assert_eq!(f.complexity, Some(Complexity::Simple));

        f.has_predicates = true;
        f.has_directives = true;
        f.classify();
        assert_eq!(f.complexity, Some(Complexity::Moderate));

        f.has_anchors = true;
        f.has_alternations = true;
        f.classify();
        assert_eq!(f.complexity, Some(Complexity::Complex));
    }
}
