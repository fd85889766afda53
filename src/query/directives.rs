//! Directive Processor (C10, §4.10).
//!
//! Transforms the match stream sequentially in directive order. A failing
//! directive is isolated: the stream carries forward the previous step's
//! output untouched and the failure is recorded as a `DirectiveOutcome`.

use crate::query::regex_cache::RegexCache;
use crate::query::types::{Directive, DirectiveKind, DirectiveOutcome, EnhancedMatch};

pub struct ProcessorOutput {
    pub matches: Vec<EnhancedMatch>,
    pub outcomes: Vec<DirectiveOutcome>,
    pub had_error: bool,
}

pub fn apply(mut matches: Vec<EnhancedMatch>, directives: &[Directive], regex_cache: &mut RegexCache) -> ProcessorOutput {
    let mut outcomes = Vec::with_capacity(directives.len());
    let mut had_error = false;

    for (directive_index, directive) in directives.iter().enumerate() {
        let result = match directive.kind {
            DirectiveKind::Set => apply_set(&mut matches, directive),
            DirectiveKind::Strip => apply_strip(&mut matches, directive, regex_cache),
            DirectiveKind::SelectAdjacent => apply_select_adjacent(&mut matches, directive),
        };

        match result {
            Ok(()) => outcomes.push(DirectiveOutcome {
                directive_index,
                applied: true,
                error: None,
            }),
            Err(e) => {
                had_error = true;
                outcomes.push(DirectiveOutcome {
                    directive_index,
                    applied: false,
                    error: Some(e),
                });
            }
        }
    }

    ProcessorOutput {
        matches,
        outcomes,
        had_error,
    }
}

fn apply_set(matches: &mut [EnhancedMatch], directive: &Directive) -> Result<(), String> {
    let target = directive
        .capture_name
        .as_deref()
        .ok_or_else(|| "set directive has no target capture".to_string())?;
    let mut params = directive.parameters.iter();
    let key = params
        .next()
        .ok_or_else(|| "set directive missing metadata key".to_string())?;
    let value = params
        .next()
        .ok_or_else(|| "set directive missing metadata value".to_string())?;

    for m in matches.iter_mut() {
        if m.capture_name == target {
            m.metadata.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}

fn apply_strip(matches: &mut [EnhancedMatch], directive: &Directive, regex_cache: &mut RegexCache) -> Result<(), String> {
    let target = directive
        .capture_name
        .as_deref()
        .ok_or_else(|| "strip directive has no target capture".to_string())?;
    let pattern = directive
        .parameters
        .first()
        .ok_or_else(|| "strip directive missing pattern".to_string())?;
    let regex = regex_cache.get_or_compile(pattern)?;

    for m in matches.iter_mut() {
        if m.capture_name == target {
            m.processed_text = regex.replace_all(&m.processed_text, "").to_string();
        }
    }
    Ok(())
}

/// Returns the union of matches bound to either of the directive's two
/// capture parameters (§9 Open Question 2: union, not physical adjacency).
fn apply_select_adjacent(matches: &mut Vec<EnhancedMatch>, directive: &Directive) -> Result<(), String> {
    if directive.parameters.len() < 2 {
        return Err("select-adjacent requires two capture parameters".to_string());
    }
    let (c1, c2) = (&directive.parameters[0], &directive.parameters[1]);
    matches.retain(|m| &m.capture_name == c1 || &m.capture_name == c2);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::types::Position;
    use std::collections::HashMap;

    fn make_match(capture_name: &str, text: &str) -> EnhancedMatch {
        EnhancedMatch {
            capture_name: capture_name.to_string(),
            node_type: "identifier".to_string(),
            original_text: text.to_string(),
            processed_text: text.to_string(),
            start: Position::default(),
            end: Position::default(),
            metadata: HashMap::new(),
            predicate_outcomes: Vec::new(),
            directive_outcomes: Vec::new(),
            adjacent_nodes: Vec::new(),
            native_match_index: 0,
        }
    }

    #[test]
    fn set_directive_writes_metadata_on_target_capture_only() {
        let matches = vec![make_match("id", "test"), make_match("other", "x")];
        let directive = Directive {
            kind: DirectiveKind::Set,
            capture_name: Some("id".to_string()),
            parameters: vec!["category".to_string(), "variable".to_string()],
            position: Position::default(),
        };
        let output = apply(matches, &[directive], &mut RegexCache::new());
        assert_eq!(output.matches[0].metadata.get("category"), Some(&"variable".to_string()));
        assert!(output.matches[1].metadata.is_empty());
    }

    #[test]
    fn strip_directive_removes_pattern_from_processed_text_only() {
        let matches = vec![make_match("id", "testVariable")];
        let directive = Directive {
            kind: DirectiveKind::Strip,
            capture_name: Some("id".to_string()),
            parameters: vec!["^test".to_string()],
            position: Position::default(),
        };
        let output = apply(matches, &[directive], &mut RegexCache::new());
        assert_eq!(output.matches[0].processed_text, "Variable");
        assert_eq!(output.matches[0].original_text, "testVariable");
    }

    #[test]
    fn select_adjacent_keeps_union_of_two_captures() {
        let matches = vec![
            make_match("x", "a"),
            make_match("y", "b"),
            make_match("z", "c"),
        ];
        let directive = Directive {
            kind: DirectiveKind::SelectAdjacent,
            capture_name: None,
            parameters: vec!["x".to_string(), "y".to_string()],
            position: Position::default(),
        };
        let output = apply(matches, &[directive], &mut RegexCache::new());
        assert_eq!(output.matches.len(), 2);
    }

    #[test]
    fn failing_directive_is_isolated_and_stream_proceeds() {
        let matches = vec![make_match("id", "test")];
        let bad = Directive {
            kind: DirectiveKind::Strip,
            capture_name: Some("id".to_string()),
            parameters: vec!["[invalid".to_string()],
            position: Position::default(),
        };
        let output = apply(matches, &[bad], &mut RegexCache::new());
        assert!(output.had_error);
        assert_eq!(output.matches.len(), 1);
        assert_eq!(output.matches[0].processed_text, "test");
    }
}
