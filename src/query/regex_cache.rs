//! Per-request regex cache shared by C9 (predicates) and C10 (directives).
//!
//! Cached by pattern string only, scoped to the lifetime of one executor
//! call — never persisted across requests, so a config or query change can
//! never see a stale compiled pattern (§9 design notes).

use std::collections::HashMap;

use regex::Regex;

#[derive(Default)]
pub struct RegexCache {
    entries: HashMap<String, Result<Regex, String>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&mut self, pattern: &str) -> Result<Regex, String> {
        self.entries
            .entry(pattern.to_string())
            .or_insert_with(|| Regex::new(pattern).map_err(|e| e.to_string()))
            .clone()
    }
}
