//! Grammar Registry (C1, §4.1).
//!
//! Lazily resolves a [`Language`] identifier to a shareable, process-lifetime
//! grammar handle. Concurrent first-touches of the same language coalesce
//! onto a single load via a `DashMap` of `OnceCell`s, the same coalescing
//! shape the teacher uses for its parse cache's single-writer-per-key
//! discipline, adapted here to loads instead of inserts.

use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::error::ServiceError;

/// The closed set of supported languages (§3 Language).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Typescript,
    Python,
    Java,
    Go,
    Rust,
    Cpp,
    C,
    Csharp,
    Ruby,
}

impl Language {
    pub const ALL: [Language; 10] = [
        Language::Javascript,
        Language::Typescript,
        Language::Python,
        Language::Java,
        Language::Go,
        Language::Rust,
        Language::Cpp,
        Language::C,
        Language::Csharp,
        Language::Ruby,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Csharp => "csharp",
            Language::Ruby => "ruby",
        }
    }

    fn ts_language(&self) -> tree_sitter::Language {
        match self {
            Language::Javascript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Typescript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Csharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Language::Ruby => tree_sitter_ruby::LANGUAGE.into(),
        }
    }
}

impl FromStr for Language {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(Language::Javascript),
            "typescript" | "ts" => Ok(Language::Typescript),
            "python" | "py" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "go" | "golang" => Ok(Language::Go),
            "rust" | "rs" => Ok(Language::Rust),
            "cpp" | "c++" => Ok(Language::Cpp),
            "c" => Ok(Language::C),
            "csharp" | "c#" | "cs" => Ok(Language::Csharp),
            "ruby" | "rb" => Ok(Language::Ruby),
            other => Err(ServiceError::UnsupportedLanguage(other.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, shareable handle over a compiled grammar module (§3 Grammar Module).
///
/// `tree_sitter::Language` is already cheaply cloneable (it's a thin wrapper
/// over a static C struct pointer), so the handle is just that type renamed
/// at the API boundary for clarity.
pub type GrammarHandle = tree_sitter::Language;

#[derive(Debug, Default, serde::Serialize)]
pub struct RegistryStatus {
    pub loaded: Vec<Language>,
    pub pending: Vec<Language>,
}

/// C1: lazily resolves and memoizes grammar modules, one per language.
pub struct GrammarRegistry {
    cells: DashMap<Language, OnceCell<GrammarHandle>>,
}

impl GrammarRegistry {
    pub fn new() -> Self {
        let cells = DashMap::new();
        for lang in Language::ALL {
            cells.insert(lang, OnceCell::new());
        }
        Self { cells }
    }

    pub fn is_supported(&self, lang: Language) -> bool {
        self.cells.contains_key(&lang)
    }

    /// Returns the grammar handle for `lang`, loading it on first call.
    /// Concurrent callers for the same language block on the same
    /// `OnceCell`, so the load happens exactly once.
    pub fn get(&self, lang: Language) -> Result<GrammarHandle, ServiceError> {
        let cell = self
            .cells
            .get(&lang)
            .ok_or_else(|| ServiceError::UnsupportedLanguage(lang.to_string()))?;

        let handle = cell.get_or_try_init(|| {
            trace!(language = %lang, "loading grammar module");
            Ok::<_, ServiceError>(lang.ts_language())
        })?;
        Ok(handle.clone())
    }

    pub fn preload(&self, lang: Language) -> Result<(), ServiceError> {
        self.get(lang).map(|_| ())
    }

    pub fn preload_all(&self) -> Result<(), ServiceError> {
        for lang in Language::ALL {
            self.preload(lang)?;
        }
        Ok(())
    }

    /// Clears all memoized handles. Failures are never cached (there's
    /// nothing to clear for an unsupported language, and loads of the
    /// compiled-in grammars cannot fail at runtime), so this only resets
    /// already-successful loads.
    pub fn clear_cache(&self) {
        debug!("clearing grammar registry cache");
        for mut entry in self.cells.iter_mut() {
            *entry.value_mut() = OnceCell::new();
        }
    }

    pub fn status(&self) -> RegistryStatus {
        let mut loaded = Vec::new();
        let mut pending = Vec::new();
        for entry in self.cells.iter() {
            if entry.value().get().is_some() {
                loaded.push(*entry.key());
            } else {
                pending.push(*entry.key());
            }
        }
        RegistryStatus { loaded, pending }
    }
}

impl Default for GrammarRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_round_trips_through_str() {
        for lang in Language::ALL {
            let parsed: Language = lang.as_str().parse().unwrap();
            assert_eq!(parsed, lang);
        }
    }

    #[test]
    fn unsupported_language_is_rejected() {
        let err = "cobol".parse::<Language>().unwrap_err();
        assert_eq!(err.kind(), "UnsupportedLanguage");
    }

    #[test]
    fn registry_memoizes_loads() {
        let registry = GrammarRegistry::new();
        assert!(registry.status().loaded.is_empty());

        let first = registry.get(Language::Javascript).unwrap();
        let second = registry.get(Language::Javascript).unwrap();
        assert_eq!(first, second);
        assert!(registry.status().loaded.contains(&Language::Javascript));
    }

    #[test]
    fn clear_cache_forces_reload() {
        let registry = GrammarRegistry::new();
        registry.preload(Language::Python).unwrap();
        assert!(registry.status().loaded.contains(&Language::Python));

        registry.clear_cache();
        assert!(registry.status().loaded.is_empty());
        assert!(registry.status().pending.contains(&Language::Python));
    }
}
