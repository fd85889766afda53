//! Syntax Tree lifecycle manager (C3, §4.3).
//!
//! Owns created trees for the duration of a request and tracks how many are
//! active so the resource-balance invariant (§8 invariant 1) can be checked.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::error::ServiceError;

/// Owning handle produced by parsing with a parser bound to a grammar.
/// Never mutated after creation (§3 Syntax Tree invariant).
pub struct SyntaxTree {
    id: Uuid,
    tree: tree_sitter::Tree,
    source: Arc<str>,
}

impl SyntaxTree {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root_node(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    pub fn inner(&self) -> &tree_sitter::Tree {
        &self.tree
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// C3: creates/destroys trees from a parser, tracking the active set.
pub struct TreeManager {
    active: DashMap<Uuid, ()>,
    active_count: AtomicUsize,
}

impl TreeManager {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Parses `code` with `parser`, failing fast on empty input or a missing
    /// root node (§4.3).
    pub fn create_tree(
        &self,
        parser: &mut tree_sitter::Parser,
        code: &str,
    ) -> Result<SyntaxTree, ServiceError> {
        if code.is_empty() {
            return Err(ServiceError::Parse("code must not be empty".to_string()));
        }

        let tree = parser
            .parse(code, None)
            .ok_or_else(|| ServiceError::Parse("parser produced no tree".to_string()))?;

        // `root_node()` always returns a node once a tree exists, but a
        // zero-width, error-kind root indicates the native parser bailed
        // before producing any structure at all.
        if tree.root_node().kind_id() == 0 && tree.root_node().byte_range().is_empty() {
            return Err(ServiceError::Parse("missing root node".to_string()));
        }

        let id = Uuid::new_v4();
        self.active.insert(id, ());
        self.active_count.fetch_add(1, Ordering::SeqCst);
        trace!(tree_id = %id, "created syntax tree");

        Ok(SyntaxTree {
            id,
            tree,
            source: Arc::from(code),
        })
    }

    pub fn destroy_tree(&self, tree: SyntaxTree) {
        if self.active.remove(&tree.id).is_some() {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
            trace!(tree_id = %tree.id, "destroyed syntax tree");
        } else {
            warn!(tree_id = %tree.id, "destroy_tree called on untracked tree");
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Destroys every tracked tree. Used by the emergency cleanup strategy (C5).
    pub fn bulk_destroy(&self) -> usize {
        let n = self.active.len();
        self.active.clear();
        self.active_count.store(0, Ordering::SeqCst);
        n
    }
}

impl Default for TreeManager {
    fn default() -> Self {
        Self::new()
    }
}
