//! Native tree-sitter parser wrapper for Go source files.
//!
//! The Go grammar is statically linked — no runtime setup needed.
//!
//! # Design decisions
//!
//! - **No stored state.** `GoParser` carries no fields. Tree-sitter's
//!   `Parser` is `!Send + !Sync`, so rather than wrestling with thread-safety
//!   wrappers we create a fresh parser on every call. This is cheap —
//!   `Parser::new()` is a single allocation and `set_language` is a pointer
//!   swap. The struct itself stays `Send`, `Sync`, and zero-sized, which
//!   matters because the walker invokes it from parallel workers.
//!
//! - **Strict parses only.** A tree containing `ERROR` or missing nodes is
//!   rejected outright: the rewriter mutates files in place, so it must never
//!   operate on a half-understood tree.

use tree_sitter::{Node, Tree};

use crate::error::{ParagenError, Result};

/// Thin wrapper around native tree-sitter parsing of Go source.
pub struct GoParser;

impl GoParser {
    /// Create a new `GoParser`.
    ///
    /// This is a no-op — it exists so call sites read naturally and so we can
    /// add configuration later without breaking the public API.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse `source` as a Go compilation unit and return the syntax tree.
    ///
    /// Fails with [`ParagenError::Parse`] when the source is not valid Go;
    /// no partial tree is ever returned. `file` is only used for error
    /// reporting.
    pub fn parse(&self, file: &str, source: &[u8]) -> Result<Tree> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| ParagenError::Parse {
                file: file.to_string(),
                message: format!("language version mismatch: {e}"),
            })?;

        let tree = parser.parse(source, None).ok_or_else(|| ParagenError::Parse {
            file: file.to_string(),
            message: "tree-sitter returned no tree".to_string(),
        })?;

        if tree.root_node().has_error() {
            return Err(ParagenError::Parse {
                file: file.to_string(),
                message: describe_first_error(tree.root_node()),
            });
        }

        Ok(tree)
    }
}

impl Default for GoParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate the first `ERROR` or missing node and describe its position.
fn describe_first_error(root: Node) -> String {
    let mut cursor = root.walk();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return format!("syntax error at {}:{}", pos.row + 1, pos.column + 1);
        }
        for child in node.children(&mut cursor) {
            if child.has_error() {
                stack.push(child);
            }
        }
    }
    "syntax error".to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
