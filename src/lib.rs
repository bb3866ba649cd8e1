//! paragen — inserts `testing.T.Parallel()` into Go test files.
//!
//! A source-to-source codemod: it walks a directory tree, parses every
//! `*_test.go` file, and prepends the parallel directive to test functions
//! and eligible subtests — skipping scopes that call `Setenv` (incompatible
//! with concurrent execution) or carry a `//nolint` suppression comment, and
//! rebinding range-loop variables captured by subtests when targeting Go
//! versions without per-iteration loop scoping. Changed files are committed
//! tree-wide with a two-phase, all-or-nothing staging discipline.

pub mod cli;
pub mod edit;
pub mod error;
pub mod matchers;
pub mod observability;
pub mod parser;
pub mod rewrite;
pub mod walker;

pub use error::{ParagenError, Result};
pub use rewrite::rewrite;
pub use walker::{run, CommitReport};
