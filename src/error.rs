//! Error taxonomy for paragen.
//!
//! Phase-1 failures (read, parse, stage) are all fatal for a whole walk:
//! the commit engine aborts and no original file is modified. Phase-2
//! rename failures are deliberately *not* represented here — they are
//! collected per file in [`crate::walker::CommitReport`] instead of
//! aborting the remaining renames.

use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by the rewrite and walk pipeline.
#[derive(Debug, Error)]
pub enum ParagenError {
    /// The input is not valid Go source. No partial rewrite is produced.
    #[error("cannot parse {file}: {message}")]
    Parse { file: String, message: String },

    /// A mutated tree produced an inconsistent edit set. This signals an
    /// internal invariant violation in the rewriter, not bad user input.
    #[error("cannot render rewritten {file}: {message}")]
    Format { file: String, message: String },

    /// Filesystem failure while reading a candidate or staging a temp file.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The directory traversal itself reported an error.
    #[error("walk error: {0}")]
    Walk(String),
}

impl ParagenError {
    /// Attach a path to a raw io error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ParagenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_the_file() {
        let err = ParagenError::Parse {
            file: "foo_test.go".into(),
            message: "syntax error at 3:1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("foo_test.go"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn io_error_carries_path_and_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = ParagenError::io("/tmp/x_test.go", inner);
        assert!(err.to_string().contains("/tmp/x_test.go"));
    }
}
